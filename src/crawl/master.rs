//! crawl/master — чтение каталога (sqlite_master) со страницы 1.
//!
//! Ячейка каталога: type TEXT, name TEXT, tbl_name TEXT, rootpage INTEGER|NULL, sql TEXT|NULL.
//! Колонок меньше пяти или типы не те — ячейка битая, пропускается.

use serde::Serialize;
use std::collections::HashMap;

use super::crawler::{CrawlMode, Crawler};
use crate::consts::{MASTER_ROOT_PAGE, RESERVED_PREFIX, SEQUENCE_TABLE};
use crate::error::{ErrorTracker, Level, RepairError, Result};
use crate::page::{Cell, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasterItem {
    /// "table" / "index" / "view" / "trigger"
    pub kind: String,
    pub name: String,
    pub table_name: String,
    /// 0 — у объекта нет дерева (view, trigger, виртуальная таблица)
    pub root_page: u32,
    pub sql: Option<String>,
}

impl MasterItem {
    pub fn is_table(&self) -> bool {
        self.kind == "table"
    }

    pub fn is_index(&self) -> bool {
        self.kind == "index"
    }

    pub fn is_view(&self) -> bool {
        self.kind == "view"
    }

    pub fn is_trigger(&self) -> bool {
        self.kind == "trigger"
    }

    /// Служебные объекты SQLite (sqlite_sequence, sqlite_autoindex_*, ...).
    pub fn is_reserved(&self) -> bool {
        self.name.starts_with(RESERVED_PREFIX)
    }

    pub(crate) fn from_cell(cell: &Cell) -> Option<MasterItem> {
        if cell.count() < 5 {
            return None;
        }
        let text = |i: usize| match cell.value(i)? {
            Value::Text(t) => Some(t.to_string_lossy().into_owned()),
            _ => None,
        };
        let kind = text(0)?;
        let name = text(1)?;
        let table_name = text(2)?;
        let root_page = match cell.value(3)? {
            Value::Null => 0,
            v => u32::try_from(v.as_i64()?).ok()?,
        };
        let sql = match cell.value(4)? {
            Value::Null => None,
            Value::Text(t) => Some(t.to_string_lossy().into_owned()),
            _ => return None,
        };
        Some(MasterItem { kind, name, table_name, root_page, sql })
    }
}

/// Каталог, разложенный для сборки: таблицы в порядке каталога, их индексы
/// и триггеры, представления, корень sqlite_sequence.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tables: Vec<MasterItem>,
    pub associated: HashMap<String, Vec<String>>,
    pub views: Vec<String>,
    pub sequence_root: Option<u32>,
}

impl Catalog {
    pub fn from_items(items: &[MasterItem]) -> Catalog {
        let mut cat = Catalog::default();
        for item in items {
            if item.is_table() && item.name == SEQUENCE_TABLE {
                if item.root_page > 0 {
                    cat.sequence_root = Some(item.root_page);
                }
                continue;
            }
            if item.is_reserved() {
                continue;
            }
            let sql = match &item.sql {
                Some(s) => s.clone(),
                // автоиндексы UNIQUE/PRIMARY KEY: SQL нет, SQLite создаст их сам
                None => continue,
            };
            if item.is_table() {
                if item.root_page == 0 {
                    log::warn!("master: virtual table {} skipped", item.name);
                    continue;
                }
                cat.tables.push(item.clone());
            } else if item.is_index() || item.is_trigger() {
                cat.associated.entry(item.table_name.clone()).or_default().push(sql);
            } else if item.is_view() {
                cat.views.push(sql);
            }
        }
        cat
    }

    pub fn associated_of(&self, table: &str) -> &[String] {
        self.associated.get(table).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

pub struct MasterCrawler<'c, 'a> {
    crawler: &'c Crawler<'a>,
}

impl<'c, 'a> MasterCrawler<'c, 'a> {
    pub fn new(crawler: &'c Crawler<'a>) -> Self {
        Self { crawler }
    }

    /// Все читаемые записи каталога в порядке дерева.
    /// Err — только если обход каталога фатален (битая страница 1, остановка).
    pub fn work(&self, tracker: &mut ErrorTracker) -> Result<Vec<MasterItem>> {
        let mut items = Vec::new();
        let mut malformed = Vec::new();
        let mut local = ErrorTracker::new();
        let ok = self.crawler.crawl(
            MASTER_ROOT_PAGE,
            CrawlMode::Cells,
            &mut local,
            |_, _| true,
            |cell| {
                match MasterItem::from_cell(&cell) {
                    Some(item) => items.push(item),
                    None => malformed.push((cell.page_no(), cell.index())),
                }
                true
            },
        );
        for (page, index) in &malformed {
            local.record(
                RepairError::corruption("malformed catalog cell")
                    .with_page(*page)
                    .with_cell(*index)
                    .with_level(Level::NotFatal),
            );
        }
        let worst = local.worst().cloned();
        tracker.absorb(local);
        if !ok {
            return Err(worst
                .unwrap_or_else(|| RepairError::corruption("master table unreadable"))
                .with_table("sqlite_master"));
        }
        log::debug!("master: items={}, malformed={}", items.len(), malformed.len());
        Ok(items)
    }
}
