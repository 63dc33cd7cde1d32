//! repair/full — полный проход: каталог → sqlite_sequence → таблицы по порядку → view.
//!
//! Фильтр (если задан) оставляет таблицы по имени; служебные sqlite_* не собираются
//! никогда. Битый каталог — не ошибка вызова: score остаётся 0, причина в трекере.
//! finish() у Assembler-а вызывает владелец прохода, не FullCrawler.

use std::collections::HashMap;

use super::assembler::Assembler;
use super::repairman::{aborts_pass, Repairman};
use super::score::TableTally;
use crate::crawl::{Catalog, MasterCrawler, MasterItem, SequenceCrawler};
use crate::error::{Level, Result};

pub type TableFilter<'f> = &'f dyn Fn(&str) -> bool;

pub struct FullCrawler<'r, 'a, 'p> {
    repairman: &'r mut Repairman<'a, 'p>,
    filter: Option<TableFilter<'r>>,
}

impl<'r, 'a, 'p> FullCrawler<'r, 'a, 'p> {
    pub fn new(repairman: &'r mut Repairman<'a, 'p>) -> Self {
        Self { repairman, filter: None }
    }

    pub fn with_filter(mut self, filter: Option<TableFilter<'r>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn work(&mut self, assembler: &mut dyn Assembler) -> Result<()> {
        let crawler = self.repairman.crawler();
        let items = match MasterCrawler::new(&crawler).work(self.repairman.tracker_mut()) {
            Ok(items) => items,
            Err(e) => {
                if aborts_pass(&e) {
                    return Err(e);
                }
                log::warn!("full: catalog unreadable, err={}", e);
                self.repairman.finish();
                return Ok(());
            }
        };
        let catalog = Catalog::from_items(&items);

        let sequences: HashMap<String, i64> = match catalog.sequence_root {
            Some(root) => match SequenceCrawler::new(&crawler).work(root, self.repairman.tracker_mut()) {
                Ok(seqs) => seqs.into_iter().map(|s| (s.name, s.seq)).collect(),
                Err(e) => {
                    if aborts_pass(&e) {
                        return Err(e);
                    }
                    log::warn!("full: sqlite_sequence unreadable, err={}", e);
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        let tables: Vec<&MasterItem> = catalog
            .tables
            .iter()
            .filter(|t| self.filter.map(|f| f(&t.name)).unwrap_or(true))
            .collect();
        log::info!(
            "full: catalog items={}, tables={}, views={}, sequences={}",
            items.len(),
            tables.len(),
            catalog.views.len(),
            sequences.len()
        );

        if tables.is_empty() {
            self.repairman.score_mut().set_fraction(1.0);
        } else {
            self.repairman.score_mut().set_tables(tables.len());
        }

        for table in tables {
            let outcome = self.assemble_table(assembler, table, catalog.associated_of(&table.name), sequences.get(&table.name).copied());
            if let Err(e) = &outcome {
                if aborts_pass(e) {
                    return Err(e.clone());
                }
            }
            self.repairman.finish_table(&table.name, outcome)?;
        }

        for view in &catalog.views {
            if let Err(e) = assembler.assemble_sql(view) {
                self.repairman.record(e.with_level(Level::NotFatal))?;
            }
        }
        self.repairman.finish();
        Ok(())
    }

    fn assemble_table(
        &mut self,
        assembler: &mut dyn Assembler,
        table: &MasterItem,
        associated: &[String],
        sequence: Option<i64>,
    ) -> Result<TableTally> {
        let sql = table.sql.as_deref().unwrap_or_default();
        assembler.mark_as_assembling(&table.name)?;

        // у WITHOUT ROWID корень ведёт в index-дерево, записи собираются так же
        let crawled = match assembler.assemble_table(sql, associated) {
            Ok(()) => self.repairman.assemble_tree(assembler, &table.name, table.root_page),
            Err(e) => Err(e),
        };
        if let Err(e) = &crawled {
            if aborts_pass(e) {
                return crawled;
            }
        }

        if let (Ok(_), Some(seq)) = (&crawled, sequence) {
            if let Err(e) = assembler.assemble_sequence(&table.name, seq) {
                self.repairman.record(e.with_table(&table.name).with_level(Level::NotFatal))?;
            }
        }
        assembler.mark_as_assembled()?;
        crawled
    }
}
