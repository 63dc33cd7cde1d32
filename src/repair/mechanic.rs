//! repair/mechanic — восстановление по material: каталог не читается,
//! разбираются ровно страницы из снимка.
//!
//! Страница, которую не удалось разобрать или чей xxh32 изменился, не останавливает
//! таблицу: остальные страницы собираются, а имя таблицы возвращается для
//! добора полным обходом (тот идёт с Conflict::Ignore, строки из material остаются).
//! Так же добирается таблица, в живом дереве которой есть страницы с записями,
//! которых нет в снимке (таблица выросла после deconstruct).

use std::collections::HashSet;

use super::assembler::{Assembler, Conflict};
use super::repairman::{aborts_pass, Repairman};
use super::score::TableTally;
use crate::crawl::CrawlMode;
use crate::error::{ErrorTracker, Level, RepairError, Result};
use crate::material::{Content, Material};

pub struct Mechanic<'r, 'a, 'p> {
    repairman: &'r mut Repairman<'a, 'p>,
    conflict: Conflict,
}

impl<'r, 'a, 'p> Mechanic<'r, 'a, 'p> {
    pub fn new(repairman: &'r mut Repairman<'a, 'p>) -> Self {
        Self {
            repairman,
            conflict: Conflict::Replace,
        }
    }

    /// Старшие поколения собираются с Ignore: строки более нового источника остаются.
    pub fn with_conflict(mut self, conflict: Conflict) -> Self {
        self.conflict = conflict;
        self
    }

    /// Возвращает таблицы, которым нужен полный обход.
    pub fn work(&mut self, material: &Material, assembler: &mut dyn Assembler) -> Result<Vec<String>> {
        let pager = self.repairman.pager();
        if material.info.page_size != pager.page_size() {
            return Err(RepairError::format(format!(
                "material page size {} != database page size {}",
                material.info.page_size,
                pager.page_size()
            ))
            .with_level(Level::Fatal));
        }
        if material.info.wal_salt1 != pager.wal_salt().salt1 || material.info.wal_frames != pager.wal_frames() {
            log::debug!("mechanic: wal changed since material, pages are verified by hash");
        }

        assembler.set_conflict(self.conflict);
        self.repairman.score_mut().set_tables(material.contents.len());
        log::info!(
            "mechanic: tables={}, pages={}",
            material.contents.len(),
            material.page_count()
        );

        let mut fallback = Vec::new();
        for content in &material.contents {
            let outcome = self.assemble_content(assembler, content);
            let complete = match &outcome {
                Ok((_, complete)) => *complete,
                Err(e) if aborts_pass(e) => return Err(e.clone()),
                Err(_) => false,
            };
            if !complete {
                fallback.push(content.table_name.clone());
            }
            self.repairman
                .finish_table(&content.table_name, outcome.map(|(tally, _)| tally))?;
        }
        self.repairman.finish();
        Ok(fallback)
    }

    fn assemble_content(&mut self, assembler: &mut dyn Assembler, content: &Content) -> Result<(TableTally, bool)> {
        assembler.mark_as_assembling(&content.table_name)?;
        if let Err(e) = assembler.assemble_table(&content.sql, &content.associated) {
            let _ = assembler.mark_as_assembled();
            return Err(e);
        }

        let mut tally = TableTally::default();
        let mut complete = true;
        for page in &content.pages {
            match self.repairman.assemble_verified_page(assembler, page.number, page.hash, &mut tally) {
                Ok(true) => {}
                Ok(false) => complete = false,
                Err(e) => return Err(e.with_table(&content.table_name)),
            }
        }

        if complete && self.has_unknown_pages(content) {
            log::info!("mechanic: {} grew since material, needs full crawl", content.table_name);
            complete = false;
        }

        if let Some(seq) = content.sequence {
            if let Err(e) = assembler.assemble_sequence(&content.table_name, seq) {
                self.repairman
                    .record(e.with_table(&content.table_name).with_level(Level::NotFatal))?;
            }
        }
        assembler.mark_as_assembled()?;
        Ok((tally, complete))
    }

    /// В дереве таблицы есть страница с записями, которой нет в material.
    /// Нечитаемое дерево material не опровергает: его ошибки здесь не учитываются.
    fn has_unknown_pages(&self, content: &Content) -> bool {
        let known: HashSet<u32> = content.pages.iter().map(|p| p.number).collect();
        let crawler = self.repairman.crawler();
        let mut scratch = ErrorTracker::new();
        let mut unknown = false;
        crawler.crawl(
            content.root_page,
            CrawlMode::Pages,
            &mut scratch,
            |page, _| {
                if page.kind().carries_records() && !known.contains(&page.number()) {
                    unknown = true;
                    return false;
                }
                true
            },
            |_| true,
        );
        unknown
    }
}
