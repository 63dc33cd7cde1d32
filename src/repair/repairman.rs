//! repair/repairman — общая машинерия прохода восстановления.
//!
//! Repairman держит всё, что живёт ровно один проход:
//! - ErrorTracker (худший уровень, агрегаты порчи);
//! - Score и Progress;
//! - флаг остановки и счётчик ячеек до следующего milestone;
//! - статистику для RepairReport.
//!
//! FullCrawler и Mechanic — два способа прохода поверх одного Repairman.
//! Ошибки Assembler-а: NotFatal — ячейка пропущена; Fatal — таблица брошена;
//! MostFatal или Interrupted — прерван весь проход.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::assembler::Assembler;
use super::score::{Progress, Score, TableTally};
use super::RepairReport;
use crate::config::RepairConfig;
use crate::crawl::{CrawlEvent, CrawlMode, Crawler};
use crate::error::{ErrorKind, ErrorTracker, Level, RepairError, Result};
use crate::metrics::{record_cell_assembled, record_cell_skipped};
use crate::page::{Cell, PageDecoder};
use crate::pager::Pager;

/// Ошибка, после которой проход не продолжается.
pub fn aborts_pass(e: &RepairError) -> bool {
    e.level() >= Level::MostFatal || e.kind() == ErrorKind::Interrupted
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PassStats {
    pub tables: usize,
    pub tables_failed: Vec<String>,
    pub cells_assembled: u64,
    pub cells_skipped: u64,
    pub pages_decoded: u64,
    pub pages_failed: u64,
    pub milestones: u64,
    /// Доля восстановленного по каждой закрытой таблице.
    pub table_scores: Vec<(String, f64)>,
}

pub struct Repairman<'a, 'p> {
    pager: &'a Pager,
    config: RepairConfig,
    stop: Option<Arc<AtomicBool>>,
    tracker: ErrorTracker,
    score: Score,
    progress: Progress<'p>,
    since_milestone: usize,
    stats: PassStats,
}

impl<'a, 'p> Repairman<'a, 'p> {
    pub fn new(pager: &'a Pager, config: RepairConfig) -> Self {
        Self {
            pager,
            config,
            stop: None,
            tracker: ErrorTracker::new(),
            score: Score::new(),
            progress: Progress::new(),
            since_milestone: 0,
            stats: PassStats::default(),
        }
    }

    pub fn with_stop_flag(mut self, stop: Option<Arc<AtomicBool>>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: Progress<'p>) -> Self {
        self.progress = progress;
        self
    }

    pub fn pager(&self) -> &'a Pager {
        self.pager
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn crawler(&self) -> Crawler<'a> {
        Crawler::new(self.pager).with_stop_flag(self.stop.clone())
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ErrorTracker {
        &mut self.tracker
    }

    pub fn score(&self) -> f64 {
        self.score.value()
    }

    pub(crate) fn score_mut(&mut self) -> &mut Score {
        &mut self.score
    }

    pub fn table_scores(&self) -> &[(String, f64)] {
        &self.stats.table_scores
    }

    pub fn progress(&self) -> f64 {
        self.progress.value()
    }

    pub fn is_stopped(&self) -> bool {
        self.progress.is_cancelled()
            || self.stop.as_ref().map(|f| f.load(Ordering::Relaxed)).unwrap_or(false)
    }

    /// Учесть ошибку. Err — если она прерывает проход.
    pub fn record(&mut self, error: RepairError) -> Result<()> {
        let stop = aborts_pass(&error);
        let keep = if stop { Some(error.clone()) } else { None };
        self.tracker.record(error);
        match keep {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn tick_page(&mut self) -> Result<()> {
        let total = self.pager.page_count().max(1) as f64;
        if !self.progress.increase(1.0 / total) {
            if let Some(f) = &self.stop {
                f.store(true, Ordering::Relaxed);
            }
            return Err(RepairError::interrupted());
        }
        Ok(())
    }

    /// Передать ячейку приёмнику. Ok(true) — строка записана, Ok(false) — пропущена.
    pub fn push_cell(&mut self, assembler: &mut dyn Assembler, cell: &Cell) -> Result<bool> {
        match assembler.assemble_cell(cell) {
            Ok(()) => {
                self.stats.cells_assembled += 1;
                record_cell_assembled();
                self.since_milestone += 1;
                if self.config.milestone_interval > 0 && self.since_milestone >= self.config.milestone_interval {
                    self.since_milestone = 0;
                    assembler.mark_as_milestone()?;
                    self.stats.milestones += 1;
                    log::debug!("repairman: milestone #{}, cells={}", self.stats.milestones, self.stats.cells_assembled);
                }
                Ok(true)
            }
            Err(e) if e.level() >= Level::Fatal => Err(e),
            Err(e) => {
                self.stats.cells_skipped += 1;
                record_cell_skipped();
                self.tracker.record(e);
                Ok(false)
            }
        }
    }

    /// Обойти дерево таблицы и собрать все читаемые строки.
    pub fn assemble_tree(&mut self, assembler: &mut dyn Assembler, table: &str, root: u32) -> Result<TableTally> {
        let crawler = self.crawler();
        let mut local = ErrorTracker::new();
        let mut tally = TableTally::default();
        let mut failure = None;
        let fatal;
        {
            let mut walk = crawler.walk(root, CrawlMode::Cells, &mut local);
            while let Some(ev) = walk.next() {
                let step = match ev {
                    CrawlEvent::Page { .. } => self.tick_page().map(|_| ()),
                    CrawlEvent::Cell(cell) => {
                        tally.expected_cells += 1;
                        self.push_cell(assembler, &cell).map(|ok| {
                            if ok {
                                tally.assembled_cells += 1;
                            }
                        })
                    }
                };
                if let Err(e) = step {
                    failure = Some(e);
                    break;
                }
            }
            tally.decoded_pages = walk.pages_decoded();
            tally.referenced_pages = walk.pages_decoded() + walk.pages_failed();
            tally.expected_cells += walk.cells_failed();
            self.stats.cells_skipped += walk.cells_failed();
            fatal = walk.is_fatal();
        }
        self.stats.pages_decoded += tally.decoded_pages;
        self.stats.pages_failed += tally.referenced_pages - tally.decoded_pages;
        let interrupted = local.has_kind(ErrorKind::Interrupted);
        self.tracker.absorb(local);

        if let Some(e) = failure {
            return Err(e.with_table(table));
        }
        if interrupted || self.is_stopped() {
            return Err(RepairError::interrupted().with_table(table));
        }
        if fatal {
            // ошибка уже в трекере; таблица остаётся с тем, что успели собрать
            log::warn!("repairman: table {} crawl ended early", table);
            self.stats.tables_failed.push(table.to_string());
        }
        log::debug!(
            "repairman: table {} pages={}/{} cells={}/{}",
            table,
            tally.decoded_pages,
            tally.referenced_pages,
            tally.assembled_cells,
            tally.expected_cells
        );
        Ok(tally)
    }

    /// Разобрать страницу из material: проверить хэш и собрать её записи.
    /// Ok(false) — страница нечитаема или изменилась с момента снимка.
    pub fn assemble_verified_page(
        &mut self,
        assembler: &mut dyn Assembler,
        page_no: u32,
        hash: u32,
        tally: &mut TableTally,
    ) -> Result<bool> {
        tally.referenced_pages += 1;
        self.tick_page()?;
        let decoder = PageDecoder::new(self.pager);
        let page = match decoder.decode(page_no) {
            Ok(p) => p,
            Err(e) => {
                self.stats.pages_failed += 1;
                self.record(e.with_level(Level::NotFatal))?;
                return Ok(false);
            }
        };
        if page.hash() != hash {
            self.stats.pages_failed += 1;
            self.record(
                RepairError::checksum(format!("page hash {:08x} != material {:08x}", page.hash(), hash))
                    .with_page(page_no)
                    .with_level(Level::NotFatal),
            )?;
            return Ok(false);
        }
        tally.decoded_pages += 1;
        self.stats.pages_decoded += 1;
        if !page.kind().carries_records() {
            return Ok(true);
        }
        for i in 0..page.cell_count() {
            tally.expected_cells += 1;
            match decoder.decode_cell(&page, i) {
                Ok(cell) => {
                    if self.push_cell(assembler, &cell)? {
                        tally.assembled_cells += 1;
                    }
                }
                Err(e) => {
                    self.stats.cells_skipped += 1;
                    record_cell_skipped();
                    self.record(e.with_level(Level::NotFatal))?;
                }
            }
        }
        Ok(true)
    }

    /// Закрыть таблицу: итог в score, ошибка — в трекер.
    /// Err — только если ошибка прерывает проход.
    pub fn finish_table(&mut self, table: &str, outcome: Result<TableTally>) -> Result<()> {
        self.stats.tables += 1;
        match outcome {
            Ok(tally) => {
                self.score.add_table(&tally);
                self.stats.table_scores.push((table.to_string(), tally.fraction()));
                Ok(())
            }
            Err(e) => {
                log::warn!("repairman: table {} failed, err={}", table, e);
                self.stats.tables_failed.push(table.to_string());
                self.stats.table_scores.push((table.to_string(), 0.0));
                self.record(e.with_table(table))
            }
        }
    }

    /// Конец прохода: прогресс доводится до 1.
    pub fn finish(&mut self) {
        self.progress.finish();
    }

    pub fn report(&self, source: &Path, destination: &Path) -> RepairReport {
        RepairReport {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            score: self.score.value(),
            level: self.tracker.level(),
            tables: self.stats.tables,
            tables_failed: self.stats.tables_failed.clone(),
            cells_assembled: self.stats.cells_assembled,
            cells_skipped: self.stats.cells_skipped,
            pages_decoded: self.stats.pages_decoded,
            pages_failed: self.stats.pages_failed,
            milestones: self.stats.milestones,
            corruptions: self.tracker.corruptions(),
            checksums: self.tracker.checksums(),
            wal_frames: self.pager.wal().map(|w| w.valid_frames()).unwrap_or(0),
            wal_disposed: self.pager.wal().map(|w| w.disposed_frames()).unwrap_or(0),
            material: None,
            fallback_tables: Vec::new(),
            worst: self.tracker.worst().cloned(),
            errors: self.tracker.errors().to_vec(),
        }
    }
}
