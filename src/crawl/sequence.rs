//! crawl/sequence — значения AUTOINCREMENT из sqlite_sequence(name TEXT, seq INTEGER).

use serde::Serialize;

use super::crawler::{CrawlMode, Crawler};
use crate::error::{ErrorTracker, Level, RepairError, Result};
use crate::page::{Cell, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceItem {
    pub name: String,
    pub seq: i64,
}

impl SequenceItem {
    pub(crate) fn from_cell(cell: &Cell) -> Option<SequenceItem> {
        if cell.count() < 2 {
            return None;
        }
        let name = match cell.value(0)? {
            Value::Text(t) => t.to_string_lossy().into_owned(),
            _ => return None,
        };
        let seq = cell.value(1)?.as_i64()?;
        Some(SequenceItem { name, seq })
    }
}

pub struct SequenceCrawler<'c, 'a> {
    crawler: &'c Crawler<'a>,
}

impl<'c, 'a> SequenceCrawler<'c, 'a> {
    pub fn new(crawler: &'c Crawler<'a>) -> Self {
        Self { crawler }
    }

    pub fn work(&self, root_page: u32, tracker: &mut ErrorTracker) -> Result<Vec<SequenceItem>> {
        let mut items = Vec::new();
        let mut malformed = Vec::new();
        let mut local = ErrorTracker::new();
        let ok = self.crawler.crawl(
            root_page,
            CrawlMode::Cells,
            &mut local,
            |_, _| true,
            |cell| {
                match SequenceItem::from_cell(&cell) {
                    Some(item) => items.push(item),
                    None => malformed.push((cell.page_no(), cell.index())),
                }
                true
            },
        );
        for (page, index) in malformed {
            local.record(
                RepairError::corruption("malformed sequence cell")
                    .with_page(page)
                    .with_cell(index)
                    .with_level(Level::NotFatal),
            );
        }
        let worst = local.worst().cloned();
        tracker.absorb(local);
        if !ok {
            return Err(worst
                .unwrap_or_else(|| RepairError::corruption("sequence table unreadable"))
                .with_table(crate::consts::SEQUENCE_TABLE));
        }
        Ok(items)
    }
}
