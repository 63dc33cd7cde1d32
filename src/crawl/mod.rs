//! crawl — обход деревьев исходной БД.
//!
//! - crawler.rs  — Crawler/Walk: pre-order обход с visited-set и классификацией ошибок.
//! - master.rs   — MasterCrawler: каталог со страницы 1.
//! - sequence.rs — SequenceCrawler: sqlite_sequence.

pub mod crawler;
pub mod master;
pub mod sequence;

pub use crawler::{CrawlEvent, CrawlMode, Crawler, Walk};
pub use master::{Catalog, MasterCrawler, MasterItem};
pub use sequence::{SequenceCrawler, SequenceItem};
