//! Lightweight global metrics for SalvageDB.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Page decoder / crawler
//! - Page cache
//! - WAL
//! - Assembler (cells, milestones)
//! - Material / Factory

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Pages -----
static PAGES_DECODED: AtomicU64 = AtomicU64::new(0);
static PAGES_CORRUPTED: AtomicU64 = AtomicU64::new(0);
static OVERFLOW_PAGES_READ: AtomicU64 = AtomicU64::new(0);

// ----- Page cache -----
static PAGE_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static PAGE_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

// ----- WAL -----
static WAL_FRAMES_VALID: AtomicU64 = AtomicU64::new(0);
static WAL_FRAMES_DISPOSED: AtomicU64 = AtomicU64::new(0);

// ----- Assembler -----
static CELLS_ASSEMBLED: AtomicU64 = AtomicU64::new(0);
static CELLS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static MILESTONES: AtomicU64 = AtomicU64::new(0);

// ----- Material -----
static MATERIALS_WRITTEN: AtomicU64 = AtomicU64::new(0);
static MATERIALS_REJECTED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub pages_decoded: u64,
    pub pages_corrupted: u64,
    pub overflow_pages_read: u64,

    pub page_cache_hits: u64,
    pub page_cache_misses: u64,

    pub wal_frames_valid: u64,
    pub wal_frames_disposed: u64,

    pub cells_assembled: u64,
    pub cells_skipped: u64,
    pub milestones: u64,

    pub materials_written: u64,
    pub materials_rejected: u64,
}

impl MetricsSnapshot {
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.page_cache_hits + self.page_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.page_cache_hits as f64 / total as f64
        }
    }
}

pub fn record_page_decoded() {
    PAGES_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_page_corrupted() {
    PAGES_CORRUPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_overflow_page() {
    OVERFLOW_PAGES_READ.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cache_hit() {
    PAGE_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cache_miss() {
    PAGE_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wal_frames(valid: u64, disposed: u64) {
    WAL_FRAMES_VALID.fetch_add(valid, Ordering::Relaxed);
    WAL_FRAMES_DISPOSED.fetch_add(disposed, Ordering::Relaxed);
}

pub fn record_cell_assembled() {
    CELLS_ASSEMBLED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_cell_skipped() {
    CELLS_SKIPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn record_milestone() {
    MILESTONES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_material_written() {
    MATERIALS_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
pub fn record_material_rejected() {
    MATERIALS_REJECTED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        pages_decoded: PAGES_DECODED.load(Ordering::Relaxed),
        pages_corrupted: PAGES_CORRUPTED.load(Ordering::Relaxed),
        overflow_pages_read: OVERFLOW_PAGES_READ.load(Ordering::Relaxed),

        page_cache_hits: PAGE_CACHE_HITS.load(Ordering::Relaxed),
        page_cache_misses: PAGE_CACHE_MISSES.load(Ordering::Relaxed),

        wal_frames_valid: WAL_FRAMES_VALID.load(Ordering::Relaxed),
        wal_frames_disposed: WAL_FRAMES_DISPOSED.load(Ordering::Relaxed),

        cells_assembled: CELLS_ASSEMBLED.load(Ordering::Relaxed),
        cells_skipped: CELLS_SKIPPED.load(Ordering::Relaxed),
        milestones: MILESTONES.load(Ordering::Relaxed),

        materials_written: MATERIALS_WRITTEN.load(Ordering::Relaxed),
        materials_rejected: MATERIALS_REJECTED.load(Ordering::Relaxed),
    }
}
