//! repair — сборка новой БД из читаемых остатков исходной.
//!
//! - assembler.rs — контракт Assembler и состояние сборки таблицы;
//! - sqlite.rs    — SqliteAssembler (rusqlite);
//! - score.rs     — Score/Progress;
//! - repairman.rs — общая машинерия прохода (ошибки, milestones, статистика);
//! - full.rs      — FullCrawler: проход по каталогу;
//! - mechanic.rs  — Mechanic: проход по material.

pub mod assembler;
pub mod full;
pub mod mechanic;
pub mod repairman;
pub mod score;
pub mod sqlite;

use serde::Serialize;
use std::path::PathBuf;

use crate::error::{Level, RepairError};

pub use assembler::{Assembler, AssemblyState, Conflict};
pub use full::{FullCrawler, TableFilter};
pub use mechanic::Mechanic;
pub use repairman::Repairman;
pub use score::{Progress, Score, TableTally};
pub use sqlite::SqliteAssembler;

/// Итог прохода восстановления (CLI печатает его как JSON).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub score: f64,
    pub level: Level,
    pub tables: usize,
    pub tables_failed: Vec<String>,
    pub cells_assembled: u64,
    pub cells_skipped: u64,
    pub pages_decoded: u64,
    pub pages_failed: u64,
    pub milestones: u64,
    pub corruptions: u64,
    pub checksums: u64,
    pub wal_frames: u32,
    pub wal_disposed: u32,
    /// Material, по которому шло восстановление (retrieve).
    pub material: Option<PathBuf>,
    /// Таблицы, добранные полным обходом после material.
    pub fallback_tables: Vec<String>,
    pub worst: Option<RepairError>,
    pub errors: Vec<RepairError>,
}

impl RepairReport {
    pub fn new(source: &std::path::Path, destination: &std::path::Path) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            ..Default::default()
        }
    }

    /// Ошибка вне прохода (например, источник не открылся).
    pub fn record(&mut self, error: RepairError) {
        if error.level() > self.level || self.worst.is_none() {
            self.level = self.level.max(error.level());
            self.worst = Some(error.clone());
        }
        self.errors.push(error);
    }

    /// Добавить итог ещё одного прохода (retrieve собирает несколько источников
    /// в один файл). score здесь не трогается: его взвешивает вызывающий.
    pub fn absorb(&mut self, other: RepairReport) {
        if other.level > self.level || self.worst.is_none() {
            self.level = self.level.max(other.level);
            if other.worst.is_some() {
                self.worst = other.worst;
            }
        }
        self.tables += other.tables;
        self.tables_failed.extend(other.tables_failed);
        self.cells_assembled += other.cells_assembled;
        self.cells_skipped += other.cells_skipped;
        self.pages_decoded += other.pages_decoded;
        self.pages_failed += other.pages_failed;
        self.milestones += other.milestones;
        self.corruptions += other.corruptions;
        self.checksums += other.checksums;
        self.wal_frames += other.wal_frames;
        self.wal_disposed += other.wal_disposed;
        if self.material.is_none() {
            self.material = other.material;
        }
        for t in other.fallback_tables {
            if !self.fallback_tables.contains(&t) {
                self.fallback_tables.push(t);
            }
        }
        self.errors.extend(other.errors);
    }
}
