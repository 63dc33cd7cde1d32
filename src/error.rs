//! error — таксономия ошибок восстановления и уровни критичности (CriticalErrorOnly).
//!
//! Каждая ошибка несёт:
//! - kind: Io / Format / Corruption / Checksum / Lock (+ служебные Interrupted / Empty / Usage);
//! - level: None < NotFatal < Fatal < MostFatal;
//! - контекст: путь, номер страницы, индекс ячейки, имя таблицы (что известно).
//!
//! Политика:
//! - Corruption/Checksum обрабатываются локально и видны только агрегатно (score, счётчики).
//! - Io/Format/Lock возвращаются вызывающему как итог операции.
//! - ErrorTracker только повышает худший уровень в рамках одной операции.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T, E = RepairError> = std::result::Result<T, E>;

/// Уровень критичности. Порядок вариантов задаёт сравнение.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Level {
    #[default]
    None,
    /// Одна битая ячейка/страница — обход продолжается.
    NotFatal,
    /// Таблица или файл прерывается, соседние продолжают.
    Fatal,
    /// Весь проход прерывается немедленно.
    MostFatal,
}

impl Level {
    #[inline]
    pub fn is_fatal(self) -> bool {
        self >= Level::Fatal
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::None => "none",
            Level::NotFatal => "not-fatal",
            Level::Fatal => "fatal",
            Level::MostFatal => "most-fatal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Io,
    Format,
    Corruption,
    Checksum,
    Lock,
    /// Остановлено флагом или колбэком прогресса.
    Interrupted,
    /// Исходный файл пуст или отсутствует.
    Empty,
    /// Нарушен протокол вызовов (например, ассемблер не в том состоянии).
    Usage,
}

impl ErrorKind {
    pub fn default_level(self) -> Level {
        match self {
            ErrorKind::Corruption | ErrorKind::Checksum | ErrorKind::Empty => Level::NotFatal,
            ErrorKind::Io
            | ErrorKind::Format
            | ErrorKind::Lock
            | ErrorKind::Interrupted
            | ErrorKind::Usage => Level::Fatal,
        }
    }

    /// Ошибки, которые возвращаются вызывающему как итог операции.
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorKind::Io | ErrorKind::Format | ErrorKind::Lock)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "IOError",
            ErrorKind::Format => "FormatError",
            ErrorKind::Corruption => "CorruptionError",
            ErrorKind::Checksum => "ChecksumError",
            ErrorKind::Lock => "LockError",
            ErrorKind::Interrupted => "Interrupted",
            ErrorKind::Empty => "Empty",
            ErrorKind::Usage => "UsageError",
        };
        f.write_str(s)
    }
}

/// Наименьшая единица, к которой привязана ошибка.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub path: Option<PathBuf>,
    pub page: Option<u32>,
    pub cell: Option<usize>,
    pub table: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(p) = &self.path {
            parts.push(format!("path={}", p.display()));
        }
        if let Some(t) = &self.table {
            parts.push(format!("table={}", t));
        }
        if let Some(pg) = self.page {
            parts.push(format!("page={}", pg));
        }
        if let Some(c) = self.cell {
            parts.push(format!("cell={}", c));
        }
        if parts.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind} [{level}] {context}: {message}")]
pub struct RepairError {
    kind: ErrorKind,
    level: Level,
    context: ErrorContext,
    message: String,
}

impl RepairError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            level: kind.default_level(),
            context: ErrorContext::default(),
            message: message.into(),
        }
    }

    pub fn io(path: &Path, err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string()).with_path(path)
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Format, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, message)
    }

    pub fn checksum(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Checksum, message)
    }

    pub fn lock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lock, message)
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted, "stopped by caller")
    }

    pub fn empty(path: &Path) -> Self {
        Self::new(ErrorKind::Empty, "database is empty or missing").with_path(path)
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.context.path = Some(path.to_path_buf());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.context.page = Some(page);
        self
    }

    pub fn with_cell(mut self, cell: usize) -> Self {
        self.context.cell = Some(cell);
        self
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.context.table = Some(table.to_string());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn page(&self) -> Option<u32> {
        self.context.page
    }

    pub fn table(&self) -> Option<&str> {
        self.context.table.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.context.path.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Переопределение уровня в зависимости от места возникновения.
///
/// height — глубина страницы в обходе (0 = корень дерева).
pub trait Classifier {
    fn classify(&self, error: &RepairError, height: u32) -> Level;
}

/// Битый корень дерева — Fatal для этого дерева; всё глубже — NotFatal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn classify(&self, error: &RepairError, height: u32) -> Level {
        match error.kind() {
            ErrorKind::Corruption | ErrorKind::Checksum => {
                if height == 0 {
                    Level::Fatal
                } else {
                    Level::NotFatal
                }
            }
            _ => error.level(),
        }
    }
}

/// Сколько последних ошибок держим для отчёта.
const TRACKER_KEEP: usize = 64;

/// Худший уровень в рамках одной операции + агрегаты.
#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    level: Level,
    worst: Option<RepairError>,
    recent: Vec<RepairError>,
    corruptions: u64,
    checksums: u64,
    total: u64,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Учесть ошибку; возвращает худший уровень после учёта.
    pub fn record(&mut self, error: RepairError) -> Level {
        self.total += 1;
        match error.kind() {
            ErrorKind::Corruption => self.corruptions += 1,
            ErrorKind::Checksum => self.checksums += 1,
            _ => {}
        }
        if error.level() > self.level || self.worst.is_none() {
            if error.level() > self.level {
                self.level = error.level();
            }
            self.worst = Some(error.clone());
        }
        if self.recent.len() == TRACKER_KEEP {
            self.recent.remove(0);
        }
        self.recent.push(error);
        self.level
    }

    pub fn absorb(&mut self, other: ErrorTracker) {
        if other.level > self.level || self.worst.is_none() {
            if other.level > self.level {
                self.level = other.level;
            }
            if other.worst.is_some() {
                self.worst = other.worst;
            }
        }
        for e in other.recent {
            if self.recent.len() == TRACKER_KEEP {
                self.recent.remove(0);
            }
            self.recent.push(e);
        }
        self.corruptions += other.corruptions;
        self.checksums += other.checksums;
        self.total += other.total;
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn worst(&self) -> Option<&RepairError> {
        self.worst.as_ref()
    }

    pub fn errors(&self) -> &[RepairError] {
        &self.recent
    }

    pub fn corruptions(&self) -> u64 {
        self.corruptions
    }

    pub fn checksums(&self) -> u64 {
        self.checksums
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.recent.iter().any(|e| e.kind() == kind)
    }
}
