//! WAL (SQLite write-ahead log) — только чтение.
//!
//! Разделение:
//! - header.rs   — заголовок лога и заголовок кадра (разбор/сборка).
//! - checksum.rs — накопительная двухсловная сумма.
//! - reader.rs   — Wal (открытие, отображение страниц на кадры) и ленивая последовательность Frames.
//!
//! Pager накладывает закоммиченные образы страниц из WAL поверх основного файла.

pub mod checksum;
pub mod header;
pub mod reader;

use std::path::{Path, PathBuf};

use crate::consts::WAL_SUFFIX;
use crate::util::with_suffix;

pub use checksum::{wal_checksum, Checksum};
pub use header::{FrameHeader, Salt, WalHeader};
pub use reader::{Frame, Frames, Wal};

/// Путь к WAL рядом с файлом БД: "<db>-wal".
pub fn wal_path(db: &Path) -> PathBuf {
    with_suffix(db, WAL_SUFFIX)
}
