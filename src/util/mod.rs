//! util — общие утилиты.
//!
//! Содержит:
//! - now_unix_ms(): текущее Unix-время в миллисекундах.
//! - with_suffix(): "<path><suffix>" без разбора расширения ("db" + "-wal").
//! - quote_ident(): SQL-идентификатор в двойных кавычках.
//! - page_hash(): xxh32 образа страницы для material.

use std::ffi::OsString;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use twox_hash::XxHash32;

#[inline]
pub fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// "name" с удвоением внутренних кавычек.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[inline]
pub fn page_hash(data: &[u8]) -> u32 {
    let mut h = XxHash32::with_seed(0);
    h.write(data);
    h.finish() as u32
}
