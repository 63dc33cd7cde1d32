//! file — доступ к байтам исходных файлов.
//!
//! - access.rs — FileAccess (mmap / позиционное чтение).
//! - cache.rs  — ограниченный LRU-кэш страниц (по числу страниц).

pub mod access;
pub(crate) mod cache;

pub use access::FileAccess;
