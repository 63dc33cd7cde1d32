//! pager — согласованное представление страниц исходной БД.
//!
//! Разделение:
//! - header.rs — разбор 100-байтового заголовка файла.
//! - mod.rs    — Pager: FileAccess + наложение закоммиченных кадров WAL + LRU-кэш.
//!
//! Страницы адресуются 1-based номером. Образ страницы отдаётся как Arc<[u8]>:
//! один и тот же буфер разделяют кэш, Page и Cell без копирования.
//!
//! Pager однопоточный (RefCell вокруг кэша): один экземпляр — один проход
//! восстановления под одним захватом ReadLocker.

pub mod header;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RepairConfig;
use crate::consts::DB_HEADER_SIZE;
use crate::error::{Level, RepairError, Result};
use crate::file::cache::PageCache;
use crate::file::FileAccess;
use crate::wal::{wal_path, Salt, Wal};

pub use header::{DbHeader, TextEncoding};

pub struct Pager {
    path: PathBuf,
    file: FileAccess,
    header: DbHeader,
    page_count: u32,
    wal: Option<Wal>,
    wal_error: Option<RepairError>,
    cache: RefCell<PageCache>,
    max_overflow_chain: usize,
}

impl Pager {
    /// Открыть БД (и её WAL, если он есть и не отключён в конфиге).
    ///
    /// Ошибки:
    /// - Empty — файла нет или он пустой;
    /// - Io/Format с уровнем MostFatal — файл не открыть или заголовок не разобрать.
    /// Битый WAL не ошибка: он отбрасывается с предупреждением, см. wal_error().
    pub fn open(path: &Path, cfg: &RepairConfig) -> Result<Pager> {
        Self::open_assuming(path, cfg, None)
    }

    /// Как open, но при нечитаемом заголовке берёт геометрию (page_size, reserved)
    /// из `assumed` (например, из material).
    pub fn open_assuming(path: &Path, cfg: &RepairConfig, assumed: Option<(u32, u8)>) -> Result<Pager> {
        if !path.exists() {
            return Err(RepairError::empty(path));
        }
        let file = FileAccess::open(path, cfg.use_mmap)?;
        if file.is_empty() {
            return Err(RepairError::empty(path));
        }

        let header = {
            let raw = file.read(0, DB_HEADER_SIZE)?;
            match (DbHeader::parse(&raw), assumed) {
                (Ok(h), _) => h,
                (Err(e), Some((page_size, reserved))) => {
                    log::warn!(
                        "pager: header unreadable, assuming page_size={}, path={}, err={}",
                        page_size,
                        path.display(),
                        e
                    );
                    DbHeader::assumed(page_size, reserved).map_err(|e| e.with_path(path).with_level(Level::MostFatal))?
                }
                (Err(e), None) => return Err(e.with_path(path).with_level(Level::MostFatal)),
            }
        };
        let ps = header.page_size as u64;
        let file_pages = ((file.len() + ps - 1) / ps) as u32;

        let (wal, wal_error) = if cfg.skip_wal {
            (None, None)
        } else {
            match Wal::open(&wal_path(path), header.page_size, cfg.use_mmap) {
                Ok(w) => (w, None),
                Err(e) => {
                    log::warn!("pager: wal disposed, path={}, err={}", path.display(), e);
                    (None, Some(e))
                }
            }
        };

        let mut page_count = file_pages;
        if let Some(w) = &wal {
            page_count = page_count.max(w.max_page()).max(w.commit_size());
        }

        log::debug!(
            "pager: open path={}, page_size={}, reserved={}, file_pages={}, page_count={}, wal_pages={}",
            path.display(),
            header.page_size,
            header.reserved_bytes,
            file_pages,
            page_count,
            wal.as_ref().map(|w| w.page_count()).unwrap_or(0)
        );

        Ok(Pager {
            path: path.to_path_buf(),
            file,
            header,
            page_count,
            wal,
            wal_error,
            cache: RefCell::new(PageCache::new(cfg.page_cache_pages)),
            max_overflow_chain: cfg.max_overflow_chain,
        })
    }

    /// Образ страницы: из WAL (если закоммичен там), иначе из файла.
    pub fn page(&self, page_no: u32) -> Result<Arc<[u8]>> {
        if page_no == 0 || page_no > self.page_count {
            return Err(RepairError::corruption(format!(
                "page {} out of range 1..={}",
                page_no, self.page_count
            ))
            .with_page(page_no));
        }
        if let Some(data) = self.cache.borrow_mut().get(page_no) {
            return Ok(data);
        }

        let from_wal = match &self.wal {
            Some(w) => w.page_data(page_no)?,
            None => None,
        };
        let data = match from_wal {
            Some(d) => d,
            None => {
                let ps = self.header.page_size as usize;
                let off = (page_no as u64 - 1) * ps as u64;
                let raw = self.file.read(off, ps).map_err(|e| e.with_page(page_no))?;
                if raw.len() != ps {
                    return Err(RepairError::corruption(format!(
                        "short read: {} of {} bytes",
                        raw.len(),
                        ps
                    ))
                    .with_path(&self.path)
                    .with_page(page_no));
                }
                Arc::from(&raw[..])
            }
        };

        self.cache.borrow_mut().put(page_no, data.clone());
        Ok(data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.header.page_size
    }

    #[inline]
    pub fn usable_size(&self) -> u32 {
        self.header.usable_size()
    }

    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn encoding(&self) -> TextEncoding {
        self.header.encoding
    }

    pub fn file_size(&self) -> u64 {
        self.file.len()
    }

    pub fn wal(&self) -> Option<&Wal> {
        self.wal.as_ref()
    }

    /// Почему WAL был отброшен при открытии (если был).
    pub fn wal_error(&self) -> Option<&RepairError> {
        self.wal_error.as_ref()
    }

    pub fn wal_salt(&self) -> Salt {
        self.wal.as_ref().map(|w| w.salt()).unwrap_or_default()
    }

    pub fn wal_frames(&self) -> u32 {
        self.wal.as_ref().map(|w| w.max_frame()).unwrap_or(0)
    }

    pub fn max_overflow_chain(&self) -> usize {
        self.max_overflow_chain
    }
}
