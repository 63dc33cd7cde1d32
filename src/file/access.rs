//! file/access — произвольное чтение байтовых диапазонов файла (mmap или pread).
//!
//! FileAccess владеет дескриптором и (опционально) mmap. Он ничего не знает о
//! страницах: отдаёт сырые байты. Чтение за концом файла не ошибка — возвращается
//! укороченный срез, решать что это значит будет вызывающий (pager/wal).

use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Level, RepairError, Result};

pub struct FileAccess {
    path: PathBuf,
    len: u64,
    file: Mutex<File>,
    mmap: Option<Mmap>,
}

impl FileAccess {
    /// Открыть только на чтение. Ошибка открытия — MostFatal (источник недоступен вовсе).
    pub fn open(path: &Path, use_mmap: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| RepairError::io(path, e).with_level(Level::MostFatal))?;
        let len = file
            .metadata()
            .map_err(|e| RepairError::io(path, e).with_level(Level::MostFatal))?
            .len();

        // mmap пустого файла на части платформ — ошибка; просто читаем через pread.
        let mmap = if use_mmap && len > 0 {
            // SAFETY: файл открыт только на чтение; конкурентные записи других процессов
            // исключаются вызывающим через ReadLocker на время прохода.
            match unsafe { Mmap::map(&file) } {
                Ok(m) => Some(m),
                Err(e) => {
                    log::debug!("file: mmap failed, fallback to reads, path={}, err={}", path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            len,
            file: Mutex::new(file),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        self.mmap.is_some()
    }

    /// Прочитать до `size` байт с `offset`. Короче — только у конца файла.
    pub fn read(&self, offset: u64, size: usize) -> Result<Cow<'_, [u8]>> {
        if offset >= self.len {
            return Ok(Cow::Borrowed(&[]));
        }
        let avail = (self.len - offset).min(size as u64) as usize;

        if let Some(m) = &self.mmap {
            let start = offset as usize;
            return Ok(Cow::Borrowed(&m[start..start + avail]));
        }

        let mut buf = vec![0u8; avail];
        let mut f = self
            .file
            .lock()
            .map_err(|_| RepairError::format("file handle mutex poisoned").with_path(&self.path))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| RepairError::io(&self.path, e))?;
        f.read_exact(&mut buf)
            .map_err(|e| RepairError::io(&self.path, e))?;
        Ok(Cow::Owned(buf))
    }
}
