//! Блокировки исходной БД на время восстановления.
//!
//! Контракт: ReadLocker держится, пока идёт чтение исходного файла
//! (deconstruct, crawl_and_assemble); WriteLocker — пока восстановленный файл
//! подменяет исходный (retrieve, renew). Ошибка захвата прерывает операцию
//! как LockError уровня Fatal, повторов нет.
//!
//! Реализации (объекты вызывающей стороны; их ожидание — политика вызывающего,
//! сам движок зовёт acquire_lock ровно один раз):
//! - FileLocker: fs2 advisory lock на "<db>-lock" (shared для чтения, exclusive для записи);
//!   timeout 0 — одна попытка, иначе ожидание не дольше timeout;
//! - SqliteLocker: транзакция SQLite на самой БД (read — BEGIN + чтение каталога,
//!   write — BEGIN IMMEDIATE), timeout уходит в busy_timeout. Для файла с битым
//!   заголовком не подходит.
//!
//! Lock is released on Drop.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::consts::LOCK_SUFFIX;
use crate::util::with_suffix;

pub trait ReadLocker {
    fn acquire_lock(&mut self, path: &Path) -> Result<()>;
    fn release_lock(&mut self) -> Result<()>;
}

pub trait WriteLocker {
    fn acquire_lock(&mut self, path: &Path) -> Result<()>;
    fn release_lock(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub fn lock_file_path(db: &Path) -> PathBuf {
    with_suffix(db, LOCK_SUFFIX)
}

/// Одна попытка захвата. Err — уже занято или файл не открыть.
pub fn try_acquire_lock(db: &Path, mode: LockMode) -> Result<LockGuard> {
    let path = lock_file_path(db);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("try_lock_shared failed: {}", path.display()))?,
        LockMode::Exclusive => file
            .try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?,
    }
    Ok(LockGuard { file, path, mode })
}

/// Захват с ожиданием не дольше `timeout`. Duration::ZERO — одна попытка.
pub fn acquire_lock(db: &Path, mode: LockMode, timeout: Duration) -> Result<LockGuard> {
    let deadline = Instant::now() + timeout;
    loop {
        match try_acquire_lock(db, mode) {
            Ok(g) => return Ok(g),
            Err(e) if Instant::now() >= deadline => {
                return Err(e.context(format!("lock {:?} timed out after {:?}", mode, timeout)));
            }
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    }
}

/// fs2-блокировка на "<db>-lock".
pub struct FileLocker {
    timeout: Duration,
    guard: Option<LockGuard>,
}

impl FileLocker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            guard: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }

    fn lock(&mut self, path: &Path, mode: LockMode) -> Result<()> {
        if self.guard.is_some() {
            return Err(anyhow!("locker already holds {}", lock_file_path(path).display()));
        }
        let g = acquire_lock(path, mode, self.timeout)?;
        log::debug!("lock: {:?} acquired, path={}", mode, g.path().display());
        self.guard = Some(g);
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        if let Some(g) = self.guard.take() {
            g.file
                .unlock()
                .with_context(|| format!("unlock {}", g.path().display()))?;
            log::debug!("lock: {:?} released, path={}", g.mode(), g.path().display());
        }
        Ok(())
    }
}

impl Default for FileLocker {
    fn default() -> Self {
        Self::new(crate::config::RepairConfig::default().lock_timeout_ms)
    }
}

impl ReadLocker for FileLocker {
    fn acquire_lock(&mut self, path: &Path) -> Result<()> {
        self.lock(path, LockMode::Shared)
    }

    fn release_lock(&mut self) -> Result<()> {
        self.unlock()
    }
}

impl WriteLocker for FileLocker {
    fn acquire_lock(&mut self, path: &Path) -> Result<()> {
        self.lock(path, LockMode::Exclusive)
    }

    fn release_lock(&mut self) -> Result<()> {
        self.unlock()
    }
}

/// Блокировка средствами самой SQLite: пока транзакция открыта,
/// другие соединения не могут писать (read) или начать запись (write).
pub struct SqliteLocker {
    timeout: Duration,
    conn: Option<rusqlite::Connection>,
}

impl SqliteLocker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            conn: None,
        }
    }

    fn open(&mut self, path: &Path, begin: &str) -> Result<()> {
        if self.conn.is_some() {
            return Err(anyhow!("locker already holds {}", path.display()));
        }
        let conn = rusqlite::Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        conn.busy_timeout(self.timeout)?;
        conn.execute_batch(begin)
            .with_context(|| format!("{} on {}", begin, path.display()))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.execute_batch("ROLLBACK").context("rollback lock transaction")?;
            conn.close().map_err(|(_, e)| anyhow!(e)).context("close lock connection")?;
        }
        Ok(())
    }
}

impl ReadLocker for SqliteLocker {
    fn acquire_lock(&mut self, path: &Path) -> Result<()> {
        // BEGIN откладывает захват до первого чтения
        self.open(path, "BEGIN; SELECT count(*) FROM sqlite_master;")
    }

    fn release_lock(&mut self) -> Result<()> {
        self.close()
    }
}

impl WriteLocker for SqliteLocker {
    fn acquire_lock(&mut self, path: &Path) -> Result<()> {
        self.open(path, "BEGIN IMMEDIATE;")
    }

    fn release_lock(&mut self) -> Result<()> {
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_db(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("salvage-lock-{}-{}-{}", name, std::process::id(), crate::util::now_unix_ms()))
    }

    #[test]
    fn exclusive_excludes_shared() {
        let db = unique_db("excl");
        let w = try_acquire_lock(&db, LockMode::Exclusive).unwrap();
        assert!(try_acquire_lock(&db, LockMode::Shared).is_err());
        drop(w);
        let r1 = try_acquire_lock(&db, LockMode::Shared).unwrap();
        let _r2 = try_acquire_lock(&db, LockMode::Shared).unwrap();
        assert!(try_acquire_lock(&db, LockMode::Exclusive).is_err());
        drop(r1);
        let _ = std::fs::remove_file(lock_file_path(&db));
    }

    #[test]
    fn default_locker_tries_once() {
        let db = unique_db("once");
        let _held = try_acquire_lock(&db, LockMode::Exclusive).unwrap();
        let mut reader = FileLocker::default();
        let started = std::time::Instant::now();
        assert!(ReadLocker::acquire_lock(&mut reader, &db).is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!reader.is_locked());
        let _ = std::fs::remove_file(lock_file_path(&db));
    }

    #[test]
    fn file_locker_times_out() {
        let db = unique_db("timeout");
        let mut writer = FileLocker::new(50);
        WriteLocker::acquire_lock(&mut writer, &db).unwrap();
        let mut reader = FileLocker::new(50);
        assert!(ReadLocker::acquire_lock(&mut reader, &db).is_err());
        assert!(!reader.is_locked());
        WriteLocker::release_lock(&mut writer).unwrap();
        assert!(!writer.is_locked());
        ReadLocker::acquire_lock(&mut reader, &db).unwrap();
        assert!(reader.is_locked());
        ReadLocker::release_lock(&mut reader).unwrap();
        let _ = std::fs::remove_file(lock_file_path(&db));
    }
}
