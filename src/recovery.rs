//! Recovery — вызывающая сторона движка.
//!
//! Операции:
//! - deconstruct(db, filter)            — material в свободный слот (под ReadLocker);
//! - crawl_and_assemble(src, dst, cb)   — полный обход src в новую БД dst, итог — score;
//! - retrieve(db, cb)                   — восстановление на месте через factory;
//! - prepare_renew(db) / renew(dir)     — схема+sequence из material и её установка.
//!
//! Ошибка захвата блокировки — LockError уровня Fatal, операция не выполняется.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RepairConfig;
use crate::error::{RepairError, Result};
use crate::factory::{self, Factory, Retriever};
use crate::lock::{FileLocker, ReadLocker, WriteLocker};
use crate::pager::Pager;
use crate::repair::{Assembler, FullCrawler, Progress, RepairReport, Repairman, SqliteAssembler, TableFilter};

pub struct Recovery {
    config: RepairConfig,
    read_locker: Box<dyn ReadLocker>,
    write_locker: Box<dyn WriteLocker>,
    stop: Arc<AtomicBool>,
}

impl Recovery {
    pub fn new(config: RepairConfig) -> Self {
        let timeout = config.lock_timeout_ms;
        Self {
            config,
            read_locker: Box::new(FileLocker::new(timeout)),
            write_locker: Box::new(FileLocker::new(timeout)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_lockers(mut self, read: Box<dyn ReadLocker>, write: Box<dyn WriteLocker>) -> Self {
        self.read_locker = read;
        self.write_locker = write;
        self
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Флаг остановки: выставленный из другого потока, прерывает текущий проход.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn with_read_lock<T>(&mut self, db: &Path, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.read_locker
            .acquire_lock(db)
            .map_err(|e| RepairError::lock(format!("{:#}", e)).with_path(db))?;
        let out = op(self);
        if let Err(e) = self.read_locker.release_lock() {
            log::warn!("recovery: release read lock failed, path={}, err={:#}", db.display(), e);
        }
        out
    }

    /// Снимок material. None — БД пуста или её нет (это не ошибка).
    pub fn deconstruct(&mut self, db: &Path, filter: Option<TableFilter<'_>>) -> Result<Option<PathBuf>> {
        self.stop.store(false, Ordering::Relaxed);
        self.with_read_lock(db, |this| factory::backup(db, &this.config, filter, Some(this.stop.clone())))
    }

    pub fn crawl_and_assemble(
        &mut self,
        source: &Path,
        destination: &Path,
        progress: impl FnMut(f64, f64) -> bool,
    ) -> Result<f64> {
        self.crawl_and_assemble_report(source, destination, None, progress)
            .map(|r| r.score)
    }

    pub fn crawl_and_assemble_report(
        &mut self,
        source: &Path,
        destination: &Path,
        filter: Option<TableFilter<'_>>,
        progress: impl FnMut(f64, f64) -> bool,
    ) -> Result<RepairReport> {
        self.stop.store(false, Ordering::Relaxed);
        self.with_read_lock(source, |this| {
            let pager = Pager::open(source, &this.config)?;
            let mut repairman = Repairman::new(&pager, this.config.clone())
                .with_stop_flag(Some(this.stop.clone()))
                .with_progress(Progress::with_callback(progress));
            let mut assembler = SqliteAssembler::new(destination);
            FullCrawler::new(&mut repairman).with_filter(filter).work(&mut assembler)?;
            assembler.finish()?;
            let report = repairman.report(source, destination);
            log::info!(
                "recovery: crawl_and_assemble source={}, dest={}, score={:.4}, level={}",
                source.display(),
                destination.display(),
                report.score,
                report.level
            );
            Ok(report)
        })
    }

    pub fn retrieve(&mut self, db: &Path, progress: impl FnMut(f64, f64) -> bool) -> Result<f64> {
        self.retrieve_report(db, None, progress).map(|r| r.score)
    }

    pub fn retrieve_report(
        &mut self,
        db: &Path,
        filter: Option<TableFilter<'_>>,
        progress: impl FnMut(f64, f64) -> bool,
    ) -> Result<RepairReport> {
        self.stop.store(false, Ordering::Relaxed);
        let mut retriever = Retriever::new(Factory::new(db), self.config.clone())
            .with_filter(filter)
            .with_stop_flag(Some(self.stop.clone()))
            .with_progress(progress);
        retriever.work(self.write_locker.as_mut())
    }

    /// Подготовить renew/ по всем material БД и её поколений.
    pub fn prepare_renew(&mut self, db: &Path) -> Result<Option<PathBuf>> {
        factory::prepare_renew(&Factory::new(db), &self.config)
    }

    /// Установить подготовленную БД. Ok(false) — нечего устанавливать.
    pub fn renew(&mut self, factory_dir: &Path) -> Result<bool> {
        let factory = Factory::from_directory(factory_dir)?;
        let db = factory.database().to_path_buf();
        self.write_locker
            .acquire_lock(&db)
            .map_err(|e| RepairError::lock(format!("{:#}", e)).with_path(&db))?;
        let out = factory::renew(&factory);
        if let Err(e) = self.write_locker.release_lock() {
            log::warn!("recovery: release write lock failed, path={}, err={:#}", db.display(), e);
        }
        out
    }
}

impl Default for Recovery {
    fn default() -> Self {
        Self::new(RepairConfig::from_env())
    }
}
