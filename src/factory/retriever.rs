//! factory/retriever — восстановление БД "на месте".
//!
//! Порядок:
//!   1) restore/ пересоздаётся;
//!   2) источники: живая БД, затем отложенные поколения (новые первыми);
//!      вес источника = доля его файлов в общем размере;
//!   3) для каждого источника: свежий читаемый material → Mechanic, затем FullCrawler
//!      (Ignore, если material был или источник не первый). После удачного material
//!      полный обход идёт только по таблицам, которые Mechanic не собрал целиком,
//!      и по таблицам каталога, которых в material нет. Score источника — среднее
//!      по таблицам, у каждой берётся лучший из двух проходов;
//!   4) снимок material для собранной БД;
//!   5) под WriteLocker: живая БД откладывается, собранная переезжает на её место;
//!   6) если худший уровень ниже Fatal, отложенные поколения удаляются.
//!
//! Все источники пишут в один SqliteAssembler.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::backup::backup;
use super::depositor::deposit;
use super::paths::{associated_paths, database_paths, move_items, pick_materials_for_deserializing, remove_items};
use super::Factory;
use crate::config::RepairConfig;
use crate::error::{ErrorKind, Level, RepairError, Result};
use crate::lock::WriteLocker;
use crate::material::Material;
use crate::pager::Pager;
use crate::repair::repairman::aborts_pass;
use crate::repair::{
    Assembler, Conflict, FullCrawler, Mechanic, Progress, RepairReport, Repairman, SqliteAssembler, TableFilter,
};

type ProgressFn<'p> = Box<dyn FnMut(f64, f64) -> bool + 'p>;

#[derive(Debug, Clone)]
struct Source {
    path: PathBuf,
    weight: f64,
    primary: bool,
}

pub struct Retriever<'p> {
    factory: Factory,
    config: RepairConfig,
    filter: Option<TableFilter<'p>>,
    stop: Option<Arc<AtomicBool>>,
    progress: Option<ProgressFn<'p>>,
}

impl<'p> Retriever<'p> {
    pub fn new(factory: Factory, config: RepairConfig) -> Self {
        Self {
            factory,
            config,
            filter: None,
            stop: None,
            progress: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<TableFilter<'p>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_stop_flag(mut self, stop: Option<Arc<AtomicBool>>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, callback: impl FnMut(f64, f64) -> bool + 'p) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn restored_database(&self) -> PathBuf {
        self.factory.restore_directory().join(self.factory.database_name())
    }

    pub fn work(&mut self, locker: &mut dyn WriteLocker) -> Result<RepairReport> {
        let db = self.factory.database().to_path_buf();
        let restore_dir = self.factory.restore_directory();
        remove_items(std::slice::from_ref(&restore_dir))?;
        fs::create_dir_all(&restore_dir).map_err(|e| RepairError::io(&restore_dir, e))?;
        let restored = self.restored_database();

        let sources = self.sources()?;
        if sources.is_empty() {
            self.factory.remove_directory_if_empty()?;
            return Err(RepairError::empty(&db));
        }
        log::info!("retriever: path={}, sources={}", db.display(), sources.len());

        let mut report = RepairReport::new(&db, &db);
        let mut score = 0.0;
        let mut base = 0.0;
        let mut assembler = SqliteAssembler::new(&restored);
        for source in &sources {
            let outcome = retrieve_source(
                &self.config,
                self.filter,
                self.stop.clone(),
                &mut self.progress,
                source,
                base,
                &mut assembler,
            );
            match outcome {
                Ok((s, r)) => {
                    log::info!(
                        "retriever: source={}, weight={:.3}, score={:.4}",
                        source.path.display(),
                        source.weight,
                        s
                    );
                    score += source.weight * s;
                    report.absorb(r);
                }
                Err(e) if aborts_pass(&e) => {
                    let _ = self.factory.remove_directory_if_empty();
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("retriever: source {} skipped, err={}", source.path.display(), e);
                    report.record(e);
                }
            }
            base += source.weight;
        }
        assembler.finish()?;

        report.score = score.min(1.0);
        if report.score <= 0.0 {
            let _ = self.factory.remove_directory_if_empty();
            return Err(RepairError::corruption("nothing was retrieved")
                .with_path(&db)
                .with_level(Level::Fatal));
        }
        if !restored.exists() {
            // ни одной таблицы: пустой файл — корректная пустая БД
            fs::File::create(&restored).map_err(|e| RepairError::io(&restored, e))?;
        }

        backup(&restored, &self.config, None, self.stop.clone())?;

        locker
            .acquire_lock(&db)
            .map_err(|e| RepairError::lock(format!("{:#}", e)).with_path(&db))?;
        let swapped = self.swap(&restored);
        if let Err(e) = locker.release_lock() {
            log::warn!("retriever: release lock failed, path={}, err={:#}", db.display(), e);
        }
        swapped?;

        if report.level < Level::Fatal {
            self.factory.remove_deposited()?;
        }
        self.factory.remove_directory_if_empty()?;
        log::info!(
            "retriever: done path={}, score={:.4}, level={}",
            db.display(),
            report.score,
            report.level
        );
        Ok(report)
    }

    fn sources(&self) -> Result<Vec<Source>> {
        let mut found = Vec::new();
        if self.factory.database().exists() {
            found.push((self.factory.database().to_path_buf(), true));
        }
        for p in self.factory.deposited_databases()? {
            found.push((p, false));
        }
        let sizes: Vec<u64> = found.iter().map(|(p, _)| files_size(p)).collect();
        let total: u64 = sizes.iter().sum();
        let n = found.len().max(1) as f64;
        Ok(found
            .into_iter()
            .zip(sizes)
            .map(|((path, primary), size)| Source {
                path,
                weight: if total == 0 { 1.0 / n } else { size as f64 / total as f64 },
                primary,
            })
            .collect())
    }

    /// Живая БД уходит в новое поколение, собранная встаёт на её место.
    fn swap(&self, restored: &Path) -> Result<()> {
        deposit(&self.factory)?;
        let dir = match self.factory.database().parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        move_items(&associated_paths(restored), &dir)?;
        Ok(())
    }
}

fn files_size(db: &Path) -> u64 {
    database_paths(db)
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// Прогресс прохода внутри отрезка [start, start + span] общего прогресса.
fn scaled<'s, 'p>(progress: &'s mut Option<ProgressFn<'p>>, start: f64, span: f64) -> Progress<'s> {
    Progress::with_callback(move |value, increment| match progress.as_mut() {
        Some(cb) => cb(start + value * span, increment * span),
        None => true,
    })
}

/// Первый читаемый material источника, новые первыми.
fn load_material(db: &Path) -> Result<Option<(PathBuf, Material)>> {
    for path in pick_materials_for_deserializing(db)? {
        match Material::read_from(&path) {
            Ok(m) => return Ok(Some((path, m))),
            Err(e) if e.kind() == ErrorKind::Io => return Err(e),
            Err(e) => log::warn!("retriever: material rejected, path={}, err={}", path.display(), e),
        }
    }
    Ok(None)
}

fn retrieve_source(
    config: &RepairConfig,
    filter: Option<TableFilter<'_>>,
    stop: Option<Arc<AtomicBool>>,
    progress: &mut Option<ProgressFn<'_>>,
    source: &Source,
    base: f64,
    assembler: &mut SqliteAssembler,
) -> Result<(f64, RepairReport)> {
    let destination = assembler.path().to_path_buf();
    let material = load_material(&source.path).map_err(|e| e.with_level(Level::Fatal))?;
    if material.is_none() {
        log::warn!("retriever: no material for {}", source.path.display());
    }
    let assumed = material
        .as_ref()
        .map(|(_, m)| (m.info.page_size, m.info.reserved_bytes.min(u8::MAX as u32) as u8));
    let pager = match Pager::open_assuming(&source.path, config, assumed) {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::Empty => {
            return Ok((0.0, RepairReport::new(&source.path, &destination)));
        }
        Err(e) => return Err(e.with_level(Level::Fatal)),
    };
    let conflict = if source.primary { Conflict::Replace } else { Conflict::Ignore };
    let span = if material.is_some() { source.weight / 2.0 } else { source.weight };

    let mut report: Option<RepairReport> = None;
    let mut mechanic_score = 0.0;
    let mut mechanic_tables: Vec<(String, f64)> = Vec::new();
    if let Some((path, m)) = &material {
        let mut rm = Repairman::new(&pager, config.clone())
            .with_stop_flag(stop.clone())
            .with_progress(scaled(progress, base, span));
        let worked = Mechanic::new(&mut rm).with_conflict(conflict).work(m, assembler);
        mechanic_tables = rm.table_scores().to_vec();
        match worked {
            Ok(fallback) => {
                mechanic_score = rm.score();
                let mut r = rm.report(&source.path, &destination);
                r.material = Some(path.clone());
                r.fallback_tables = fallback;
                report = Some(r);
            }
            Err(e) if aborts_pass(&e) => return Err(e),
            Err(e) => {
                log::warn!("retriever: material unusable, path={}, err={}", path.display(), e);
                let mut r = rm.report(&source.path, &destination);
                r.record(e);
                report = Some(r);
            }
        }
    }
    let used_material = report.as_ref().map(|r| r.material.is_some()).unwrap_or(false);
    let fallback: Vec<String> = report.as_ref().map(|r| r.fallback_tables.clone()).unwrap_or_default();
    let in_material: Vec<&str> = match &material {
        Some((_, m)) if used_material => m.contents.iter().map(|c| c.table_name.as_str()).collect(),
        _ => Vec::new(),
    };
    let remaining_fn = |name: &str| {
        filter.map(|f| f(name)).unwrap_or(true)
            && (fallback.iter().any(|t| t == name) || !in_material.iter().any(|t| *t == name))
    };
    let remaining: TableFilter<'_> = &remaining_fn;

    let full_start = if material.is_some() { base + span } else { base };
    let mut rm = Repairman::new(&pager, config.clone())
        .with_stop_flag(stop)
        .with_progress(scaled(progress, full_start, span));
    assembler.set_conflict(if used_material { Conflict::Ignore } else { conflict });
    FullCrawler::new(&mut rm).with_filter(Some(remaining)).work(assembler)?;
    if used_material {
        log::info!(
            "retriever: material covered {} tables, full crawl took {}",
            in_material.len(),
            rm.table_scores().len()
        );
    }
    let score = combine_scores(&[mechanic_tables.as_slice(), rm.table_scores()], mechanic_score.max(rm.score()));
    let full = rm.report(&source.path, &destination);
    let report = match report {
        Some(mut r) => {
            r.absorb(full);
            r
        }
        None => full,
    };
    Ok((score, report))
}

/// Среднее по таблицам источника, у каждой — лучший результат из проходов.
/// Без таблиц остаётся `otherwise` (score пустой или нечитаемой БД).
fn combine_scores(passes: &[&[(String, f64)]], otherwise: f64) -> f64 {
    let mut best: BTreeMap<&str, f64> = BTreeMap::new();
    for pass in passes {
        for (table, fraction) in pass.iter() {
            let e = best.entry(table.as_str()).or_insert(0.0);
            *e = e.max(*fraction);
        }
    }
    if best.is_empty() {
        return otherwise;
    }
    (best.values().sum::<f64>() / best.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(items: &[(&str, f64)]) -> Vec<(String, f64)> {
        items.iter().map(|(t, f)| (t.to_string(), *f)).collect()
    }

    #[test]
    fn table_takes_the_better_pass() {
        let mechanic = scores(&[("a", 1.0), ("b", 0.5)]);
        let full = scores(&[("b", 1.0), ("c", 0.25)]);
        let s = combine_scores(&[mechanic.as_slice(), full.as_slice()], 0.0);
        assert!((s - 0.75).abs() < 1e-9);
    }

    #[test]
    fn no_tables_keeps_pass_score() {
        assert_eq!(combine_scores(&[], 1.0), 1.0);
        let only = scores(&[("a", 0.5)]);
        assert_eq!(combine_scores(&[only.as_slice()], 1.0), 0.5);
    }
}
