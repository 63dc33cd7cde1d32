//! factory/backup — снимок material для БД (deconstruct).
//!
//! Обход только по страницам (ячейки не декодируются): для каждой таблицы
//! запоминаются страницы с записями и их xxh32 (у WITHOUT ROWID это и interior
//! страницы индекса). Таблица с нечитаемым корнем в
//! снимок не попадает, её соберёт полный обход при восстановлении.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::paths::pick_material_for_overwriting;
use crate::config::RepairConfig;
use crate::crawl::{Catalog, CrawlMode, Crawler, MasterCrawler, MasterItem, SequenceCrawler};
use crate::error::{ErrorKind, ErrorTracker, Level, RepairError, Result};
use crate::material::{Content, Material, MaterialInfo, VerifiedPage};
use crate::pager::Pager;
use crate::repair::TableFilter;

/// Собрать material по открытому файлу.
pub fn build_material(
    pager: &Pager,
    filter: Option<TableFilter<'_>>,
    stop: Option<Arc<AtomicBool>>,
    tracker: &mut ErrorTracker,
) -> Result<Material> {
    let crawler = Crawler::new(pager).with_stop_flag(stop);
    let items = MasterCrawler::new(&crawler).work(tracker)?;
    let catalog = Catalog::from_items(&items);

    let salt = pager.wal_salt();
    let mut material = Material::new(MaterialInfo {
        page_size: pager.page_size(),
        reserved_bytes: pager.header().reserved_bytes as u32,
        wal_salt1: salt.salt1,
        wal_salt2: salt.salt2,
        wal_frames: pager.wal_frames(),
        sequence_root: catalog.sequence_root.unwrap_or(0),
    });

    let mut sequences = Vec::new();
    if let Some(root) = catalog.sequence_root {
        match SequenceCrawler::new(&crawler).work(root, tracker) {
            Ok(s) => sequences = s,
            Err(e) if e.kind() == ErrorKind::Interrupted => return Err(e),
            Err(e) => log::warn!("backup: sqlite_sequence unreadable, err={}", e),
        }
    }

    for table in &catalog.tables {
        if let Some(f) = filter {
            if !f(&table.name) {
                continue;
            }
        }
        let pages = match leaf_pages(&crawler, table, tracker)? {
            Some(p) => p,
            None => continue,
        };
        material.contents.push(Content {
            table_name: table.name.clone(),
            root_page: table.root_page,
            sql: table.sql.clone().unwrap_or_default(),
            associated: catalog.associated_of(&table.name).to_vec(),
            pages,
            sequence: sequences.iter().find(|s| s.name == table.name).map(|s| s.seq),
        });
    }
    log::info!(
        "backup: path={}, tables={}, pages={}",
        pager.path().display(),
        material.contents.len(),
        material.page_count()
    );
    Ok(material)
}

/// Страницы с записями в порядке обхода. None — корень не читается.
fn leaf_pages(crawler: &Crawler<'_>, table: &MasterItem, tracker: &mut ErrorTracker) -> Result<Option<Vec<VerifiedPage>>> {
    let mut pages = Vec::new();
    let mut local = ErrorTracker::new();
    let ok = crawler.crawl(
        table.root_page,
        CrawlMode::Pages,
        &mut local,
        |page, _| {
            if page.kind().carries_records() {
                pages.push(VerifiedPage { number: page.number(), hash: page.hash() });
            }
            true
        },
        |_| true,
    );
    let interrupted = local.has_kind(ErrorKind::Interrupted);
    let worst = local.worst().cloned();
    tracker.absorb(local);
    if interrupted {
        return Err(RepairError::interrupted().with_table(&table.name));
    }
    if !ok {
        log::warn!(
            "backup: table {} skipped, err={}",
            table.name,
            worst.map(|e| e.to_string()).unwrap_or_default()
        );
        return Ok(None);
    }
    Ok(Some(pages))
}

/// Снимок БД в свободный слот material. None — БД пуста или отсутствует.
pub fn backup(
    db: &Path,
    config: &RepairConfig,
    filter: Option<TableFilter<'_>>,
    stop: Option<Arc<AtomicBool>>,
) -> Result<Option<PathBuf>> {
    let pager = match Pager::open(db, config) {
        Ok(p) => p,
        Err(e) if e.kind() == ErrorKind::Empty => {
            log::info!("backup: nothing to back up, path={}", db.display());
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let mut tracker = ErrorTracker::new();
    let material = build_material(&pager, filter, stop, &mut tracker).map_err(|e| e.with_path(db))?;
    if tracker.level() >= Level::Fatal {
        log::warn!(
            "backup: material is partial, path={}, worst={}",
            db.display(),
            tracker.worst().map(|e| e.to_string()).unwrap_or_default()
        );
    }
    let target = pick_material_for_overwriting(db)?;
    material.write_to(&target, config.material_zstd)?;
    log::info!("backup: material written, path={}", target.display());
    Ok(Some(target))
}
