use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use SalvageDB::crawl::{Crawler, MasterCrawler, MasterItem};
use SalvageDB::pager::{DbHeader, Pager};
use SalvageDB::{ErrorTracker, RepairConfig};

#[derive(Serialize)]
struct Inspection<'a> {
    path: &'a PathBuf,
    header: &'a DbHeader,
    page_count: u32,
    file_size: u64,
    wal_frames_valid: u32,
    wal_frames_disposed: u32,
    wal_error: Option<String>,
    catalog: Vec<MasterItem>,
    catalog_error: Option<String>,
}

/// CLI: inspect — заголовок, WAL и каталог без сборки.
pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let cfg = RepairConfig::from_env();
    let pager = Pager::open(&path, &cfg).with_context(|| format!("open {}", path.display()))?;

    let crawler = Crawler::new(&pager);
    let mut tracker = ErrorTracker::new();
    let (catalog, catalog_error) = match MasterCrawler::new(&crawler).work(&mut tracker) {
        Ok(items) => (items, None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };

    let out = Inspection {
        path: &path,
        header: pager.header(),
        page_count: pager.page_count(),
        file_size: pager.file_size(),
        wal_frames_valid: pager.wal().map(|w| w.valid_frames()).unwrap_or(0),
        wal_frames_disposed: pager.wal().map(|w| w.disposed_frames()).unwrap_or(0),
        wal_error: pager.wal_error().map(|e| e.to_string()),
        catalog,
        catalog_error,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Database:");
    println!("  path        = {}", out.path.display());
    println!("  page_size   = {}", out.header.page_size);
    println!("  reserved    = {}", out.header.reserved_bytes);
    println!("  encoding    = {:?}", out.header.encoding);
    println!("  page_count  = {} (header says {})", out.page_count, out.header.page_count);
    println!("  file_size   = {}", out.file_size);
    println!("WAL:");
    println!("  frames      = {} valid, {} disposed", out.wal_frames_valid, out.wal_frames_disposed);
    if let Some(e) = &out.wal_error {
        println!("  disposed    = {}", e);
    }
    println!("Catalog ({} items):", out.catalog.len());
    for item in &out.catalog {
        println!("  {:<8} {:<32} root={}", item.kind, item.name, item.root_page);
    }
    if let Some(e) = &out.catalog_error {
        println!("  error: {}", e);
    }
    if tracker.total() > 0 {
        println!("Errors: {} (worst level {})", tracker.total(), tracker.level());
    }
    Ok(())
}
