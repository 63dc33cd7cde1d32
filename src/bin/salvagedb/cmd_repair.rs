use anyhow::{Context, Result};
use std::path::PathBuf;

use SalvageDB::repair::TableFilter;
use SalvageDB::{RepairConfig, Recovery};

use crate::util::{print_report, progress_logger, table_filter};

/// CLI: repair — полный обход source, сборка в dest (dest не должен быть source).
pub fn exec(
    source: PathBuf,
    dest: PathBuf,
    tables: Vec<String>,
    skip_wal: bool,
    milestone: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut cfg = RepairConfig::from_env().with_skip_wal(skip_wal);
    if let Some(n) = milestone {
        cfg = cfg.with_milestone_interval(n);
    }
    let filter = table_filter(&tables);
    let filter: Option<TableFilter<'_>> = if tables.is_empty() { None } else { Some(&filter) };

    let mut recovery = Recovery::new(cfg);
    let report = recovery
        .crawl_and_assemble_report(&source, &dest, filter, progress_logger("repair"))
        .with_context(|| format!("repair {} -> {}", source.display(), dest.display()))?;
    print_report(&report, json)
}
