use anyhow::{Context, Result};
use std::path::PathBuf;

use SalvageDB::repair::TableFilter;
use SalvageDB::{Recovery, RepairConfig};

use crate::util::{print_report, progress_logger, table_filter};

/// CLI: retrieve — восстановление на месте. Исходный файл уходит в <path>.factory/.
pub fn exec(path: PathBuf, tables: Vec<String>, json: bool) -> Result<()> {
    let filter = table_filter(&tables);
    let filter: Option<TableFilter<'_>> = if tables.is_empty() { None } else { Some(&filter) };

    let mut recovery = Recovery::new(RepairConfig::from_env());
    let report = recovery
        .retrieve_report(&path, filter, progress_logger("retrieve"))
        .with_context(|| format!("retrieve {}", path.display()))?;
    print_report(&report, json)
}
