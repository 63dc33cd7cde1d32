use anyhow::{Context, Result};
use std::path::PathBuf;

use SalvageDB::repair::TableFilter;
use SalvageDB::{Material, Recovery, RepairConfig};

use crate::util::table_filter;

pub fn exec(path: PathBuf, tables: Vec<String>, json: bool) -> Result<()> {
    let filter = table_filter(&tables);
    let filter: Option<TableFilter<'_>> = if tables.is_empty() { None } else { Some(&filter) };

    let mut recovery = Recovery::new(RepairConfig::from_env());
    let written = recovery
        .deconstruct(&path, filter)
        .with_context(|| format!("deconstruct {}", path.display()))?;

    let Some(material_path) = written else {
        if json {
            println!("{{\"material\":null}}");
        } else {
            println!("Database is empty or missing, nothing written.");
        }
        return Ok(());
    };
    let material = Material::read_from(&material_path)?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "material": material_path,
                "tables": material.contents.len(),
                "pages": material.page_count(),
            })
        );
    } else {
        println!("Material written:");
        println!("  path   = {}", material_path.display());
        println!("  tables = {}", material.contents.len());
        println!("  pages  = {}", material.page_count());
    }
    Ok(())
}
