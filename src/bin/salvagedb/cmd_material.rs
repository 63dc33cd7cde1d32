use anyhow::{Context, Result};
use std::path::PathBuf;

use SalvageDB::Material;

/// CLI: material — распечатать снимок.
pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let m = Material::read_from(&path).with_context(|| format!("read material {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&m)?);
        return Ok(());
    }
    println!("Material {}:", path.display());
    println!("  page_size      = {}", m.info.page_size);
    println!("  reserved_bytes = {}", m.info.reserved_bytes);
    println!("  wal            = salt {:08x}/{:08x}, frames {}", m.info.wal_salt1, m.info.wal_salt2, m.info.wal_frames);
    println!("  tables         = {}", m.contents.len());
    for c in &m.contents {
        let seq = c.sequence.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "  {:<32} root={:<6} pages={:<6} associated={} seq={}",
            c.table_name,
            c.root_page,
            c.pages.len(),
            c.associated.len(),
            seq
        );
    }
    Ok(())
}
