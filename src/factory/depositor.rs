//! factory/depositor — отложить текущее поколение БД в "<db>.factory/<unix_ms>/".

use std::fs;
use std::path::PathBuf;

use super::paths::{associated_paths, move_items};
use super::Factory;
use crate::error::{RepairError, Result};

/// Перенести БД и сопутствующие файлы в новый каталог поколения.
/// None — переносить нечего (БД нет).
pub fn deposit(factory: &Factory) -> Result<Option<PathBuf>> {
    if !factory.database().exists() {
        return Ok(None);
    }
    let dir = factory.unique_workshop_directory();
    fs::create_dir_all(&dir).map_err(|e| RepairError::io(&dir, e))?;
    let moved = move_items(&associated_paths(factory.database()), &dir)?;
    log::info!(
        "depositor: path={}, into={}, files={}",
        factory.database().display(),
        dir.display(),
        moved.len()
    );
    Ok(Some(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{now_unix_ms, with_suffix};

    #[test]
    fn deposit_moves_database_and_journals() {
        let dir = std::env::temp_dir().join(format!("salvage-deposit-{}-{}", std::process::id(), now_unix_ms()));
        fs::create_dir_all(&dir).unwrap();
        let db = dir.join("d.db");
        let factory = Factory::new(&db);
        assert!(deposit(&factory).unwrap().is_none());

        fs::write(&db, b"db").unwrap();
        fs::write(with_suffix(&db, "-first.material"), b"m").unwrap();
        let generation = deposit(&factory).unwrap().unwrap();
        assert!(!db.exists());
        assert!(generation.join("d.db").exists());
        assert!(generation.join("d.db-first.material").exists());
        assert_eq!(factory.deposited_databases().unwrap(), vec![generation.join("d.db")]);
        let _ = fs::remove_dir_all(&dir);
    }
}
