//! factory/renewer — "чистая" БД из схемы и sequence всех известных material.
//!
//! prepare_renew: material живой БД и всех отложенных поколений сливаются
//! (первый встреченный DDL выигрывает, sequence — максимум), схема собирается в
//! renew/temp/<db>, снимается material, результат переезжает в renew/.
//! renew: если живой БД нет, подготовленная встаёт на её место.

use std::fs;
use std::path::{Path, PathBuf};

use super::backup::backup;
use super::paths::{associated_paths, move_items, pick_materials_for_deserializing, remove_items};
use super::Factory;
use crate::config::RepairConfig;
use crate::error::{ErrorKind, Level, RepairError, Result};
use crate::material::Material;
use crate::repair::repairman::aborts_pass;
use crate::repair::{Assembler, SqliteAssembler};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableInfo {
    name: String,
    sql: String,
    associated: Vec<String>,
    sequence: Option<i64>,
}

fn merge_material(infos: &mut Vec<TableInfo>, material: Material, from: &Path) {
    for c in material.contents {
        match infos.iter_mut().find(|i| i.name == c.table_name) {
            Some(info) => {
                if info.sql != c.sql {
                    log::info!("renewer: different sql for {} in {}, keeping the newer", c.table_name, from.display());
                }
                info.sequence = match (info.sequence, c.sequence) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            }
            None => infos.push(TableInfo {
                name: c.table_name,
                sql: c.sql,
                associated: c.associated,
                sequence: c.sequence,
            }),
        }
    }
}

/// Слить первый читаемый material БД. Битые слоты пропускаются.
fn resolve_infos(infos: &mut Vec<TableInfo>, db: &Path) -> Result<()> {
    let slots = pick_materials_for_deserializing(db)?;
    if slots.is_empty() {
        log::warn!("renewer: material not found for {}", db.display());
        return Ok(());
    }
    for path in slots {
        match Material::read_from(&path) {
            Ok(m) => {
                merge_material(infos, m, &path);
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::Io => return Err(e),
            Err(e) => log::warn!("renewer: material rejected, path={}, err={}", path.display(), e),
        }
    }
    log::info!("renewer: all materials of {} are corrupted", db.display());
    Ok(())
}

/// Подготовить renew/<db>. None — ни одного material, готовить нечего.
pub fn prepare_renew(factory: &Factory, config: &RepairConfig) -> Result<Option<PathBuf>> {
    let renew_dir = factory.renew_directory();
    let temp_dir = renew_dir.join("temp");
    remove_items(std::slice::from_ref(&temp_dir))?;
    fs::create_dir_all(&temp_dir).map_err(|e| RepairError::io(&temp_dir, e))?;

    let mut infos = Vec::new();
    resolve_infos(&mut infos, factory.database())?;
    for db in factory.deposited_databases()? {
        resolve_infos(&mut infos, &db)?;
    }
    if infos.is_empty() {
        remove_items(std::slice::from_ref(&renew_dir))?;
        factory.remove_directory_if_empty()?;
        return Ok(None);
    }

    let temp_db = temp_dir.join(factory.database_name());
    let mut assembler = SqliteAssembler::new(&temp_db);
    for info in &infos {
        if let Err(e) = assemble_info(&mut assembler, info) {
            if aborts_pass(&e) {
                return Err(e);
            }
            log::warn!("renewer: table {} skipped, err={}", info.name, e);
        }
    }
    assembler.finish()?;
    log::info!("renewer: prepared tables={}, path={}", infos.len(), temp_db.display());

    if fs::metadata(&temp_db).map(|m| m.len() > 0).unwrap_or(false) {
        backup(&temp_db, config, None, None)?;
    }

    let target = renew_dir.join(factory.database_name());
    remove_items(&associated_paths(&target))?;
    move_items(&associated_paths(&temp_db), &renew_dir)?;
    remove_items(std::slice::from_ref(&temp_dir))?;
    Ok(Some(target))
}

fn assemble_info(assembler: &mut SqliteAssembler, info: &TableInfo) -> Result<()> {
    assembler.mark_as_assembling(&info.name)?;
    let mut res = assembler.assemble_table(&info.sql, &info.associated);
    if res.is_ok() {
        if let Some(seq) = info.sequence {
            if let Err(e) = assembler.assemble_sequence(&info.name, seq) {
                log::warn!("renewer: sequence of {} lost, err={}", info.name, e);
            }
        }
    }
    let closed = assembler.mark_as_assembled();
    if res.is_ok() {
        res = closed;
    }
    res.map_err(|e| e.with_table(&info.name))
}

/// Поставить подготовленную БД на место живой.
/// Ok(false) — устанавливать нечего или живая БД уже есть (renew/ тогда удаляется).
pub fn renew(factory: &Factory) -> Result<bool> {
    let renew_dir = factory.renew_directory();
    let prepared = renew_dir.join(factory.database_name());
    if !prepared.exists() {
        factory.remove_directory_if_empty()?;
        return Ok(false);
    }
    if factory.database().exists() {
        log::warn!(
            "renewer: database already exists when renewing, path={}",
            factory.database().display()
        );
        remove_items(std::slice::from_ref(&renew_dir))?;
        factory.remove_directory_if_empty()?;
        return Ok(false);
    }

    remove_items(&associated_paths(factory.database()))?;
    let dir = match factory.database().parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    move_items(&associated_paths(&prepared), &dir).map_err(|e| e.with_level(Level::MostFatal))?;
    remove_items(std::slice::from_ref(&renew_dir))?;
    factory.remove_directory_if_empty()?;
    log::info!("renewer: installed path={}", factory.database().display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Content, MaterialInfo};

    fn content(name: &str, sql: &str, seq: Option<i64>) -> Content {
        Content {
            table_name: name.into(),
            root_page: 2,
            sql: sql.into(),
            sequence: seq,
            ..Default::default()
        }
    }

    #[test]
    fn merge_keeps_first_sql_and_max_sequence() {
        let mut infos = Vec::new();
        let mut newer = Material::new(MaterialInfo::default());
        newer.contents.push(content("a", "CREATE TABLE a(x, y)", Some(5)));
        let mut older = Material::new(MaterialInfo::default());
        older.contents.push(content("a", "CREATE TABLE a(x)", Some(9)));
        older.contents.push(content("b", "CREATE TABLE b(z)", None));

        merge_material(&mut infos, newer, Path::new("n"));
        merge_material(&mut infos, older, Path::new("o"));
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].sql, "CREATE TABLE a(x, y)");
        assert_eq!(infos[0].sequence, Some(9));
        assert_eq!(infos[1].name, "b");
    }
}
