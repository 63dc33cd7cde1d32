//! factory/paths — файлы, сопутствующие БД, слоты material и перенос файлов.
//!
//! Сопутствующие файлы "<db>": -journal, -wal, -shm, -first.material, -last.material.
//! Перенос идёт с конца списка: БД переезжает последней, так что прерванный
//! перенос не оставляет её без material.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::consts::{FIRST_MATERIAL_SUFFIX, LAST_MATERIAL_SUFFIX, WAL_SUFFIX};
use crate::error::{RepairError, Result};
use crate::util::with_suffix;

pub fn first_material_path(db: &Path) -> PathBuf {
    with_suffix(db, FIRST_MATERIAL_SUFFIX)
}

pub fn last_material_path(db: &Path) -> PathBuf {
    with_suffix(db, LAST_MATERIAL_SUFFIX)
}

/// Сама БД и её журналы.
pub fn database_paths(db: &Path) -> Vec<PathBuf> {
    vec![
        db.to_path_buf(),
        with_suffix(db, "-journal"),
        with_suffix(db, WAL_SUFFIX),
        with_suffix(db, "-shm"),
    ]
}

/// БД, журналы и оба слота material.
pub fn associated_paths(db: &Path) -> Vec<PathBuf> {
    let mut v = database_paths(db);
    v.push(first_material_path(db));
    v.push(last_material_path(db));
    v
}

/// mtime файла; None — файла нет или он пустой.
fn modified_if_present(path: &Path) -> Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(md) if md.len() == 0 => Ok(None),
        Ok(md) => Ok(Some(md.modified().map_err(|e| RepairError::io(path, e))?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RepairError::io(path, e)),
    }
}

/// Слот для новой записи: пустой/отсутствующий first, затем last,
/// иначе более старый из двух. mtime из будущего считается старым.
pub fn pick_material_for_overwriting(db: &Path) -> Result<PathBuf> {
    let now = SystemTime::now();
    let first = first_material_path(db);
    let first_time = match modified_if_present(&first)? {
        Some(t) if t <= now => t,
        _ => return Ok(first),
    };
    let last = last_material_path(db);
    let last_time = match modified_if_present(&last)? {
        Some(t) if t <= now => t,
        _ => return Ok(last),
    };
    Ok(if first_time > last_time { last } else { first })
}

/// Существующие непустые слоты, новые первыми.
pub fn pick_materials_for_deserializing(db: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for slot in [first_material_path(db), last_material_path(db)] {
        if let Some(t) = modified_if_present(&slot)? {
            found.push((t, slot));
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

pub fn remove_items(paths: &[PathBuf]) -> Result<()> {
    for p in paths.iter().rev() {
        let res = if p.is_dir() { fs::remove_dir_all(p) } else { fs::remove_file(p) };
        match res {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RepairError::io(p, e)),
        }
    }
    Ok(())
}

/// Перенести существующие файлы в каталог `dir` под теми же именами.
pub fn move_items(paths: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| RepairError::io(dir, e))?;
    let mut moved = Vec::new();
    for p in paths.iter().rev() {
        if !p.exists() {
            continue;
        }
        let name = p
            .file_name()
            .ok_or_else(|| RepairError::usage(format!("path without file name: {}", p.display())))?;
        let target = dir.join(name);
        fs::rename(p, &target).map_err(|e| RepairError::io(p, e))?;
        moved.push(target);
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn unique_dir(name: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!(
            "salvage-paths-{}-{}-{}",
            name,
            std::process::id(),
            crate::util::now_unix_ms()
        ));
        fs::create_dir_all(&d).unwrap();
        d
    }

    fn touch(path: &Path, mtime: SystemTime) {
        fs::write(path, b"m").unwrap();
        File::options().write(true).open(path).unwrap().set_modified(mtime).unwrap();
    }

    #[test]
    fn slots_rotate_by_age() {
        let dir = unique_dir("rotate");
        let db = dir.join("a.db");
        assert_eq!(pick_material_for_overwriting(&db).unwrap(), first_material_path(&db));

        let now = SystemTime::now();
        touch(&first_material_path(&db), now - Duration::from_secs(60));
        assert_eq!(pick_material_for_overwriting(&db).unwrap(), last_material_path(&db));

        touch(&last_material_path(&db), now - Duration::from_secs(30));
        assert_eq!(pick_material_for_overwriting(&db).unwrap(), first_material_path(&db));
        assert_eq!(
            pick_materials_for_deserializing(&db).unwrap(),
            vec![last_material_path(&db), first_material_path(&db)]
        );

        // время из будущего — слот переписывается
        touch(&last_material_path(&db), now + Duration::from_secs(3600));
        assert_eq!(pick_material_for_overwriting(&db).unwrap(), last_material_path(&db));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn move_skips_missing_files() {
        let dir = unique_dir("move");
        let db = dir.join("b.db");
        fs::write(&db, b"x").unwrap();
        fs::write(with_suffix(&db, "-wal"), b"w").unwrap();
        let target = dir.join("gen");
        let moved = move_items(&associated_paths(&db), &target).unwrap();
        assert_eq!(moved.len(), 2);
        assert!(target.join("b.db").exists());
        assert!(!db.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
