//! factory — каталог "<db>.factory/" и операции над поколениями БД.
//!
//! Раскладка:
//!   <db>.factory/restore/    — сюда собирается восстановленная БД (retrieve);
//!   <db>.factory/renew/      — схема+sequence, ждущая установки (prepare_renew → renew);
//!   <db>.factory/<unix_ms>/  — отложенные поколения (deposit): старая БД с журналами и material.
//!
//! Подмодули:
//! - paths.rs     — сопутствующие файлы, слоты material, перенос;
//! - backup.rs    — снимок material (deconstruct);
//! - depositor.rs — отложить текущее поколение;
//! - retriever.rs — восстановление с подменой файла;
//! - renewer.rs   — подготовка и установка renew.

pub mod backup;
pub mod depositor;
pub mod paths;
pub mod renewer;
pub mod retriever;

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::{FACTORY_SUFFIX, RENEW_DIR, RESTORE_DIR};
use crate::error::{RepairError, Result};
use crate::util::{now_unix_ms, with_suffix};

pub use backup::{backup, build_material};
pub use depositor::deposit;
pub use paths::{pick_material_for_overwriting, pick_materials_for_deserializing};
pub use renewer::{prepare_renew, renew};
pub use retriever::Retriever;

#[derive(Debug, Clone)]
pub struct Factory {
    database: PathBuf,
    directory: PathBuf,
}

impl Factory {
    pub fn new(database: &Path) -> Self {
        Self {
            database: database.to_path_buf(),
            directory: with_suffix(database, FACTORY_SUFFIX),
        }
    }

    /// Factory по пути её каталога ("<db>.factory").
    pub fn from_directory(directory: &Path) -> Result<Self> {
        let name = directory
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RepairError::usage(format!("bad factory path {}", directory.display())))?;
        let db_name = name.strip_suffix(FACTORY_SUFFIX).ok_or_else(|| {
            RepairError::usage(format!("{} does not end with {}", directory.display(), FACTORY_SUFFIX))
        })?;
        Ok(Self {
            database: directory.with_file_name(db_name),
            directory: directory.to_path_buf(),
        })
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn database_name(&self) -> OsString {
        self.database.file_name().map(|n| n.to_os_string()).unwrap_or_default()
    }

    pub fn restore_directory(&self) -> PathBuf {
        self.directory.join(RESTORE_DIR)
    }

    pub fn renew_directory(&self) -> PathBuf {
        self.directory.join(RENEW_DIR)
    }

    fn is_workshop(name: &str) -> bool {
        name != RESTORE_DIR && name != RENEW_DIR
    }

    /// Каталоги отложенных поколений, новые первыми.
    pub fn workshop_directories(&self) -> Result<Vec<PathBuf>> {
        let rd = match fs::read_dir(&self.directory) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepairError::io(&self.directory, e)),
        };
        let mut dirs = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|e| RepairError::io(&self.directory, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() && Self::is_workshop(&name) {
                dirs.push((name.parse::<u64>().unwrap_or(0), name, path));
            }
        }
        dirs.sort_by(|a, b| (b.0, &b.1).cmp(&(a.0, &a.1)));
        Ok(dirs.into_iter().map(|(_, _, p)| p).collect())
    }

    /// БД в отложенных поколениях (только существующие), новые первыми.
    pub fn deposited_databases(&self) -> Result<Vec<PathBuf>> {
        let name = self.database_name();
        Ok(self
            .workshop_directories()?
            .into_iter()
            .map(|d| d.join(&name))
            .filter(|p| p.exists())
            .collect())
    }

    pub fn contains_deposited(&self) -> bool {
        self.deposited_databases().map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Новый каталог поколения "<unix_ms>" (время сдвигается, пока имя занято).
    pub fn unique_workshop_directory(&self) -> PathBuf {
        let mut ms = now_unix_ms();
        loop {
            let p = self.directory.join(ms.to_string());
            if !p.exists() {
                return p;
            }
            ms += 1;
        }
    }

    pub fn remove_deposited(&self) -> Result<()> {
        paths::remove_items(&self.workshop_directories()?)?;
        self.remove_directory_if_empty()
    }

    /// Каталог удаляется, если в нём нет подкаталогов кроме restore/.
    pub fn remove_directory_if_empty(&self) -> Result<()> {
        let rd = match fs::read_dir(&self.directory) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RepairError::io(&self.directory, e)),
        };
        for entry in rd {
            let entry = entry.map_err(|e| RepairError::io(&self.directory, e))?;
            if entry.path().is_dir() && entry.file_name() != RESTORE_DIR {
                return Ok(());
            }
        }
        fs::remove_dir_all(&self.directory).map_err(|e| RepairError::io(&self.directory, e))
    }
}
