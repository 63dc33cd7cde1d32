#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod error;
pub mod config;
pub mod metrics;
pub mod util;   // src/util/mod.rs

// Чтение исходной БД (папки с mod.rs)
pub mod file;   // src/file/{mod,access,cache}.rs
pub mod wal;    // src/wal/{mod,header,checksum,reader}.rs
pub mod pager;  // src/pager/{mod,header}.rs
pub mod page;   // src/page/{mod,varint,record,cell,overflow,decode}.rs
pub mod crawl;  // src/crawl/{mod,crawler,master,sequence}.rs

// Сборка новой БД
pub mod repair; // src/repair/{mod,assembler,sqlite,score,repairman,full,mechanic}.rs

// Снимки и поколения
pub mod material; // src/material/{mod,codec,serialization}.rs
pub mod factory;  // src/factory/{mod,paths,backup,depositor,retriever,renewer}.rs

pub mod lock;
pub mod recovery;

// Удобные реэкспорты
pub use config::{RepairBuilder, RepairConfig};
pub use error::{ErrorKind, ErrorTracker, Level, RepairError, Result};
pub use factory::Factory;
pub use lock::{FileLocker, ReadLocker, SqliteLocker, WriteLocker};
pub use material::Material;
pub use metrics::snapshot as metrics_snapshot;
pub use pager::Pager;
pub use recovery::Recovery;
pub use repair::{Assembler, RepairReport, SqliteAssembler};
