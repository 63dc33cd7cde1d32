// tests/lockers.rs
//
// ReadLocker/WriteLocker: отказ захвата прерывает операцию как LockError.
//   cargo test --test lockers -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use SalvageDB::lock::{acquire_lock, LockMode};
use SalvageDB::{ErrorKind, Factory, Level, ReadLocker, Recovery, RepairBuilder, SqliteLocker, WriteLocker};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("salvagetest-lockers-{prefix}-{pid}-{t}-{id}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn build_fixture(path: &Path) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT);")?;
    for i in 1..=20i64 {
        conn.execute("INSERT INTO t VALUES(?1, ?2)", rusqlite::params![i, format!("v{i}")])?;
    }
    Ok(())
}

fn count(path: &Path) -> Result<i64> {
    Ok(Connection::open(path)?.query_row("SELECT count(*) FROM t", [], |r| r.get(0))?)
}

/// Блокировка, которую никогда не удаётся взять.
struct Refusing;

impl ReadLocker for Refusing {
    fn acquire_lock(&mut self, path: &Path) -> Result<()> {
        Err(anyhow!("refused {}", path.display()))
    }

    fn release_lock(&mut self) -> Result<()> {
        Ok(())
    }
}

impl WriteLocker for Refusing {
    fn acquire_lock(&mut self, path: &Path) -> Result<()> {
        Err(anyhow!("refused {}", path.display()))
    }

    fn release_lock(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn refused_lock_aborts_every_operation() -> Result<()> {
    let root = unique_root("refused");
    let db = root.join("app.db");
    build_fixture(&db)?;

    let mut recovery =
        Recovery::new(RepairBuilder::from_default().build()).with_lockers(Box::new(Refusing), Box::new(Refusing));

    let err = recovery.deconstruct(&db, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert_eq!(err.level(), Level::Fatal);
    assert!(err.message().contains("refused"));

    let err = recovery.crawl_and_assemble(&db, &root.join("out.db"), |_, _| true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert!(!root.join("out.db").exists());

    // retrieve собирает копию, но подменить файл без блокировки не может
    let err = recovery.retrieve(&db, |_, _| true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert_eq!(count(&db)?, 20);
    assert!(!Factory::new(&db).contains_deposited());

    let err = recovery.renew(Factory::new(&db).directory()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn held_file_lock_times_out() -> Result<()> {
    let root = unique_root("held");
    let db = root.join("app.db");
    build_fixture(&db)?;

    let guard = acquire_lock(&db, LockMode::Exclusive, Duration::from_millis(100))?;
    let cfg = RepairBuilder::from_default().lock_timeout_ms(50).build();
    let mut recovery = Recovery::new(cfg);
    let err = recovery.crawl_and_assemble(&db, &root.join("out.db"), |_, _| true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    drop(guard);

    let score = recovery.crawl_and_assemble(&db, &root.join("out.db"), |_, _| true)?;
    assert!((score - 1.0).abs() < 1e-9);
    assert_eq!(count(&root.join("out.db"))?, 20);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn sqlite_locker_waits_for_writers() -> Result<()> {
    let root = unique_root("sqlite");
    let db = root.join("app.db");
    build_fixture(&db)?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build())
        .with_lockers(Box::new(SqliteLocker::new(50)), Box::new(SqliteLocker::new(50)));

    let writer = Connection::open(&db)?;
    writer.execute_batch("BEGIN IMMEDIATE;")?;

    // RESERVED у другого соединения не мешает читать
    let score = recovery.crawl_and_assemble(&db, &root.join("out.db"), |_, _| true)?;
    assert!((score - 1.0).abs() < 1e-9);

    // но не даёт подменить файл
    let err = recovery.retrieve(&db, |_, _| true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert_eq!(count(&db)?, 20);

    writer.execute_batch("ROLLBACK;")?;
    drop(writer);
    let score = recovery.retrieve(&db, |_, _| true)?;
    assert!((score - 1.0).abs() < 1e-9);
    assert_eq!(count(&db)?, 20);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
