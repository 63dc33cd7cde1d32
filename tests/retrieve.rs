// tests/retrieve.rs
//
// Восстановление на месте: снимок + порча + retrieve, поколения в "<db>.factory".
//   cargo test --test retrieve -- --nocapture

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::Connection;

use SalvageDB::factory::deposit;
use SalvageDB::factory::paths::{first_material_path, last_material_path};
use SalvageDB::{ErrorKind, Factory, Level, Recovery, RepairBuilder};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("salvagetest-retrieve-{prefix}-{pid}-{t}-{id}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn build_fixture(path: &Path, ids: std::ops::RangeInclusive<i64>, tag: &str) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA page_size=1024;
         CREATE TABLE IF NOT EXISTS t(id INTEGER PRIMARY KEY, v TEXT, n INTEGER);
         CREATE INDEX IF NOT EXISTS t_n ON t(n);",
    )?;
    let tx = conn.unchecked_transaction()?;
    for i in ids {
        tx.execute("INSERT INTO t VALUES(?1, ?2, ?3)", rusqlite::params![i, format!("{tag}-{i}"), i * 3])?;
    }
    tx.commit()?;
    Ok(())
}

fn dump(path: &Path) -> Result<Vec<(i64, String, i64)>> {
    let conn = Connection::open(path)?;
    let mut stmt = conn.prepare("SELECT id, v, n FROM t ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn zero_page(path: &Path, page_no: u64, page_size: u64) -> Result<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.seek(SeekFrom::Start((page_no - 1) * page_size))?;
    f.write_all(&vec![0u8; page_size as usize])?;
    f.sync_all()?;
    Ok(())
}

#[test]
fn destroyed_first_page_is_retrieved_from_material() -> Result<()> {
    let root = unique_root("page1");
    let db = root.join("app.db");
    build_fixture(&db, 1..=400, "v")?;
    let expected = dump(&db)?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    recovery.deconstruct(&db, None)?;
    zero_page(&db, 1, 1024)?;
    assert!(Connection::open(&db)?.query_row("SELECT count(*) FROM t", [], |r| r.get::<_, i64>(0)).is_err());

    let mut calls = 0u32;
    let report = recovery.retrieve_report(&db, None, |_, _| {
        calls += 1;
        true
    })?;
    assert!(calls > 0);
    assert!((report.score - 1.0).abs() < 1e-9, "score {}", report.score);
    assert_eq!(report.material, Some(first_material_path(&db)));
    // каталог нечитаем: проход по каталогу фатален, поколение остаётся
    assert_eq!(report.level, Level::Fatal);

    assert_eq!(dump(&db)?, expected);
    let index: i64 = Connection::open(&db)?.query_row(
        "SELECT count(*) FROM sqlite_master WHERE name = 't_n'",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(index, 1);

    let factory = Factory::new(&db);
    assert_eq!(factory.deposited_databases()?.len(), 1);
    // у восстановленной БД свой свежий material
    assert!(first_material_path(&db).exists());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn broken_newest_material_falls_back_to_older_slot() -> Result<()> {
    let root = unique_root("fallback");
    let db = root.join("app.db");
    build_fixture(&db, 1..=200, "v")?;
    let expected = dump(&db)?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    recovery.deconstruct(&db, None)?;
    thread::sleep(Duration::from_millis(20));
    let newest = recovery.deconstruct(&db, None)?.expect("material written");
    assert_eq!(newest, last_material_path(&db));
    {
        let len = fs::metadata(&newest)?.len();
        let mut f = OpenOptions::new().write(true).open(&newest)?;
        f.seek(SeekFrom::Start(len - 1))?;
        f.write_all(&[0xee])?;
    }

    let report = recovery.retrieve_report(&db, None, |_, _| true)?;
    assert_eq!(report.material, Some(first_material_path(&db)));
    assert_eq!(report.level, Level::None);
    assert!((report.score - 1.0).abs() < 1e-9);
    assert_eq!(dump(&db)?, expected);

    // всё собрано чисто: поколения и каталог factory удалены
    assert!(!Factory::new(&db).directory().exists());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn generations_are_merged_newest_first() -> Result<()> {
    let root = unique_root("merge");
    let db = root.join("app.db");
    let factory = Factory::new(&db);
    let mut recovery = Recovery::new(RepairBuilder::from_default().build());

    build_fixture(&db, 1..=50, "old")?;
    recovery.deconstruct(&db, None)?;
    let generation = deposit(&factory)?.expect("database deposited");
    assert!(!db.exists());
    assert!(factory.contains_deposited());

    build_fixture(&db, 26..=75, "new")?;
    recovery.deconstruct(&db, None)?;

    let report = recovery.retrieve_report(&db, None, |_, _| true)?;
    assert!(report.score > 0.999, "score {}", report.score);
    assert_eq!(report.level, Level::None);

    let rows = dump(&db)?;
    assert_eq!(rows.len(), 75);
    for (id, v, n) in &rows {
        let tag = if *id <= 25 { "old" } else { "new" };
        assert_eq!(v, &format!("{tag}-{id}"));
        assert_eq!(*n, id * 3);
    }
    assert!(!generation.exists());
    assert!(!factory.directory().exists());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn nothing_to_retrieve_is_empty() -> Result<()> {
    let root = unique_root("nothing");
    let db = root.join("absent.db");
    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    let err = recovery.retrieve(&db, |_, _| true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Empty);
    assert!(!Factory::new(&db).directory().exists());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn healthy_material_leaves_only_new_tables_to_crawl() -> Result<()> {
    let root = unique_root("skipcrawl");
    let db = root.join("app.db");
    build_fixture(&db, 1..=300, "v")?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    recovery.deconstruct(&db, None)?;
    {
        // таблица появилась после снимка: в material её нет
        let conn = Connection::open(&db)?;
        conn.execute_batch("CREATE TABLE extra(k TEXT, v INTEGER);")?;
        for i in 0..30i64 {
            conn.execute("INSERT INTO extra VALUES(?1, ?2)", rusqlite::params![format!("e{i}"), i])?;
        }
    }
    let expected = dump(&db)?;

    let report = recovery.retrieve_report(&db, None, |_, _| true)?;
    assert_eq!(report.material, Some(first_material_path(&db)));
    assert!(report.fallback_tables.is_empty(), "fallback {:?}", report.fallback_tables);
    // t целиком из material, полный обход взял только extra
    assert_eq!(report.tables, 2);
    assert_eq!(report.cells_assembled, 330);
    assert!((report.score - 1.0).abs() < 1e-9, "score {}", report.score);
    assert_eq!(report.level, Level::None);

    assert_eq!(dump(&db)?, expected);
    let extra: i64 = Connection::open(&db)?.query_row("SELECT count(*) FROM extra", [], |r| r.get(0))?;
    assert_eq!(extra, 30);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn table_grown_after_material_is_crawled_again() -> Result<()> {
    let root = unique_root("grown");
    let db = root.join("app.db");
    build_fixture(&db, 1..=300, "v")?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    recovery.deconstruct(&db, None)?;
    build_fixture(&db, 301..=700, "late")?;
    let expected = dump(&db)?;
    assert_eq!(expected.len(), 700);

    let report = recovery.retrieve_report(&db, None, |_, _| true)?;
    assert_eq!(report.fallback_tables, vec!["t".to_string()]);
    assert!((report.score - 1.0).abs() < 1e-9, "score {}", report.score);
    assert_eq!(dump(&db)?, expected);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn without_rowid_table_is_retrieved_from_material() -> Result<()> {
    let root = unique_root("worowid");
    let db = root.join("app.db");
    {
        let conn = Connection::open(&db)?;
        conn.execute_batch(
            "PRAGMA page_size=1024;
             CREATE TABLE kv(k TEXT PRIMARY KEY, v BLOB) WITHOUT ROWID;",
        )?;
        let tx = conn.unchecked_transaction()?;
        for i in 0..500i64 {
            tx.execute("INSERT INTO kv VALUES(?1, ?2)", rusqlite::params![format!("k{i:04}"), vec![i as u8; 40]])?;
        }
        tx.commit()?;
    }
    let select = |path: &Path| -> Result<Vec<(String, Vec<u8>)>> {
        let conn = Connection::open(path)?;
        let mut stmt = conn.prepare("SELECT k, v FROM kv ORDER BY k")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    };
    let expected = select(&db)?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    recovery.deconstruct(&db, None)?;
    zero_page(&db, 1, 1024)?;

    let report = recovery.retrieve_report(&db, None, |_, _| true)?;
    assert!((report.score - 1.0).abs() < 1e-9, "score {}", report.score);
    assert_eq!(report.cells_assembled, 500);
    assert_eq!(select(&db)?, expected);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
