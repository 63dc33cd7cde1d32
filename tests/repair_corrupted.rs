// tests/repair_corrupted.rs
//
// Побайтовая порча фикстуры и проверка, что теряется ровно повреждённое.
//   cargo test --test repair_corrupted -- --nocapture

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use byteorder::{BigEndian, ByteOrder};
use rusqlite::Connection;

use SalvageDB::{ErrorKind, Level, Recovery, RepairBuilder};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("salvagetest-corrupt-{prefix}-{pid}-{t}-{id}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn root_page(path: &Path, table: &str) -> Result<u32> {
    let conn = Connection::open(path)?;
    let root: i64 = conn.query_row("SELECT rootpage FROM sqlite_master WHERE name = ?1", [table], |r| r.get(0))?;
    Ok(root as u32)
}

fn read_page(path: &Path, page_size: usize, page_no: u32) -> Result<Vec<u8>> {
    let all = fs::read(path)?;
    let off = (page_no as usize - 1) * page_size;
    Ok(all[off..off + page_size].to_vec())
}

fn patch(path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}

fn count(path: &Path, table: &str) -> Result<i64> {
    let conn = Connection::open(path)?;
    Ok(conn.query_row(&format!("SELECT count(*) FROM \"{table}\""), [], |r| r.get(0))?)
}

/// notes: 10 строк по ~200 байт в одном листе; other: 50 мелких строк.
fn small_fixture(path: &Path) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA page_size=4096;
         CREATE TABLE notes(id INTEGER PRIMARY KEY, body BLOB);
         CREATE TABLE other(a INTEGER, b TEXT);",
    )?;
    for i in 0..10i64 {
        conn.execute("INSERT INTO notes VALUES(?1, ?2)", rusqlite::params![i + 1, vec![i as u8; 200]])?;
    }
    for i in 0..50i64 {
        conn.execute("INSERT INTO other VALUES(?1, ?2)", rusqlite::params![i, format!("row {i}")])?;
    }
    Ok(())
}

#[test]
fn corrupted_cell_is_skipped() -> Result<()> {
    let root = unique_root("cell");
    let src = root.join("src.db");
    let dst = root.join("dst.db");
    small_fixture(&src)?;

    let ps = 4096usize;
    let notes = root_page(&src, "notes")?;
    let page = read_page(&src, ps, notes)?;
    assert_eq!(page[0], 0x0d, "notes root must be a table leaf");
    // 4-я ячейка: длина payload -> 2 097 151 байт, больше всего файла
    let cell_off = BigEndian::read_u16(&page[8 + 2 * 3..8 + 2 * 3 + 2]) as u64;
    patch(&src, (notes as u64 - 1) * ps as u64 + cell_off, &[0xff, 0xff, 0x7f])?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    let report = recovery.crawl_and_assemble_report(&src, &dst, None, |_, _| true)?;

    assert_eq!(report.cells_skipped, 1);
    assert_eq!(report.level, Level::NotFatal);
    assert!(report.corruptions >= 1);
    assert!(report.tables_failed.is_empty());
    // notes: страницы 1/1, ячейки 9/10; other целиком
    let expected = (0.5_f64 * (0.5 + 0.5 * 0.9) + 0.5).min(1.0);
    assert!((report.score - expected).abs() < 1e-9, "score {}", report.score);

    assert_eq!(count(&dst, "notes")?, 9);
    assert_eq!(count(&dst, "other")?, 50);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn destroyed_root_fails_only_its_table() -> Result<()> {
    let root = unique_root("root");
    let src = root.join("src.db");
    let dst = root.join("dst.db");
    small_fixture(&src)?;

    let ps = 4096u64;
    let notes = root_page(&src, "notes")?;
    patch(&src, (notes as u64 - 1) * ps, &vec![0u8; ps as usize])?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    let report = recovery.crawl_and_assemble_report(&src, &dst, None, |_, _| true)?;

    assert_eq!(report.level, Level::Fatal);
    assert_eq!(report.tables_failed, vec!["notes".to_string()]);
    assert!((report.score - 0.5).abs() < 1e-9, "score {}", report.score);
    assert_eq!(count(&dst, "notes")?, 0);
    assert_eq!(count(&dst, "other")?, 50);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn child_cycle_is_not_fatal() -> Result<()> {
    let root = unique_root("cycle");
    let src = root.join("src.db");
    let dst = root.join("dst.db");
    {
        let conn = Connection::open(&src)?;
        conn.execute_batch("PRAGMA page_size=1024; CREATE TABLE big(id INTEGER PRIMARY KEY, t TEXT);")?;
        let tx = conn.unchecked_transaction()?;
        for i in 0..400i64 {
            tx.execute("INSERT INTO big VALUES(?1, ?2)", rusqlite::params![i + 1, "x".repeat(100)])?;
        }
        tx.commit()?;
    }

    let ps = 1024usize;
    let big = root_page(&src, "big")?;
    let page = read_page(&src, ps, big)?;
    assert_eq!(page[0], 0x05, "400 rows on 1 KiB pages need an interior root");
    // правый край корня указывает на сам корень
    let mut ptr = [0u8; 4];
    BigEndian::write_u32(&mut ptr, big);
    patch(&src, (big as u64 - 1) * ps as u64 + 8, &ptr)?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    let report = recovery.crawl_and_assemble_report(&src, &dst, None, |_, _| true)?;

    assert_eq!(report.level, Level::NotFatal);
    assert!(report.tables_failed.is_empty());
    assert!(report.pages_failed >= 1);
    assert!(report.score < 1.0 && report.score > 0.9, "score {}", report.score);
    let n = count(&dst, "big")?;
    assert!(n > 300 && n < 400, "rows {n}");
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn unreadable_header_is_a_format_error() -> Result<()> {
    let root = unique_root("header");
    let src = root.join("src.db");
    small_fixture(&src)?;
    patch(&src, 0, &[0u8; 16])?;

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    let err = recovery
        .crawl_and_assemble(&src, &root.join("dst.db"), |_, _| true)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.level() >= Level::Fatal);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
