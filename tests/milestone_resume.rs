// tests/milestone_resume.rs
//
// Остановка колбэком прогресса: в приёмнике остаются только целые milestone,
// повторный запуск в тот же файл дособирает остальное.
//   cargo test --test milestone_resume -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::Connection;

use SalvageDB::{ErrorKind, Recovery, RepairBuilder};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("salvagetest-milestone-{prefix}-{pid}-{t}-{id}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn count(path: &Path, table: &str) -> Result<i64> {
    let conn = Connection::open(path)?;
    Ok(conn.query_row(&format!("SELECT count(*) FROM \"{table}\""), [], |r| r.get(0))?)
}

#[test]
fn cancelled_progress_keeps_milestones_and_resumes() -> Result<()> {
    let root = unique_root("cancel");
    let src = root.join("src.db");
    let dst = root.join("dst.db");
    {
        let conn = Connection::open(&src)?;
        conn.execute_batch("PRAGMA page_size=1024; CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT);")?;
        let tx = conn.unchecked_transaction()?;
        for i in 0..2000i64 {
            tx.execute("INSERT INTO t VALUES(?1, ?2)", rusqlite::params![i + 1, format!("value-{i:06}")])?;
        }
        tx.commit()?;
    }

    let cfg = RepairBuilder::from_default().milestone_interval(10).build();
    let mut recovery = Recovery::new(cfg);
    let err = recovery
        .crawl_and_assemble(&src, &dst, |value, _| value < 0.5)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);

    let partial = count(&dst, "t")?;
    assert!(partial > 0 && partial < 2000, "partial rows {partial}");
    assert_eq!(partial % 10, 0, "only whole milestones survive");

    let score = recovery.crawl_and_assemble(&src, &dst, |_, _| true)?;
    assert!((score - 1.0).abs() < 1e-9);
    assert_eq!(count(&dst, "t")?, 2000);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn stop_flag_interrupts_between_pages() -> Result<()> {
    let root = unique_root("flag");
    let src = root.join("src.db");
    {
        let conn = Connection::open(&src)?;
        conn.execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT);")?;
        let tx = conn.unchecked_transaction()?;
        for i in 0..500i64 {
            tx.execute("INSERT INTO t VALUES(?1, ?2)", rusqlite::params![i + 1, "y".repeat(64)])?;
        }
        tx.commit()?;
    }

    let mut recovery = Recovery::new(RepairBuilder::from_default().milestone_interval(50).build());
    let flag = recovery.stop_flag();
    let err = recovery
        .crawl_and_assemble(&src, &root.join("dst.db"), |value, _| {
            if value > 0.2 {
                flag.store(true, Ordering::Relaxed);
            }
            true
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);

    // флаг сбрасывается в начале следующей операции
    let score = recovery.crawl_and_assemble(&src, &root.join("dst.db"), |_, _| true)?;
    assert!((score - 1.0).abs() < 1e-9);
    assert_eq!(count(&root.join("dst.db"), "t")?, 500);
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
