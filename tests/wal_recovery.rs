// tests/wal_recovery.rs
//
// Закоммиченные в WAL транзакции видны при восстановлении; битый хвост лога отбрасывается.
//   cargo test --test wal_recovery -- --nocapture

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::Connection;

use SalvageDB::{Level, Pager, Recovery, RepairBuilder};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("salvagetest-wal-{prefix}-{pid}-{t}-{id}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn wal_of(db: &Path) -> PathBuf {
    let mut s = db.as_os_str().to_os_string();
    s.push("-wal");
    PathBuf::from(s)
}

/// 100 строк в основном файле, затем две транзакции только в WAL:
///   A — строки 101..=200, B — строки 1001..=1030 (крупные).
/// Копия db и -wal снимается при открытом соединении, до checkpoint.
fn build_with_wal(live: &Path, copy: &Path) -> Result<()> {
    {
        let conn = Connection::open(live)?;
        conn.execute_batch("PRAGMA page_size=1024; CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT);")?;
        let tx = conn.unchecked_transaction()?;
        for i in 1..=100i64 {
            tx.execute("INSERT INTO t VALUES(?1, ?2)", rusqlite::params![i, format!("base-{i}")])?;
        }
        tx.commit()?;
    }

    let conn = Connection::open(live)?;
    let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
    assert_eq!(mode.to_lowercase(), "wal");
    conn.execute_batch("PRAGMA wal_autocheckpoint=0;")?;

    let tx = conn.unchecked_transaction()?;
    for i in 101..=200i64 {
        tx.execute("INSERT INTO t VALUES(?1, ?2)", rusqlite::params![i, format!("wal-a-{i}")])?;
    }
    tx.commit()?;

    let tx = conn.unchecked_transaction()?;
    for i in 1001..=1030i64 {
        tx.execute("INSERT INTO t VALUES(?1, ?2)", rusqlite::params![i, "b".repeat(200)])?;
    }
    tx.commit()?;

    fs::copy(live, copy)?;
    fs::copy(wal_of(live), wal_of(copy))?;
    drop(conn);
    Ok(())
}

fn ids(path: &Path) -> Result<Vec<i64>> {
    let conn = Connection::open(path)?;
    let mut stmt = conn.prepare("SELECT id FROM t ORDER BY id")?;
    let out = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(out)
}

#[test]
fn committed_wal_rows_are_recovered() -> Result<()> {
    let root = unique_root("committed");
    let src = root.join("src.db");
    build_with_wal(&root.join("live.db"), &src)?;
    let dst = root.join("dst.db");

    let mut recovery = Recovery::new(RepairBuilder::from_default().build());
    let report = recovery.crawl_and_assemble_report(&src, &dst, None, |_, _| true)?;
    assert_eq!(report.level, Level::None);
    assert!(report.wal_frames > 0);
    assert_eq!(report.wal_disposed, 0);

    let got = ids(&dst)?;
    assert_eq!(got.len(), 230);
    assert_eq!(got.first(), Some(&1));
    assert_eq!(got.last(), Some(&1030));
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn skip_wal_reads_main_file_only() -> Result<()> {
    let root = unique_root("skip");
    let src = root.join("src.db");
    build_with_wal(&root.join("live.db"), &src)?;
    let dst = root.join("dst.db");

    let cfg = RepairBuilder::from_default().skip_wal(true).build();
    let mut recovery = Recovery::new(cfg);
    let score = recovery.crawl_and_assemble(&src, &dst, |_, _| true)?;
    assert!((score - 1.0).abs() < 1e-9);
    assert_eq!(ids(&dst)?, (1..=100).collect::<Vec<i64>>());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn broken_last_frame_drops_last_transaction() -> Result<()> {
    let root = unique_root("broken");
    let src = root.join("src.db");
    build_with_wal(&root.join("live.db"), &src)?;

    // последний байт лога принадлежит коммит-кадру транзакции B
    let wal = wal_of(&src);
    let len = fs::metadata(&wal)?.len();
    {
        let mut f = OpenOptions::new().read(true).write(true).open(&wal)?;
        f.seek(SeekFrom::Start(len - 1))?;
        let mut b = [0u8; 1];
        std::io::Read::read_exact(&mut f, &mut b)?;
        f.seek(SeekFrom::Start(len - 1))?;
        f.write_all(&[b[0] ^ 0xff])?;
    }

    let cfg = RepairBuilder::from_default().build();
    let pager = Pager::open(&src, &cfg)?;
    let w = pager.wal().expect("wal is opened");
    assert!(w.disposed_frames() >= 1);
    drop(pager);

    let dst = root.join("dst.db");
    let mut recovery = Recovery::new(cfg);
    let report = recovery.crawl_and_assemble_report(&src, &dst, None, |_, _| true)?;
    assert!(report.wal_disposed >= 1);
    assert_eq!(ids(&dst)?, (1..=200).collect::<Vec<i64>>());
    let _ = fs::remove_dir_all(&root);
    Ok(())
}
