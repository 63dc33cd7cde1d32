//! repair/sqlite — Assembler поверх rusqlite: восстановленные строки пишутся в новую БД.
//!
//! Транзакции: BEGIN IMMEDIATE открывается лениво первой записью, milestone = COMMIT.
//! Незакоммиченное при drop соединения откатывается SQLite, так что после остановки
//! в приёмнике остаётся ровно то, что было до последнего milestone.
//!
//! Вставка: INSERT OR REPLACE|IGNORE INTO "t"(rowid, "c1".."ck") VALUES(?..),
//! текст запроса кэшируется по числу значений k, сам statement — prepare_cached.
//! Колонки берутся из PRAGMA table_info после DDL. У WITHOUT ROWID таблиц rowid нет,
//! а порядок колонок в записи — порядок PRIMARY KEY индекса (PRAGMA index_xinfo).
//!
//! Текст в UTF-8 привязывается байтами из записи, без проверки: что было в
//! источнике, то и окажется в приёмнике.

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::assembler::{is_trigger_sql, is_without_rowid, Assembler, AssemblyState, Conflict};
use crate::error::{ErrorKind, Level, RepairError, Result};
use crate::metrics::record_milestone;
use crate::page::{Cell, Value};
use crate::pager::TextEncoding;
use crate::util::quote_ident;

/// Вспомогательная AUTOINCREMENT-таблица: гарантирует наличие sqlite_sequence.
const SEQUENCE_HELPER: &str = "salvage_sequence_helper";

#[derive(Debug, Clone)]
struct TableColumns {
    names: Vec<String>,
    /// Индекс колонки INTEGER PRIMARY KEY (алиас rowid), если есть.
    ipk: Option<usize>,
    without_rowid: bool,
}

pub struct SqliteAssembler {
    path: PathBuf,
    conn: Option<Connection>,
    state: AssemblyState,
    conflict: Conflict,
    in_txn: bool,
    columns: Option<TableColumns>,
    insert_sql: HashMap<usize, String>,
    deferred: Vec<String>,
    sequence_helper: bool,
}

impl SqliteAssembler {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            conn: None,
            state: AssemblyState::Idle,
            conflict: Conflict::Replace,
            in_txn: false,
            columns: None,
            insert_sql: HashMap::new(),
            deferred: Vec::new(),
            sequence_helper: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Result<&Connection> {
        if self.conn.is_none() {
            let conn = Connection::open(&self.path).map_err(|e| sql_error(&self.path, e))?;
            conn.execute_batch("PRAGMA journal_mode=DELETE;")
                .map_err(|e| sql_error(&self.path, e))?;
            log::debug!("assembler: open path={}", self.path.display());
            self.conn = Some(conn);
        }
        self.conn
            .as_ref()
            .ok_or_else(|| RepairError::usage("assembler connection is closed"))
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| RepairError::usage("assembler connection is closed"))
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_txn {
            return Ok(());
        }
        self.open()?;
        self.conn()?
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| sql_error(&self.path, e))?;
        self.in_txn = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_txn {
            return Ok(());
        }
        self.in_txn = false;
        let conn = self.conn()?;
        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(sql_error(&self.path, e));
        }
        Ok(())
    }

    fn load_columns(&self, table: &str) -> Result<TableColumns> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
            .map_err(|e| sql_error(&self.path, e))?;
        let rows = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let ty: String = row.get(2)?;
                let pk: i64 = row.get(5)?;
                Ok((name, ty, pk))
            })
            .map_err(|e| sql_error(&self.path, e))?;

        let mut names = Vec::new();
        let mut pks = Vec::new();
        for (i, row) in rows.enumerate() {
            let (name, ty, pk) = row.map_err(|e| sql_error(&self.path, e))?;
            if pk > 0 {
                pks.push((i, ty));
            }
            names.push(name);
        }
        let ipk = match pks.as_slice() {
            [(i, ty)] if ty.eq_ignore_ascii_case("INTEGER") => Some(*i),
            _ => None,
        };
        Ok(TableColumns { names, ipk, without_rowid: false })
    }

    /// Колонки WITHOUT ROWID таблицы в порядке записи: ключ, затем остальные.
    fn load_storage_order(&self, table: &str) -> Result<TableColumns> {
        let conn = self.conn()?;
        let mut pk_index = None;
        {
            let mut stmt = conn
                .prepare(&format!("PRAGMA index_list({})", quote_ident(table)))
                .map_err(|e| sql_error(&self.path, e))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(3)?)))
                .map_err(|e| sql_error(&self.path, e))?;
            for row in rows {
                let (name, origin) = row.map_err(|e| sql_error(&self.path, e))?;
                if origin == "pk" {
                    pk_index = Some(name);
                }
            }
        }
        let index = pk_index.ok_or_else(|| {
            RepairError::format(format!("primary key index of {} not found", table)).with_level(Level::Fatal)
        })?;

        let mut stmt = conn
            .prepare(&format!("PRAGMA index_xinfo({})", quote_ident(&index)))
            .map_err(|e| sql_error(&self.path, e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(1)?, row.get::<_, Option<String>>(2)?)))
            .map_err(|e| sql_error(&self.path, e))?;
        let mut names = Vec::new();
        for row in rows {
            if let (cid, Some(name)) = row.map_err(|e| sql_error(&self.path, e))? {
                if cid >= 0 {
                    names.push(name);
                }
            }
        }
        Ok(TableColumns { names, ipk: None, without_rowid: true })
    }

    fn insert_sql_for(&mut self, table: &str, count: usize) -> String {
        let conflict = self.conflict;
        let (names, without_rowid) = match &self.columns {
            Some(c) => (c.names.clone(), c.without_rowid),
            None => (Vec::new(), false),
        };
        self.insert_sql
            .entry(count)
            .or_insert_with(|| {
                let mut cols: Vec<String> = Vec::with_capacity(count + 1);
                if !without_rowid {
                    cols.push("rowid".to_string());
                }
                cols.extend(names.iter().take(count).map(|n| quote_ident(n)));
                let marks: Vec<String> = (1..=cols.len()).map(|i| format!("?{}", i)).collect();
                format!(
                    "INSERT {} INTO {}({}) VALUES({})",
                    conflict.as_sql(),
                    quote_ident(table),
                    cols.join(", "),
                    marks.join(", ")
                )
            })
            .clone()
    }

    fn run_tolerated(&self, sql: &str, what: &str) {
        if let Ok(conn) = self.conn() {
            if let Err(e) = conn.execute_batch(sql) {
                log::warn!("assembler: {} failed, err={}, sql={}", what, e, sql);
            }
        }
    }
}

impl Assembler for SqliteAssembler {
    fn mark_as_assembling(&mut self, table: &str) -> Result<()> {
        self.state.begin(table)?;
        self.columns = None;
        self.insert_sql.clear();
        self.deferred.clear();
        self.open()?;
        Ok(())
    }

    fn assemble_table(&mut self, sql: &str, associated: &[String]) -> Result<()> {
        let table = self.state.assembling()?.to_string();
        self.begin()?;
        if let Err(e) = self.conn()?.execute_batch(sql) {
            if !is_already_exists(&e) {
                return Err(sql_error(&self.path, e)
                    .with_table(&table)
                    .with_level(Level::Fatal));
            }
            log::debug!("assembler: table {} already exists, resuming", table);
        }
        for extra in associated {
            if is_trigger_sql(extra) {
                self.deferred.push(extra.clone());
                continue;
            }
            if let Err(e) = self.conn()?.execute_batch(extra) {
                if !is_already_exists(&e) {
                    log::warn!("assembler: index for {} failed, err={}", table, e);
                }
            }
        }
        let columns = if is_without_rowid(sql) {
            self.load_storage_order(&table)
        } else {
            self.load_columns(&table)
        };
        self.columns = Some(columns.map_err(|e| e.with_table(&table))?);
        Ok(())
    }

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()> {
        let table = self.state.assembling()?.to_string();
        let columns = self
            .columns
            .clone()
            .ok_or_else(|| RepairError::usage("assemble_cell before assemble_table").with_table(&table))?;
        let rowid = if columns.without_rowid {
            None
        } else {
            Some(
                cell.rowid()
                    .ok_or_else(|| RepairError::corruption("cell without rowid").with_page(cell.page_no()))?,
            )
        };
        if cell.count() > columns.names.len() {
            return Err(RepairError::corruption(format!(
                "record has {} values, table has {} columns",
                cell.count(),
                columns.names.len()
            ))
            .with_table(&table)
            .with_page(cell.page_no())
            .with_cell(cell.index()));
        }

        let mut values: Vec<ToSqlOutput<'_>> = Vec::with_capacity(cell.count() + 1);
        if let Some(r) = rowid {
            values.push(ToSqlOutput::Owned(SqlValue::Integer(r)));
        }
        for (i, v) in cell.values().into_iter().enumerate() {
            let v = match rowid {
                Some(r) if v.is_null() && columns.ipk == Some(i) => ToSqlOutput::Owned(SqlValue::Integer(r)),
                _ => to_sql_value(v).map_err(|e| {
                    e.with_table(&table)
                        .with_page(cell.page_no())
                        .with_cell(cell.index())
                })?,
            };
            values.push(v);
        }

        self.begin()?;
        let sql = self.insert_sql_for(&table, cell.count());
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql).map_err(|e| sql_error(&self.path, e))?;
        stmt.execute(params_from_iter(values.iter())).map_err(|e| {
            sql_error(&self.path, e)
                .with_table(&table)
                .with_page(cell.page_no())
                .with_cell(cell.index())
        })?;
        Ok(())
    }

    fn assemble_sequence(&mut self, table: &str, seq: i64) -> Result<()> {
        self.begin()?;
        if !self.sequence_helper {
            self.conn()?
                .execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {}(id INTEGER PRIMARY KEY AUTOINCREMENT)",
                    quote_ident(SEQUENCE_HELPER)
                ))
                .map_err(|e| sql_error(&self.path, e))?;
            self.sequence_helper = true;
        }
        let conn = self.conn()?;
        let changed = conn
            .execute("UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2", rusqlite::params![seq, table])
            .map_err(|e| sql_error(&self.path, e).with_table(table))?;
        if changed == 0 {
            conn.execute("INSERT INTO sqlite_sequence(name, seq) VALUES(?1, ?2)", rusqlite::params![table, seq])
                .map_err(|e| sql_error(&self.path, e).with_table(table))?;
        }
        Ok(())
    }

    fn assemble_sql(&mut self, sql: &str) -> Result<()> {
        self.begin()?;
        if let Err(e) = self.conn()?.execute_batch(sql) {
            if !is_already_exists(&e) {
                return Err(sql_error(&self.path, e).with_level(Level::NotFatal));
            }
        }
        Ok(())
    }

    fn mark_as_milestone(&mut self) -> Result<()> {
        if self.in_txn {
            record_milestone();
        }
        self.commit()
    }

    fn mark_as_assembled(&mut self) -> Result<()> {
        let table = match &self.state {
            AssemblyState::Assembling(t) => t.clone(),
            _ => String::new(),
        };
        if !self.state.end()? {
            return Ok(());
        }
        let triggers = std::mem::take(&mut self.deferred);
        if !triggers.is_empty() {
            self.begin()?;
            for sql in &triggers {
                self.run_tolerated(sql, "trigger");
            }
        }
        self.columns = None;
        self.insert_sql.clear();
        self.commit().map_err(|e| e.with_table(&table))
    }

    fn finish(&mut self) -> Result<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        if let AssemblyState::Assembling(t) = &self.state {
            return Err(RepairError::usage(format!("finish while {} is not assembled", t)));
        }
        if self.sequence_helper {
            self.begin()?;
            self.run_tolerated(
                &format!("DROP TABLE IF EXISTS {}", quote_ident(SEQUENCE_HELPER)),
                "sequence helper drop",
            );
            self.sequence_helper = false;
        }
        self.commit()?;
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| sql_error(&self.path, e))?;
        }
        log::debug!("assembler: finished path={}", self.path.display());
        Ok(())
    }

    fn set_conflict(&mut self, conflict: Conflict) {
        if self.conflict != conflict {
            self.conflict = conflict;
            self.insert_sql.clear();
        }
    }
}

/// Значение записи → параметр. Текст и BLOB не копируются.
/// UTF-16 перекодируется строго: битый текст — ошибка ячейки, а не замена символов.
fn to_sql_value(v: Value<'_>) -> Result<ToSqlOutput<'_>> {
    Ok(match v {
        Value::Null => ToSqlOutput::Owned(SqlValue::Null),
        Value::Integer32(i) => ToSqlOutput::Owned(SqlValue::Integer(i as i64)),
        Value::Integer64(i) => ToSqlOutput::Owned(SqlValue::Integer(i)),
        Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(f)),
        Value::Text(t) if t.encoding() == TextEncoding::Utf8 => ToSqlOutput::Borrowed(ValueRef::Text(t.raw())),
        Value::Text(t) => match t.to_string_strict() {
            Some(s) => ToSqlOutput::Owned(SqlValue::Text(s)),
            None => {
                return Err(RepairError::corruption(format!(
                    "text of {} bytes is not valid {:?}",
                    t.raw().len(),
                    t.encoding()
                ))
                .with_level(Level::NotFatal))
            }
        },
        Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
    })
}

fn is_already_exists(e: &rusqlite::Error) -> bool {
    e.to_string().contains("already exists")
}

/// Ошибка SQLite → RepairError. Переполнение диска прерывает весь проход,
/// нарушение ограничений касается одной строки.
fn sql_error(path: &Path, e: rusqlite::Error) -> RepairError {
    let (kind, level) = match &e {
        rusqlite::Error::SqliteFailure(f, _) => match f.code {
            ErrorCode::DiskFull => (ErrorKind::Io, Level::MostFatal),
            ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch | ErrorCode::TooBig => {
                (ErrorKind::Corruption, Level::NotFatal)
            }
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => (ErrorKind::Lock, Level::Fatal),
            _ => (ErrorKind::Io, Level::Fatal),
        },
        _ => (ErrorKind::Io, Level::Fatal),
    };
    RepairError::new(kind, e.to_string()).with_level(level).with_path(path)
}
