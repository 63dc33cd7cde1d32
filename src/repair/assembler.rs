//! repair/assembler — контракт приёмника восстановленных данных.
//!
//! Порядок вызовов на одну таблицу:
//!   mark_as_assembling(t) → assemble_table(sql, associated) → assemble_cell(..)* →
//!   [assemble_sequence] → mark_as_assembled()
//! mark_as_milestone() допустим в любой момент; finish() — один раз в конце прохода.
//! assemble_sql() (view/trigger вне таблицы) — в любом состоянии, ошибки терпимы.

use crate::error::{RepairError, Result};
use crate::page::Cell;

/// Что делать с rowid, который уже есть в приёмнике.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conflict {
    /// Новая строка заменяет старую.
    #[default]
    Replace,
    /// Старая строка остаётся.
    Ignore,
}

impl Conflict {
    pub fn as_sql(self) -> &'static str {
        match self {
            Conflict::Replace => "OR REPLACE",
            Conflict::Ignore => "OR IGNORE",
        }
    }
}

pub trait Assembler {
    fn mark_as_assembling(&mut self, table: &str) -> Result<()>;

    /// DDL таблицы и связанных объектов (индексы, триггеры).
    fn assemble_table(&mut self, sql: &str, associated: &[String]) -> Result<()>;

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()>;

    fn assemble_sequence(&mut self, table: &str, seq: i64) -> Result<()>;

    fn assemble_sql(&mut self, sql: &str) -> Result<()>;

    fn mark_as_milestone(&mut self) -> Result<()>;

    /// Повторный вызов после завершения таблицы — no-op.
    fn mark_as_assembled(&mut self) -> Result<()>;

    fn finish(&mut self) -> Result<()>;

    fn set_conflict(&mut self, conflict: Conflict);
}

/// Состояние приёмника по текущей таблице.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssemblyState {
    #[default]
    Idle,
    Assembling(String),
    Assembled(String),
}

impl AssemblyState {
    pub fn begin(&mut self, table: &str) -> Result<()> {
        if let AssemblyState::Assembling(cur) = self {
            return Err(RepairError::usage(format!(
                "mark_as_assembling({}) while {} is not assembled",
                table, cur
            )));
        }
        *self = AssemblyState::Assembling(table.to_string());
        Ok(())
    }

    /// Имя таблицы, которую сейчас собираем.
    pub fn assembling(&self) -> Result<&str> {
        match self {
            AssemblyState::Assembling(t) => Ok(t),
            _ => Err(RepairError::usage("no table is being assembled")),
        }
    }

    /// true — таблица только что завершена; false — уже была завершена.
    pub fn end(&mut self) -> Result<bool> {
        match std::mem::take(self) {
            AssemblyState::Assembling(t) => {
                *self = AssemblyState::Assembled(t);
                Ok(true)
            }
            AssemblyState::Assembled(t) => {
                *self = AssemblyState::Assembled(t);
                Ok(false)
            }
            AssemblyState::Idle => Err(RepairError::usage("mark_as_assembled without a table")),
        }
    }
}

/// CREATE TRIGGER ... (с учётом TEMP/TEMPORARY и регистра).
pub fn is_trigger_sql(sql: &str) -> bool {
    let words: Vec<String> = sql
        .split_whitespace()
        .take(3)
        .map(|w| w.to_ascii_uppercase())
        .collect();
    match words.as_slice() {
        [c, t, ..] if c == "CREATE" && t == "TRIGGER" => true,
        [c, tmp, t] if c == "CREATE" && (tmp == "TEMP" || tmp == "TEMPORARY") && t == "TRIGGER" => true,
        _ => false,
    }
}

/// Таблица без rowid: данные лежат в index-дереве.
pub fn is_without_rowid(sql: &str) -> bool {
    let words: Vec<String> = sql.split_whitespace().map(|w| w.to_ascii_uppercase()).collect();
    words.join(" ").contains("WITHOUT ROWID")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn state_transitions() {
        let mut s = AssemblyState::default();
        assert_eq!(s.assembling().unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(s.end().unwrap_err().kind(), ErrorKind::Usage);

        s.begin("t1").unwrap();
        assert_eq!(s.assembling().unwrap(), "t1");
        assert_eq!(s.begin("t2").unwrap_err().kind(), ErrorKind::Usage);

        assert!(s.end().unwrap());
        assert!(!s.end().unwrap());
        s.begin("t2").unwrap();
        assert_eq!(s.assembling().unwrap(), "t2");
    }

    #[test]
    fn sql_classification() {
        assert!(is_trigger_sql("CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT 1; END"));
        assert!(is_trigger_sql("create temp trigger x before delete on t begin select 1; end"));
        assert!(!is_trigger_sql("CREATE INDEX i ON t(a)"));
        assert!(is_without_rowid("CREATE TABLE w(a PRIMARY KEY, b) WITHOUT ROWID"));
        assert!(is_without_rowid("create table w(a primary key) without rowid;"));
        assert!(!is_without_rowid("CREATE TABLE t(a, b)"));
    }
}
