//! page — разбор B-tree страниц файла SQLite.
//!
//! Разделение по подмодулям:
//! - varint.rs   — SQLite varint (1..9 байт).
//! - record.rs   — serial types и значения колонок.
//! - cell.rs     — Cell: rowid, payload, смещения колонок.
//! - overflow.rs — сборка payload по overflow-цепочке.
//! - decode.rs   — PageDecoder: заголовок, указатели ячеек, freeblocks, потомки.

pub mod varint;
pub mod record;
pub mod cell;
pub mod overflow;
pub mod decode;

pub use cell::Cell;
pub use decode::{local_payload_len, Page, PageBody, PageDecoder, PageType, TreeKind};
pub use record::{serial_type_len, Text, Value};
pub use varint::{read_varint, varint_len, write_varint};
