//! page/cell — одна запись (строка таблицы или элемент индекса) внутри страницы.
//!
//! Cell хранит payload целиком (локальный — как срез разделяемого образа страницы,
//! с overflow — собранный буфер) и смещения колонок. Значения декодируются лениво.
//!
//! Запись: varint размера заголовка (включая сам varint), serial types, затем тела
//! значений. Курсоры заголовка и тел обязаны закончиться ровно на своих границах,
//! иначе ячейка битая.

use std::sync::Arc;

use super::record::{decode_value, serial_type_len, Value};
use super::varint::read_varint;
use crate::error::{RepairError, Result};
use crate::pager::TextEncoding;

#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Local { data: Arc<[u8]>, start: usize, len: usize },
    Owned(Vec<u8>),
}

impl Payload {
    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Payload::Local { data, start, len } => &data[*start..*start + *len],
            Payload::Owned(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Column {
    serial: u64,
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone)]
pub struct Cell {
    page_no: u32,
    index: usize,
    rowid: Option<i64>,
    left_child: Option<u32>,
    payload: Payload,
    columns: Vec<Column>,
    encoding: TextEncoding,
}

impl Cell {
    /// Ячейка interior-страницы таблицы: только левый потомок и ключ, без payload.
    pub(crate) fn interior(page_no: u32, index: usize, left_child: u32, rowid: i64) -> Self {
        Cell {
            page_no,
            index,
            rowid: Some(rowid),
            left_child: Some(left_child),
            payload: Payload::Owned(Vec::new()),
            columns: Vec::new(),
            encoding: TextEncoding::Utf8,
        }
    }

    /// Разобрать заголовок записи и проверить согласованность смещений.
    pub(crate) fn with_record(
        page_no: u32,
        index: usize,
        rowid: Option<i64>,
        left_child: Option<u32>,
        payload: Payload,
        encoding: TextEncoding,
    ) -> Result<Self> {
        let columns = {
            let bytes = payload.bytes();
            parse_record_header(bytes)
                .map_err(|e| e.with_page(page_no).with_cell(index))?
        };
        Ok(Cell {
            page_no,
            index,
            rowid,
            left_child,
            payload,
            columns,
            encoding,
        })
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    /// Индекс в массиве указателей ячеек страницы.
    pub fn index(&self) -> usize {
        self.index
    }

    /// rowid для ячеек таблиц, None для индексов.
    pub fn rowid(&self) -> Option<i64> {
        self.rowid
    }

    pub fn left_child(&self) -> Option<u32> {
        self.left_child
    }

    /// Число колонок в записи.
    pub fn count(&self) -> usize {
        self.columns.len()
    }

    pub fn serial_type(&self, i: usize) -> Option<u64> {
        self.columns.get(i).map(|c| c.serial)
    }

    pub fn value(&self, i: usize) -> Option<Value<'_>> {
        let c = self.columns.get(i)?;
        let bytes = &self.payload.bytes()[c.offset..c.offset + c.len];
        Some(decode_value(c.serial, bytes, self.encoding))
    }

    pub fn values(&self) -> Vec<Value<'_>> {
        (0..self.columns.len()).filter_map(|i| self.value(i)).collect()
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.bytes()
    }
}

fn parse_record_header(bytes: &[u8]) -> Result<Vec<Column>> {
    let (header_size, n) =
        read_varint(bytes).ok_or_else(|| RepairError::corruption("record header size truncated"))?;
    let header_size = header_size as usize;
    if header_size < n || header_size > bytes.len() {
        return Err(RepairError::corruption(format!(
            "record header size {} out of payload {}",
            header_size,
            bytes.len()
        )));
    }

    let mut columns = Vec::new();
    let mut cur_type = n;
    let mut cur_value = header_size;
    while cur_type < header_size {
        let (serial, len) = read_varint(&bytes[cur_type..header_size])
            .ok_or_else(|| RepairError::corruption("serial type truncated"))?;
        let vlen = serial_type_len(serial)
            .ok_or_else(|| RepairError::corruption(format!("reserved serial type {}", serial)))?;
        if cur_value + vlen > bytes.len() {
            return Err(RepairError::corruption(format!(
                "value end {} exceeds payload {}",
                cur_value + vlen,
                bytes.len()
            )));
        }
        columns.push(Column {
            serial,
            offset: cur_value,
            len: vlen,
        });
        cur_type += len;
        cur_value += vlen;
    }

    if cur_type != header_size || cur_value != bytes.len() {
        return Err(RepairError::corruption(format!(
            "record sizes disagree (types end {} of {}, values end {} of {})",
            cur_type,
            header_size,
            cur_value,
            bytes.len()
        )));
    }
    Ok(columns)
}
