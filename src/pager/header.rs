//! pager/header — 100-байтовый заголовок файла БД.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::consts::*;
use crate::error::{RepairError, Result};

/// Кодировка текстовых значений в записях.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbHeader {
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_bytes: u8,
    pub change_counter: u32,
    /// Размер БД в страницах по заголовку (может врать у битых файлов).
    pub page_count: u32,
    pub freelist_trunk: u32,
    pub schema_cookie: u32,
    pub encoding: TextEncoding,
}

impl DbHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < DB_HEADER_SIZE {
            return Err(RepairError::format(format!(
                "database header too short: {} bytes",
                buf.len()
            )));
        }
        if &buf[..16] != DB_HEADER_MAGIC {
            return Err(RepairError::format("not a SQLite database (bad magic)"));
        }

        let raw_ps = BigEndian::read_u16(&buf[DB_OFF_PAGE_SIZE..DB_OFF_PAGE_SIZE + 2]) as u32;
        let page_size = if raw_ps == 1 { MAX_PAGE_SIZE } else { raw_ps };
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
            return Err(RepairError::format(format!("invalid page size {}", page_size)));
        }

        let reserved_bytes = buf[DB_OFF_RESERVED];
        // usable size не может быть меньше 480 (ограничение формата)
        if page_size - (reserved_bytes as u32) < 480 {
            return Err(RepairError::format(format!(
                "reserved bytes {} leave too little usable space",
                reserved_bytes
            )));
        }

        let encoding = match BigEndian::read_u32(&buf[DB_OFF_TEXT_ENCODING..DB_OFF_TEXT_ENCODING + 4]) {
            2 => TextEncoding::Utf16Le,
            3 => TextEncoding::Utf16Be,
            // 0 встречается у пустых БД; всё прочее трактуем как UTF-8
            _ => TextEncoding::Utf8,
        };

        Ok(DbHeader {
            page_size,
            write_version: buf[DB_OFF_WRITE_VERSION],
            read_version: buf[DB_OFF_READ_VERSION],
            reserved_bytes,
            change_counter: BigEndian::read_u32(&buf[DB_OFF_CHANGE_COUNTER..DB_OFF_CHANGE_COUNTER + 4]),
            page_count: BigEndian::read_u32(&buf[DB_OFF_PAGE_COUNT..DB_OFF_PAGE_COUNT + 4]),
            freelist_trunk: BigEndian::read_u32(&buf[DB_OFF_FREELIST_TRUNK..DB_OFF_FREELIST_TRUNK + 4]),
            schema_cookie: BigEndian::read_u32(&buf[DB_OFF_SCHEMA_COOKIE..DB_OFF_SCHEMA_COOKIE + 4]),
            encoding,
        })
    }

    /// Заголовок по известной геометрии, когда свой не читается (страница 1 разрушена).
    pub fn assumed(page_size: u32, reserved_bytes: u8) -> Result<Self> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
            return Err(RepairError::format(format!("invalid page size {}", page_size)));
        }
        Ok(DbHeader {
            page_size,
            write_version: 1,
            read_version: 1,
            reserved_bytes,
            change_counter: 0,
            page_count: 0,
            freelist_trunk: 0,
            schema_cookie: 0,
            encoding: TextEncoding::Utf8,
        })
    }

    #[inline]
    pub fn usable_size(&self) -> u32 {
        self.page_size - self.reserved_bytes as u32
    }
}
