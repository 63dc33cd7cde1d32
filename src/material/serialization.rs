//! material/serialization — примитивы бинарного формата material.
//!
//! Фиксированные целые — big-endian, длины и номера страниц — SQLite varint,
//! знаковые значения — zigzag поверх varint. Строки: varint длины + UTF-8 байты.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{RepairError, Result};
use crate::page::{read_varint, write_varint};

#[derive(Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        let mut b = [0u8; 4];
        BigEndian::write_u32(&mut b, v);
        self.buf.extend_from_slice(&b);
    }

    pub fn put_varint(&mut self, v: u64) {
        write_varint(&mut self.buf, v);
    }

    pub fn put_zigzag(&mut self, v: i64) {
        self.put_varint(((v << 1) ^ (v >> 63)) as u64);
    }

    pub fn put_sized(&mut self, bytes: &[u8]) {
        self.put_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_sized(s.as_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Чтение с проверкой границ: выход за конец — CorruptionError.
#[derive(Debug)]
pub struct Deserializer<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> Deserializer<'b> {
    pub fn new(buf: &'b [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'b [u8]> {
        if n > self.remaining() {
            return Err(RepairError::corruption(format!(
                "material truncated at {} (need {}, have {})",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn get_varint(&mut self) -> Result<u64> {
        let (v, n) = read_varint(&self.buf[self.pos..])
            .ok_or_else(|| RepairError::corruption(format!("material varint truncated at {}", self.pos)))?;
        self.pos += n;
        Ok(v)
    }

    pub fn get_zigzag(&mut self) -> Result<i64> {
        let v = self.get_varint()?;
        Ok(((v >> 1) as i64) ^ -((v & 1) as i64))
    }

    pub fn get_sized(&mut self) -> Result<&'b [u8]> {
        let len = self.get_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| RepairError::corruption(format!("material length {} too large", len)))?;
        self.take(len)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_sized()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| RepairError::corruption(format!("material string is not UTF-8 at {}", self.pos)))
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'b [u8]> {
        self.take(n)
    }
}
