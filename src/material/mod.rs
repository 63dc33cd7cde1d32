//! material — снимок структуры БД для восстановления без обхода каталога.
//!
//! Файл:
//!   [magic u32 "SVMT"][version u32]
//!   [page_size u32][reserved_bytes u32][wal_salt1 u32][wal_salt2 u32][wal_frames u32][sequence_root u32]
//!   [codec u8][crc32 u32 тела как оно лежит в файле][body_len u32][body]
//!
//! Тело (после распаковки):
//!   varint N таблиц, затем на каждую:
//!     sized name, varint root_page, sized sql,
//!     varint M + M × sized associated sql,
//!     varint P + P × (varint page_no, u32 xxh32 страницы),
//!     u8 флаг + [zigzag varint sequence].
//!
//! Кодирование детерминировано: два снимка неизменного файла совпадают байт в байт.
//! Запись — через временный файл и rename.

pub mod codec;
pub mod serialization;

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::consts::{MATERIAL_CODEC_NONE, MATERIAL_CODEC_ZSTD, MATERIAL_MAGIC, MATERIAL_VERSION};
use crate::error::{Level, RepairError, Result};
use crate::metrics::{record_material_rejected, record_material_written};
use crate::util::with_suffix;
use serialization::{Deserializer, Serializer};

/// Фиксированная часть заголовка до тела.
const PREAMBLE_LEN: usize = 4 * 2 + 4 * 6 + 1 + 4 + 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaterialInfo {
    pub page_size: u32,
    pub reserved_bytes: u32,
    pub wal_salt1: u32,
    pub wal_salt2: u32,
    pub wal_frames: u32,
    pub sequence_root: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifiedPage {
    pub number: u32,
    pub hash: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Content {
    pub table_name: String,
    pub root_page: u32,
    pub sql: String,
    pub associated: Vec<String>,
    pub pages: Vec<VerifiedPage>,
    pub sequence: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Material {
    pub info: MaterialInfo,
    pub contents: Vec<Content>,
}

impl Material {
    pub fn new(info: MaterialInfo) -> Self {
        Self { info, contents: Vec::new() }
    }

    pub fn content(&self, table: &str) -> Option<&Content> {
        self.contents.iter().find(|c| c.table_name == table)
    }

    pub fn page_count(&self) -> usize {
        self.contents.iter().map(|c| c.pages.len()).sum()
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut s = Serializer::new();
        s.put_varint(self.contents.len() as u64);
        for c in &self.contents {
            s.put_str(&c.table_name);
            s.put_varint(c.root_page as u64);
            s.put_str(&c.sql);
            s.put_varint(c.associated.len() as u64);
            for a in &c.associated {
                s.put_str(a);
            }
            s.put_varint(c.pages.len() as u64);
            for p in &c.pages {
                s.put_varint(p.number as u64);
                s.put_u32(p.hash);
            }
            match c.sequence {
                Some(seq) => {
                    s.put_u8(1);
                    s.put_zigzag(seq);
                }
                None => s.put_u8(0),
            }
        }
        s.finish()
    }

    fn decode_body(body: &[u8]) -> Result<Vec<Content>> {
        let mut d = Deserializer::new(body);
        let tables = d.get_varint()?;
        let mut contents = Vec::new();
        for _ in 0..tables {
            let table_name = d.get_string()?;
            let root_page = page_number(d.get_varint()?)?;
            let sql = d.get_string()?;
            let n_assoc = d.get_varint()?;
            let mut associated = Vec::new();
            for _ in 0..n_assoc {
                associated.push(d.get_string()?);
            }
            let n_pages = d.get_varint()?;
            let mut pages = Vec::new();
            for _ in 0..n_pages {
                let number = page_number(d.get_varint()?)?;
                let hash = d.get_u32()?;
                pages.push(VerifiedPage { number, hash });
            }
            let sequence = match d.get_u8()? {
                0 => None,
                1 => Some(d.get_zigzag()?),
                f => return Err(RepairError::corruption(format!("material sequence flag {}", f))),
            };
            contents.push(Content { table_name, root_page, sql, associated, pages, sequence });
        }
        if !d.is_exhausted() {
            return Err(RepairError::corruption(format!(
                "material body has {} trailing bytes",
                d.remaining()
            )));
        }
        Ok(contents)
    }

    pub fn encode(&self, compress: bool) -> Result<Vec<u8>> {
        let codec = if compress { MATERIAL_CODEC_ZSTD } else { MATERIAL_CODEC_NONE };
        let stored = codec::encode_body(codec, &self.encode_body())?;
        let mut crc = crc32fast::Hasher::new();
        crc.update(&stored);

        let mut s = Serializer::new();
        s.put_u32(MATERIAL_MAGIC);
        s.put_u32(MATERIAL_VERSION);
        let i = &self.info;
        for v in [i.page_size, i.reserved_bytes, i.wal_salt1, i.wal_salt2, i.wal_frames, i.sequence_root] {
            s.put_u32(v);
        }
        s.put_u8(codec);
        s.put_u32(crc.finalize());
        s.put_u32(stored.len() as u32);
        s.put_bytes(&stored);
        Ok(s.finish())
    }

    /// Magic/версия не те — FormatError; тело не сходится с crc — CorruptionError.
    pub fn decode(bytes: &[u8]) -> Result<Material> {
        if bytes.len() < PREAMBLE_LEN {
            return Err(RepairError::format(format!("material too short ({} bytes)", bytes.len())));
        }
        let mut d = Deserializer::new(bytes);
        let magic = d.get_u32()?;
        if magic != MATERIAL_MAGIC {
            return Err(RepairError::format(format!("bad material magic {:08x}", magic)));
        }
        let version = d.get_u32()?;
        if version != MATERIAL_VERSION {
            return Err(RepairError::format(format!(
                "material version {} (expected {})",
                version, MATERIAL_VERSION
            )));
        }
        let info = MaterialInfo {
            page_size: d.get_u32()?,
            reserved_bytes: d.get_u32()?,
            wal_salt1: d.get_u32()?,
            wal_salt2: d.get_u32()?,
            wal_frames: d.get_u32()?,
            sequence_root: d.get_u32()?,
        };
        let codec = d.get_u8()?;
        let crc_expected = d.get_u32()?;
        let body_len = d.get_u32()? as usize;
        let stored = d.get_bytes(body_len)?;
        if !d.is_exhausted() {
            return Err(RepairError::corruption("material has bytes after body"));
        }
        let mut crc = crc32fast::Hasher::new();
        crc.update(stored);
        let actual = crc.finalize();
        if actual != crc_expected {
            return Err(RepairError::corruption(format!(
                "material crc32 {:08x} != {:08x}",
                actual, crc_expected
            )));
        }
        let body = codec::decode_body(codec, stored)?;
        let contents = Self::decode_body(&body)?;
        Ok(Material { info, contents })
    }

    /// Записать через "<path>.tmp" + rename.
    pub fn write_to(&self, path: &Path, compress: bool) -> Result<()> {
        let bytes = self.encode(compress)?;
        let tmp = with_suffix(path, ".tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(|e| RepairError::io(&tmp, e))?;
            f.write_all(&bytes).map_err(|e| RepairError::io(&tmp, e))?;
            f.sync_all().map_err(|e| RepairError::io(&tmp, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| RepairError::io(path, e))?;
        record_material_written();
        log::debug!(
            "material: wrote path={}, tables={}, pages={}, bytes={}",
            path.display(),
            self.contents.len(),
            self.page_count(),
            bytes.len()
        );
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Material> {
        let bytes = fs::read(path).map_err(|e| RepairError::io(path, e))?;
        Material::decode(&bytes).map_err(|e| {
            record_material_rejected();
            e.with_path(path).with_level(Level::NotFatal)
        })
    }
}

fn page_number(v: u64) -> Result<u32> {
    u32::try_from(v).map_err(|_| RepairError::corruption(format!("material page number {} out of range", v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> Material {
        let mut m = Material::new(MaterialInfo {
            page_size: 4096,
            reserved_bytes: 0,
            wal_salt1: 1,
            wal_salt2: 2,
            wal_frames: 3,
            sequence_root: 4,
        });
        m.contents.push(Content {
            table_name: "t".into(),
            root_page: 2,
            sql: "CREATE TABLE t(a)".into(),
            associated: vec!["CREATE INDEX ti ON t(a)".into()],
            pages: vec![VerifiedPage { number: 2, hash: 0xabcd }, VerifiedPage { number: 9, hash: 1 }],
            sequence: Some(-7),
        });
        m
    }

    #[test]
    fn encode_is_deterministic() {
        let m = sample();
        assert_eq!(m.encode(true).unwrap(), m.encode(true).unwrap());
        assert_eq!(Material::decode(&m.encode(false).unwrap()).unwrap(), m);
    }

    #[test]
    fn version_mismatch_is_format_error() {
        let mut bytes = sample().encode(false).unwrap();
        bytes[7] = 2;
        assert_eq!(Material::decode(&bytes).unwrap_err().kind(), ErrorKind::Format);
        bytes[0] = 0;
        assert_eq!(Material::decode(&bytes).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn flipped_body_byte_is_corruption() {
        let mut bytes = sample().encode(false).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xff;
        assert_eq!(Material::decode(&bytes).unwrap_err().kind(), ErrorKind::Corruption);
    }
}
