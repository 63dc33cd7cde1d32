//! wal/header — заголовок WAL (32 байта) и заголовок кадра (24 байта), big-endian.
//!
//! WAL header:
//!   [0..4)   magic (0x377f0682 | 0x377f0683)
//!   [4..8)   format version (3007000)
//!   [8..12)  page size
//!   [12..16) checkpoint sequence
//!   [16..24) salt1, salt2
//!   [24..32) checksum s1, s2 по байтам [0..24)
//!
//! Frame header:
//!   [0..4)   page number
//!   [4..8)   размер БД в страницах после коммита (0 — не коммит)
//!   [8..16)  salt1, salt2 (копия из заголовка)
//!   [16..24) checksum s1, s2

use byteorder::{BigEndian, ByteOrder};

use super::checksum::{wal_checksum, Checksum};
use crate::consts::{
    WAL_FORMAT_VERSION, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE, WAL_MAGIC_BE, WAL_MAGIC_LE,
};
use crate::error::{RepairError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Salt {
    pub salt1: u32,
    pub salt2: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub checkpoint_seq: u32,
    pub salt: Salt,
    pub checksum: Checksum,
}

impl WalHeader {
    pub fn big_endian_words(&self) -> bool {
        self.magic & 1 == 1
    }

    /// Разобрать и проверить заголовок: magic, версия, page size, checksum.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < WAL_HEADER_SIZE {
            return Err(RepairError::format(format!(
                "wal header too short: {} bytes",
                buf.len()
            )));
        }
        let magic = BigEndian::read_u32(&buf[0..4]);
        if magic != WAL_MAGIC_LE && magic != WAL_MAGIC_BE {
            return Err(RepairError::format(format!("bad wal magic {:#010x}", magic)));
        }
        let version = BigEndian::read_u32(&buf[4..8]);
        if version != WAL_FORMAT_VERSION {
            return Err(RepairError::format(format!("unsupported wal version {}", version)));
        }
        let h = WalHeader {
            magic,
            version,
            page_size: BigEndian::read_u32(&buf[8..12]),
            checkpoint_seq: BigEndian::read_u32(&buf[12..16]),
            salt: Salt {
                salt1: BigEndian::read_u32(&buf[16..20]),
                salt2: BigEndian::read_u32(&buf[20..24]),
            },
            checksum: Checksum::new(
                BigEndian::read_u32(&buf[24..28]),
                BigEndian::read_u32(&buf[28..32]),
            ),
        };
        let calc = wal_checksum(&buf[..24], Checksum::ZERO, h.big_endian_words());
        if calc != h.checksum {
            return Err(RepairError::checksum(format!(
                "wal header checksum mismatch (stored={:08x}{:08x}, calc={:08x}{:08x})",
                h.checksum.s1, h.checksum.s2, calc.s1, calc.s2
            )));
        }
        Ok(h)
    }

    /// Сериализовать с пересчётом checksum.
    pub fn encode(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.magic);
        BigEndian::write_u32(&mut buf[4..8], self.version);
        BigEndian::write_u32(&mut buf[8..12], self.page_size);
        BigEndian::write_u32(&mut buf[12..16], self.checkpoint_seq);
        BigEndian::write_u32(&mut buf[16..20], self.salt.salt1);
        BigEndian::write_u32(&mut buf[20..24], self.salt.salt2);
        let c = wal_checksum(&buf[..24], Checksum::ZERO, self.big_endian_words());
        BigEndian::write_u32(&mut buf[24..28], c.s1);
        BigEndian::write_u32(&mut buf[28..32], c.s2);
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub page_no: u32,
    pub commit_size: u32,
    pub salt: Salt,
    pub checksum: Checksum,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < WAL_FRAME_HEADER_SIZE {
            return None;
        }
        Some(FrameHeader {
            page_no: BigEndian::read_u32(&buf[0..4]),
            commit_size: BigEndian::read_u32(&buf[4..8]),
            salt: Salt {
                salt1: BigEndian::read_u32(&buf[8..12]),
                salt2: BigEndian::read_u32(&buf[12..16]),
            },
            checksum: Checksum::new(
                BigEndian::read_u32(&buf[16..20]),
                BigEndian::read_u32(&buf[20..24]),
            ),
        })
    }

    #[inline]
    pub fn is_commit(&self) -> bool {
        self.commit_size != 0
    }

    /// Собрать заголовок кадра, продолжив цепочку `prev` по заголовку и странице.
    /// Возвращает байты заголовка и новую сумму.
    pub fn encode(
        page_no: u32,
        commit_size: u32,
        salt: Salt,
        prev: Checksum,
        page: &[u8],
        big_endian_words: bool,
    ) -> ([u8; WAL_FRAME_HEADER_SIZE], Checksum) {
        let mut buf = [0u8; WAL_FRAME_HEADER_SIZE];
        BigEndian::write_u32(&mut buf[0..4], page_no);
        BigEndian::write_u32(&mut buf[4..8], commit_size);
        BigEndian::write_u32(&mut buf[8..12], salt.salt1);
        BigEndian::write_u32(&mut buf[12..16], salt.salt2);
        let c = wal_checksum(&buf[..8], prev, big_endian_words);
        let c = wal_checksum(page, c, big_endian_words);
        BigEndian::write_u32(&mut buf[16..20], c.s1);
        BigEndian::write_u32(&mut buf[20..24], c.s2);
        (buf, c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_parse() {
        let h = WalHeader {
            magic: WAL_MAGIC_LE,
            version: WAL_FORMAT_VERSION,
            page_size: 4096,
            checkpoint_seq: 7,
            salt: Salt { salt1: 0xdead, salt2: 0xbeef },
            checksum: Checksum::ZERO,
        };
        let bytes = h.encode();
        let back = WalHeader::parse(&bytes).unwrap();
        assert_eq!(back.page_size, 4096);
        assert_eq!(back.salt, h.salt);
        assert!(!back.big_endian_words());
    }

    #[test]
    fn header_checksum_mismatch_detected() {
        let h = WalHeader {
            magic: WAL_MAGIC_BE,
            version: WAL_FORMAT_VERSION,
            page_size: 1024,
            checkpoint_seq: 0,
            salt: Salt { salt1: 1, salt2: 2 },
            checksum: Checksum::ZERO,
        };
        let mut bytes = h.encode();
        bytes[17] ^= 0xff;
        let err = WalHeader::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Checksum);
    }
}
