//! wal/checksum — двухсловная накопительная контрольная сумма SQLite WAL.
//!
//! Данные читаются 8-байтовыми шагами (два u32), порядок байт слов задаётся
//! младшим битом magic: 0x377f0682 → little-endian, 0x377f0683 → big-endian.
//!   s1 += w0 + s2
//!   s2 += w1 + s1
//! Все сложения — с переполнением (wrapping).

use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checksum {
    pub s1: u32,
    pub s2: u32,
}

impl Checksum {
    pub const ZERO: Checksum = Checksum { s1: 0, s2: 0 };

    pub fn new(s1: u32, s2: u32) -> Self {
        Self { s1, s2 }
    }
}

/// Продолжить сумму `seed` по `data`. Хвост, не кратный 8, не учитывается
/// (в корректном WAL его не бывает: 8 байт заголовка кадра + страница).
pub fn wal_checksum(data: &[u8], seed: Checksum, big_endian_words: bool) -> Checksum {
    let mut s1 = seed.s1;
    let mut s2 = seed.s2;
    for chunk in data.chunks_exact(8) {
        let (w0, w1) = if big_endian_words {
            (BigEndian::read_u32(&chunk[..4]), BigEndian::read_u32(&chunk[4..]))
        } else {
            (LittleEndian::read_u32(&chunk[..4]), LittleEndian::read_u32(&chunk[4..]))
        };
        s1 = s1.wrapping_add(w0).wrapping_add(s2);
        s2 = s2.wrapping_add(w1).wrapping_add(s1);
    }
    Checksum { s1, s2 }
}
