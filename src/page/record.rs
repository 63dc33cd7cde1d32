//! page/record — serial types и типизированные значения записи.
//!
//! Serial type:
//!   0 NULL; 1,2,3,4 — знаковое целое 1/2/3/4 байта; 5 — 6 байт; 6 — 8 байт;
//!   7 — f64 big-endian; 8/9 — константы 0/1; 10,11 — зарезервированы (битые);
//!   N≥12 чётный — BLOB (N-12)/2 байт; N≥13 нечётный — TEXT (N-13)/2 байт.

use byteorder::{BigEndian, ByteOrder};
use std::borrow::Cow;

use crate::pager::TextEncoding;

/// Длина значения; None — тип вне перечисления.
#[inline]
pub fn serial_type_len(serial: u64) -> Option<usize> {
    match serial {
        0 | 8 | 9 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(3),
        4 => Some(4),
        5 => Some(6),
        6 | 7 => Some(8),
        10 | 11 => None,
        n => usize::try_from((n - 12) / 2).ok(),
    }
}

/// Текст записи как есть: байты в кодировке БД, без проверки и без перекодирования.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Text<'a> {
    bytes: &'a [u8],
    encoding: TextEncoding,
}

impl<'a> Text<'a> {
    pub fn new(bytes: &'a [u8], encoding: TextEncoding) -> Self {
        Self { bytes, encoding }
    }

    pub fn raw(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Для имён и вывода: невалидные последовательности заменяются на U+FFFD.
    pub fn to_string_lossy(&self) -> Cow<'a, str> {
        match self.encoding {
            TextEncoding::Utf8 => String::from_utf8_lossy(self.bytes),
            _ => Cow::Owned(String::from_utf16_lossy(&self.utf16_units())),
        }
    }

    /// Строгое декодирование. None — байты не образуют текст в своей кодировке
    /// (у UTF-16 сюда же относится нечётная длина).
    pub fn to_string_strict(&self) -> Option<String> {
        match self.encoding {
            TextEncoding::Utf8 => std::str::from_utf8(self.bytes).ok().map(str::to_owned),
            _ if self.bytes.len() % 2 != 0 => None,
            _ => String::from_utf16(&self.utf16_units()).ok(),
        }
    }

    fn utf16_units(&self) -> Vec<u16> {
        let le = self.encoding == TextEncoding::Utf16Le;
        self.bytes
            .chunks_exact(2)
            .map(|c| if le { u16::from_le_bytes([c[0], c[1]]) } else { u16::from_be_bytes([c[0], c[1]]) })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Integer32(i32),
    Integer64(i64),
    Real(f64),
    Text(Text<'a>),
    Blob(&'a [u8]),
}

impl<'a> Value<'a> {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer32(v) => Some(*v as i64),
            Value::Integer64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<Cow<'a, str>> {
        match self {
            Value::Text(t) => Some(t.to_string_lossy()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[inline]
fn read_signed(bytes: &[u8]) -> i64 {
    let mut v: u64 = 0;
    for b in bytes {
        v = (v << 8) | *b as u64;
    }
    let shift = 64 - 8 * bytes.len() as u32;
    ((v << shift) as i64) >> shift
}

/// Декодировать значение. `bytes` уже обрезан до serial_type_len(serial).
pub fn decode_value(serial: u64, bytes: &[u8], encoding: TextEncoding) -> Value<'_> {
    match serial {
        0 => Value::Null,
        1..=4 => Value::Integer32(read_signed(bytes) as i32),
        5 | 6 => Value::Integer64(read_signed(bytes)),
        7 => Value::Real(f64::from_bits(BigEndian::read_u64(bytes))),
        8 => Value::Integer32(0),
        9 => Value::Integer32(1),
        n if n % 2 == 0 => Value::Blob(bytes),
        _ => Value::Text(Text::new(bytes, encoding)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_lengths() {
        assert_eq!(serial_type_len(0), Some(0));
        assert_eq!(serial_type_len(5), Some(6));
        assert_eq!(serial_type_len(7), Some(8));
        assert_eq!(serial_type_len(10), None);
        assert_eq!(serial_type_len(11), None);
        assert_eq!(serial_type_len(12), Some(0));
        assert_eq!(serial_type_len(13), Some(0));
        assert_eq!(serial_type_len(23), Some(5));
        assert_eq!(serial_type_len(24), Some(6));
    }

    #[test]
    fn integers_are_sign_extended() {
        let u = TextEncoding::Utf8;
        assert_eq!(decode_value(1, &[0xff], u), Value::Integer32(-1));
        assert_eq!(decode_value(3, &[0x80, 0, 0], u), Value::Integer32(-8_388_608));
        assert_eq!(decode_value(5, &[0, 0, 0, 1, 0, 0], u), Value::Integer64(65536));
        assert_eq!(decode_value(6, &(-42i64).to_be_bytes(), u), Value::Integer64(-42));
        assert_eq!(decode_value(9, &[], u), Value::Integer32(1));
        assert_eq!(decode_value(7, &1.5f64.to_bits().to_be_bytes(), u), Value::Real(1.5));
    }

    #[test]
    fn text_respects_encoding() {
        assert_eq!(decode_value(19, b"abc", TextEncoding::Utf8).as_text().as_deref(), Some("abc"));
        let le = [b'h', 0, b'i', 0];
        assert_eq!(decode_value(21, &le, TextEncoding::Utf16Le).as_text().as_deref(), Some("hi"));
        let be = [0, b'h', 0, b'i'];
        assert_eq!(decode_value(21, &be, TextEncoding::Utf16Be).as_text().as_deref(), Some("hi"));
        assert_eq!(decode_value(16, &[1, 2], TextEncoding::Utf8), Value::Blob(&[1, 2]));
    }

    #[test]
    fn invalid_text_keeps_its_bytes() {
        let raw = [0x41u8, 0xff, 0x42];
        let t = match decode_value(19, &raw, TextEncoding::Utf8) {
            Value::Text(t) => t,
            v => panic!("text expected, got {:?}", v),
        };
        assert_eq!(t.raw(), &raw[..]);
        assert_eq!(t.to_string_strict(), None);
        assert_eq!(t.to_string_lossy(), "A\u{fffd}B");

        // нечётный хвост UTF-16 не отбрасывается молча
        let odd = Text::new(&[b'h', 0, b'i'], TextEncoding::Utf16Le);
        assert_eq!(odd.to_string_strict(), None);
        // непарный суррогат
        let lone = Text::new(&[0x00, 0xd8, b'a', 0], TextEncoding::Utf16Le);
        assert_eq!(lone.to_string_strict(), None);
        let ok = Text::new(&[0, b'o', 0, b'k'], TextEncoding::Utf16Be);
        assert_eq!(ok.to_string_strict().as_deref(), Some("ok"));
    }
}
