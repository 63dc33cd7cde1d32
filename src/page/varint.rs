//! page/varint — SQLite varint: 1..9 байт, big-endian группы по 7 бит,
//! девятый байт (если дошли) несёт все 8 бит.

/// Прочитать varint из начала `buf`. None — буфер кончился раньше varint.
#[inline]
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    for i in 0..8 {
        let b = *buf.get(i)?;
        v = (v << 7) | (b & 0x7f) as u64;
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
    }
    let b = *buf.get(8)?;
    Some(((v << 8) | b as u64, 9))
}

pub fn varint_len(v: u64) -> usize {
    if v > 0x00ff_ffff_ffff_ffff {
        return 9;
    }
    let mut n = 1;
    let mut x = v >> 7;
    while x != 0 {
        n += 1;
        x >>= 7;
    }
    n
}

/// Дописать varint в конец `out`; возвращает число байт.
pub fn write_varint(out: &mut Vec<u8>, v: u64) -> usize {
    if v > 0x00ff_ffff_ffff_ffff {
        let mut buf = [0u8; 9];
        buf[8] = v as u8;
        let mut x = v >> 8;
        for i in (0..8).rev() {
            buf[i] = ((x & 0x7f) as u8) | 0x80;
            x >>= 7;
        }
        out.extend_from_slice(&buf);
        return 9;
    }

    let mut tmp = [0u8; 9];
    let mut n = 0;
    let mut x = v;
    loop {
        tmp[n] = ((x & 0x7f) as u8) | 0x80;
        n += 1;
        x >>= 7;
        if x == 0 {
            break;
        }
    }
    // младшая группа идёт последней и без бита продолжения
    tmp[0] &= 0x7f;
    for i in (0..n).rev() {
        out.push(tmp[i]);
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x81, 0x00]),
            (16383, &[0xff, 0x7f]),
            (2_097_151, &[0xff, 0xff, 0x7f]),
        ];
        for (v, bytes) in cases {
            let mut out = Vec::new();
            assert_eq!(write_varint(&mut out, *v), bytes.len());
            assert_eq!(&out[..], *bytes);
            assert_eq!(read_varint(bytes), Some((*v, bytes.len())));
            assert_eq!(varint_len(*v), bytes.len());
        }
    }

    #[test]
    fn nine_byte_form_keeps_all_bits() {
        for v in [u64::MAX, 1u64 << 63, 0x0100_0000_0000_0000] {
            let mut out = Vec::new();
            assert_eq!(write_varint(&mut out, v), 9);
            assert_eq!(read_varint(&out), Some((v, 9)));
        }
        // отрицательный rowid хранится как u64
        let mut out = Vec::new();
        write_varint(&mut out, (-5i64) as u64);
        assert_eq!(read_varint(&out).map(|(v, _)| v as i64), Some(-5));
    }

    #[test]
    fn truncated_input_is_none() {
        assert_eq!(read_varint(&[]), None);
        assert_eq!(read_varint(&[0x81]), None);
        assert_eq!(read_varint(&[0xff; 8]), None);
    }
}
