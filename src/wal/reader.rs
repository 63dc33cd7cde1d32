//! wal/reader — последовательное чтение кадров SQLite WAL с проверкой накопительной суммы.
//!
//! Назначение:
//! - Wal::open() проверяет заголовок и один раз сканирует кадры, строя отображение
//!   page_no → последний кадр, попавший в закоммиченную транзакцию.
//! - Wal::frames() — ленивая конечная последовательность валидных кадров.
//!   Последовательность не перезапускается: для повторного прохода запросите новую.
//!
//! Правило остановки: первая же ошибка (соль, checksum, нулевой номер страницы,
//! усечённый кадр) прекращает последовательность. Суммы сцеплены, поэтому всё, что
//! после первой ошибки, считается отсутствующим — никакого "пропустить и продолжить".
//!
//! Хвост после последнего коммита (незавершённая транзакция) отбрасывается.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::checksum::{wal_checksum, Checksum};
use super::header::{FrameHeader, Salt, WalHeader};
use crate::consts::{WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE};
use crate::error::{Level, RepairError, Result};
use crate::file::FileAccess;
use crate::metrics::record_wal_frames;

/// Один валидный кадр WAL.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based номер кадра в файле.
    pub frame_no: u32,
    pub page_no: u32,
    /// Размер БД после коммита; 0 — кадр не коммитит транзакцию.
    pub commit_size: u32,
    pub salt: Salt,
    pub checksum: Checksum,
    pub data: Vec<u8>,
}

impl Frame {
    #[inline]
    pub fn is_commit(&self) -> bool {
        self.commit_size != 0
    }
}

pub struct Wal {
    file: FileAccess,
    header: WalHeader,
    page_size: usize,
    /// page_no → frame_no последнего закоммиченного образа
    pages: BTreeMap<u32, u32>,
    max_frame: u32,
    commit_size: u32,
    valid_frames: u32,
    disposed_frames: u32,
}

impl Wal {
    /// Открыть WAL. Ok(None) — лога нет или он пустой (эквивалентно отсутствию).
    pub fn open(path: &Path, page_size: u32, use_mmap: bool) -> Result<Option<Wal>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = FileAccess::open(path, use_mmap)
            .map_err(|e| e.with_level(Level::NotFatal))?;
        if file.len() < WAL_HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = {
            let raw = file.read(0, WAL_HEADER_SIZE)?;
            WalHeader::parse(&raw).map_err(|e| e.with_path(path).with_level(Level::NotFatal))?
        };
        if header.page_size != page_size {
            return Err(RepairError::format(format!(
                "wal page size {} differs from database page size {}",
                header.page_size, page_size
            ))
            .with_path(path)
            .with_level(Level::NotFatal));
        }

        let mut wal = Wal {
            file,
            header,
            page_size: page_size as usize,
            pages: BTreeMap::new(),
            max_frame: 0,
            commit_size: 0,
            valid_frames: 0,
            disposed_frames: 0,
        };
        wal.scan();
        Ok(Some(wal))
    }

    fn scan(&mut self) {
        let mut committed = BTreeMap::new();
        let mut pending: Vec<(u32, u32)> = Vec::new();
        let mut max_frame = 0;
        let mut commit_size = 0;
        let mut valid = 0;

        let mut frames = self.frames();
        for frame in frames.by_ref() {
            valid += 1;
            pending.push((frame.page_no, frame.frame_no));
            if frame.is_commit() {
                committed.extend(pending.drain(..));
                max_frame = frame.frame_no;
                commit_size = frame.commit_size;
            }
        }
        if let Some(e) = frames.failure() {
            log::warn!(
                "wal: valid log ends at frame {}, path={}, reason={}",
                valid,
                self.file.path().display(),
                e
            );
        }

        self.pages = committed;
        self.max_frame = max_frame;
        self.commit_size = commit_size;
        self.valid_frames = valid;
        self.disposed_frames = pending.len() as u32;
        record_wal_frames(valid as u64, self.disposed_frames as u64);
        log::debug!(
            "wal: scanned path={}, valid_frames={}, committed_max_frame={}, pages={}, disposed={}",
            self.file.path().display(),
            valid,
            max_frame,
            self.pages.len(),
            self.disposed_frames
        );
    }

    #[inline]
    fn frame_size(&self) -> usize {
        WAL_FRAME_HEADER_SIZE + self.page_size
    }

    #[inline]
    fn frame_offset(&self, frame_no: u32) -> u64 {
        WAL_HEADER_SIZE as u64 + (frame_no as u64 - 1) * self.frame_size() as u64
    }

    /// Новая последовательность кадров с начала лога.
    pub fn frames(&self) -> Frames<'_> {
        Frames {
            wal: self,
            next: 1,
            checksum: self.header.checksum,
            done: false,
            failure: None,
        }
    }

    pub fn header(&self) -> &WalHeader {
        &self.header
    }

    pub fn salt(&self) -> Salt {
        self.header.salt
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Номер последнего кадра, закрывающего транзакцию (0 — коммитов нет).
    pub fn max_frame(&self) -> u32 {
        self.max_frame
    }

    pub fn valid_frames(&self) -> u32 {
        self.valid_frames
    }

    pub fn disposed_frames(&self) -> u32 {
        self.disposed_frames
    }

    /// Размер БД (в страницах) по последнему коммиту.
    pub fn commit_size(&self) -> u32 {
        self.commit_size
    }

    pub fn max_page(&self) -> u32 {
        self.pages.keys().next_back().copied().unwrap_or(0)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn contains(&self, page_no: u32) -> bool {
        self.pages.contains_key(&page_no)
    }

    pub fn frame_of(&self, page_no: u32) -> Option<u32> {
        self.pages.get(&page_no).copied()
    }

    /// Образ страницы из последнего закоммиченного кадра, если он есть.
    pub fn page_data(&self, page_no: u32) -> Result<Option<Arc<[u8]>>> {
        let frame_no = match self.pages.get(&page_no) {
            Some(f) => *f,
            None => return Ok(None),
        };
        let off = self.frame_offset(frame_no) + WAL_FRAME_HEADER_SIZE as u64;
        let raw = self.file.read(off, self.page_size)?;
        if raw.len() != self.page_size {
            return Err(RepairError::corruption(format!("wal frame {} truncated", frame_no))
                .with_path(self.file.path())
                .with_page(page_no));
        }
        Ok(Some(Arc::from(&raw[..])))
    }
}

/// Ленивая последовательность валидных кадров.
pub struct Frames<'a> {
    wal: &'a Wal,
    next: u32,
    checksum: Checksum,
    done: bool,
    failure: Option<RepairError>,
}

impl<'a> Frames<'a> {
    /// Причина остановки, если это была не чистая граница файла.
    pub fn failure(&self) -> Option<&RepairError> {
        self.failure.as_ref()
    }

    fn stop(&mut self, failure: Option<RepairError>) -> Option<Frame> {
        self.done = true;
        self.failure = failure.map(|e| e.with_path(self.wal.file.path()));
        None
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }
        let frame_no = self.next;
        let size = self.wal.frame_size();
        let raw = match self.wal.file.read(self.wal.frame_offset(frame_no), size) {
            Ok(r) => r,
            Err(e) => return self.stop(Some(e)),
        };
        if raw.is_empty() {
            return self.stop(None);
        }
        if raw.len() < size {
            return self.stop(Some(RepairError::checksum(format!(
                "frame {} truncated ({} of {} bytes)",
                frame_no,
                raw.len(),
                size
            ))));
        }

        let hdr = match FrameHeader::parse(&raw[..WAL_FRAME_HEADER_SIZE]) {
            Some(h) => h,
            None => return self.stop(None),
        };
        if hdr.salt != self.wal.header.salt {
            return self.stop(Some(RepairError::checksum(format!(
                "frame {} salt mismatch",
                frame_no
            ))));
        }
        if hdr.page_no == 0 {
            return self.stop(Some(RepairError::corruption(format!(
                "frame {} has page number 0",
                frame_no
            ))));
        }

        let be = self.wal.header.big_endian_words();
        let c = wal_checksum(&raw[..8], self.checksum, be);
        let c = wal_checksum(&raw[WAL_FRAME_HEADER_SIZE..], c, be);
        if c != hdr.checksum {
            return self.stop(Some(
                RepairError::checksum(format!("frame {} checksum mismatch", frame_no))
                    .with_page(hdr.page_no),
            ));
        }

        self.checksum = c;
        self.next += 1;
        Some(Frame {
            frame_no,
            page_no: hdr.page_no,
            commit_size: hdr.commit_size,
            salt: hdr.salt,
            checksum: c,
            data: raw[WAL_FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{WAL_FORMAT_VERSION, WAL_MAGIC_LE};
    use crate::error::ErrorKind;
    use std::path::PathBuf;

    const PAGE: usize = 512;
    const SALT: Salt = Salt { salt1: 0x1234, salt2: 0x5678 };

    /// Лог из кадров (page_no, commit_size); образ страницы заполнен номером кадра.
    fn write_log(name: &str, frames: &[(u32, u32)]) -> PathBuf {
        let header = WalHeader {
            magic: WAL_MAGIC_LE,
            version: WAL_FORMAT_VERSION,
            page_size: PAGE as u32,
            checkpoint_seq: 0,
            salt: SALT,
            checksum: Checksum::ZERO,
        };
        let head = header.encode();
        let mut prev = WalHeader::parse(&head).unwrap().checksum;
        let mut out = head.to_vec();
        for (i, (page_no, commit)) in frames.iter().enumerate() {
            let page = vec![(i + 1) as u8; PAGE];
            let (fh, c) = FrameHeader::encode(*page_no, *commit, SALT, prev, &page, false);
            out.extend_from_slice(&fh);
            out.extend_from_slice(&page);
            prev = c;
        }
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!("salvage-wal-{}-{}-{}", name, std::process::id(), t));
        std::fs::write(&p, out).unwrap();
        p
    }

    fn frame_start(frame_no: u32) -> usize {
        WAL_HEADER_SIZE + (frame_no as usize - 1) * (WAL_FRAME_HEADER_SIZE + PAGE)
    }

    #[test]
    fn damaged_page_image_ends_the_log() {
        let p = write_log("mid", &[(2, 0), (3, 6), (4, 0), (5, 0), (6, 6)]);
        {
            let w = Wal::open(&p, PAGE as u32, false).unwrap().unwrap();
            assert_eq!(w.frames().map(|f| f.frame_no).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
            assert_eq!(w.max_frame(), 5);
        }

        // F3: один байт образа страницы; F4 и F5 сами по себе целы
        let mut bytes = std::fs::read(&p).unwrap();
        bytes[frame_start(3) + WAL_FRAME_HEADER_SIZE + 100] ^= 0x5a;
        std::fs::write(&p, &bytes).unwrap();

        let w = Wal::open(&p, PAGE as u32, true).unwrap().unwrap();
        let mut frames = w.frames();
        let seen: Vec<u32> = frames.by_ref().map(|f| f.frame_no).collect();
        assert_eq!(seen, vec![1, 2]);
        let failure = frames.failure().expect("failure must be reported");
        assert_eq!(failure.kind(), ErrorKind::Checksum);
        assert_eq!(failure.page(), Some(4));

        assert_eq!(w.valid_frames(), 2);
        assert_eq!(w.max_frame(), 2);
        assert_eq!(w.disposed_frames(), 0);
        assert!(w.contains(3));
        assert!(!w.contains(4));
        assert!(!w.contains(6));
        let _ = std::fs::remove_file(p);
    }

    #[test]
    fn uncommitted_tail_is_disposed() {
        let p = write_log("tail", &[(2, 0), (3, 4), (2, 0), (4, 5), (5, 0)]);
        let w = Wal::open(&p, PAGE as u32, false).unwrap().unwrap();
        assert_eq!(w.valid_frames(), 5);
        assert_eq!(w.max_frame(), 4);
        assert_eq!(w.commit_size(), 5);
        assert_eq!(w.disposed_frames(), 1);
        // последний закоммиченный образ страницы 2 — из кадра 3
        assert_eq!(w.frame_of(2), Some(3));
        assert_eq!(w.page_data(2).unwrap().unwrap()[0], 3);
        assert!(!w.contains(5));
        let mut frames = w.frames();
        assert_eq!(frames.by_ref().count(), 5);
        assert!(frames.failure().is_none());
        let _ = std::fs::remove_file(p);
    }

    #[test]
    fn foreign_salt_stops_the_log() {
        let p = write_log("salt", &[(2, 3), (3, 3)]);
        let mut bytes = std::fs::read(&p).unwrap();
        // salt1 второго кадра
        bytes[frame_start(2) + 8] ^= 0xff;
        std::fs::write(&p, &bytes).unwrap();
        let w = Wal::open(&p, PAGE as u32, false).unwrap().unwrap();
        let mut frames = w.frames();
        assert_eq!(frames.by_ref().count(), 1);
        assert_eq!(frames.failure().map(|e| e.kind()), Some(ErrorKind::Checksum));
        let _ = std::fs::remove_file(p);
    }
}
