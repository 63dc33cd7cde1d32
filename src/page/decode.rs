//! page/decode — PageDecoder: образ страницы → Page (заголовок, указатели ячеек, тело).
//!
//! Заголовок B-tree страницы (у страницы 1 начинается со смещения 100):
//!   [0]     тип (0x02/0x05/0x0a/0x0d)
//!   [1..3)  первый freeblock
//!   [3..5)  число ячеек
//!   [5..7)  начало области содержимого
//!   [7]     фрагментированные байты
//!   [8..12) right-most pointer (только interior)
//! Далее массив u16 указателей ячеек (смещения от начала страницы).
//!
//! Декодер ничего не обходит: потомки interior-страницы возвращаются списком.
//! Неизвестный тип байта — не ошибка декодирования, а PageBody::Unknown; решает Crawler.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use std::sync::Arc;

use super::cell::{Cell, Payload};
use super::overflow::read_overflow_chain;
use super::varint::read_varint;
use crate::consts::*;
use crate::error::{RepairError, Result};
use crate::metrics::{record_page_corrupted, record_page_decoded};
use crate::pager::Pager;
use crate::util::page_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PageType {
    TableLeaf,
    TableInterior,
    IndexLeaf,
    IndexInterior,
    Overflow,
    Unknown,
}

/// К какому виду B-дерева принадлежит страница.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TreeKind {
    Table,
    Index,
}

impl PageType {
    pub fn from_byte(b: u8) -> PageType {
        match b {
            PAGE_TABLE_LEAF => PageType::TableLeaf,
            PAGE_TABLE_INTERIOR => PageType::TableInterior,
            PAGE_INDEX_LEAF => PageType::IndexLeaf,
            PAGE_INDEX_INTERIOR => PageType::IndexInterior,
            _ => PageType::Unknown,
        }
    }

    pub fn tree(self) -> Option<TreeKind> {
        match self {
            PageType::TableLeaf | PageType::TableInterior => Some(TreeKind::Table),
            PageType::IndexLeaf | PageType::IndexInterior => Some(TreeKind::Index),
            _ => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        matches!(self, PageType::TableLeaf | PageType::IndexLeaf)
    }

    pub fn is_interior(self) -> bool {
        matches!(self, PageType::TableInterior | PageType::IndexInterior)
    }

    /// Страница, чьи ячейки несут записи: листья обоих деревьев и interior индекса.
    pub fn carries_records(self) -> bool {
        matches!(self, PageType::TableLeaf | PageType::IndexLeaf | PageType::IndexInterior)
    }
}

#[derive(Debug, Clone)]
pub enum PageBody {
    TableLeaf,
    TableInterior { children: Vec<u32>, right_most: u32 },
    IndexLeaf,
    IndexInterior { children: Vec<u32>, right_most: u32 },
    Overflow { next: u32 },
    Unknown { type_byte: u8 },
}

#[derive(Debug, Clone)]
pub struct Page {
    number: u32,
    data: Arc<[u8]>,
    header_offset: usize,
    /// Конец массива указателей: ячейка не может начинаться раньше.
    pointers_end: usize,
    cell_pointers: Vec<usize>,
    freeblocks: Vec<(usize, usize)>,
    body: PageBody,
}

impl Page {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn kind(&self) -> PageType {
        match &self.body {
            PageBody::TableLeaf => PageType::TableLeaf,
            PageBody::TableInterior { .. } => PageType::TableInterior,
            PageBody::IndexLeaf => PageType::IndexLeaf,
            PageBody::IndexInterior { .. } => PageType::IndexInterior,
            PageBody::Overflow { .. } => PageType::Overflow,
            PageBody::Unknown { .. } => PageType::Unknown,
        }
    }

    pub fn body(&self) -> &PageBody {
        &self.body
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    pub fn cell_count(&self) -> usize {
        self.cell_pointers.len()
    }

    /// Смещения ячеек от начала страницы (как записаны, без проверки).
    pub fn cell_pointers(&self) -> &[usize] {
        &self.cell_pointers
    }

    /// Потомки interior-страницы слева направо, right-most последним.
    /// Нечитаемый указатель ячейки даёт 0 — Crawler отметит его как порчу.
    pub fn children(&self) -> Vec<u32> {
        match &self.body {
            PageBody::TableInterior { children, right_most }
            | PageBody::IndexInterior { children, right_most } => {
                let mut all = children.clone();
                all.push(*right_most);
                all
            }
            _ => Vec::new(),
        }
    }

    pub fn hash(&self) -> u32 {
        page_hash(&self.data)
    }

    fn in_freeblock(&self, offset: usize) -> bool {
        self.freeblocks.iter().any(|(s, e)| offset >= *s && offset < *e)
    }
}

/// Граница локальной части payload (SQLite maxLocal/minLocal).
pub fn local_payload_len(payload: u64, usable: u32, kind: PageType) -> usize {
    let u = usable as u64;
    let max_local = if kind == PageType::TableLeaf {
        u - 35
    } else {
        (u - 12) * 64 / 255 - 23
    };
    if payload <= max_local {
        return payload as usize;
    }
    let min_local = (u - 12) * 32 / 255 - 23;
    let k = min_local + (payload - min_local) % (u - 4);
    if k <= max_local {
        k as usize
    } else {
        min_local as usize
    }
}

pub struct PageDecoder<'a> {
    pager: &'a Pager,
}

impl<'a> PageDecoder<'a> {
    pub fn new(pager: &'a Pager) -> Self {
        Self { pager }
    }

    pub fn pager(&self) -> &'a Pager {
        self.pager
    }

    /// Прочитать и разобрать B-tree страницу.
    pub fn decode(&self, page_no: u32) -> Result<Page> {
        let res = self.decode_inner(page_no);
        match &res {
            Ok(_) => record_page_decoded(),
            Err(_) => record_page_corrupted(),
        }
        res.map_err(|e| e.with_page(page_no))
    }

    fn decode_inner(&self, page_no: u32) -> Result<Page> {
        let data = self.pager.page(page_no)?;
        let usable = self.pager.usable_size() as usize;
        let hoff = if page_no == MASTER_ROOT_PAGE { DB_HEADER_SIZE } else { 0 };

        let type_byte = data[hoff];
        let kind = PageType::from_byte(type_byte);
        if kind == PageType::Unknown {
            return Ok(Page {
                number: page_no,
                data,
                header_offset: hoff,
                pointers_end: hoff,
                cell_pointers: Vec::new(),
                freeblocks: Vec::new(),
                body: PageBody::Unknown { type_byte },
            });
        }

        let hsize = if kind.is_interior() { INTERIOR_HEADER_SIZE } else { LEAF_HEADER_SIZE };
        if hoff + hsize > usable {
            return Err(RepairError::corruption("page header beyond usable area"));
        }
        let first_freeblock = BigEndian::read_u16(&data[hoff + 1..hoff + 3]) as usize;
        let cell_count = BigEndian::read_u16(&data[hoff + 3..hoff + 5]) as usize;
        let pointers_end = hoff + hsize + 2 * cell_count;
        if pointers_end > usable {
            return Err(RepairError::corruption(format!(
                "cell pointer array ({} cells) overflows page",
                cell_count
            )));
        }

        let cell_pointers: Vec<usize> = (0..cell_count)
            .map(|i| {
                let at = hoff + hsize + 2 * i;
                BigEndian::read_u16(&data[at..at + 2]) as usize
            })
            .collect();

        let freeblocks = walk_freeblocks(&data, first_freeblock, pointers_end, usable);

        let mut page = Page {
            number: page_no,
            data,
            header_offset: hoff,
            pointers_end,
            cell_pointers,
            freeblocks,
            body: PageBody::TableLeaf,
        };

        page.body = match kind {
            PageType::TableLeaf => PageBody::TableLeaf,
            PageType::IndexLeaf => PageBody::IndexLeaf,
            PageType::TableInterior | PageType::IndexInterior => {
                let right_most = BigEndian::read_u32(&page.data[hoff + 8..hoff + 12]);
                let children = page
                    .cell_pointers
                    .iter()
                    .map(|&ptr| {
                        if self.pointer_ok(&page, ptr, 4, usable) {
                            BigEndian::read_u32(&page.data[ptr..ptr + 4])
                        } else {
                            0
                        }
                    })
                    .collect();
                if kind == PageType::TableInterior {
                    PageBody::TableInterior { children, right_most }
                } else {
                    PageBody::IndexInterior { children, right_most }
                }
            }
            PageType::Overflow | PageType::Unknown => PageBody::Unknown { type_byte },
        };
        Ok(page)
    }

    /// Разобрать страницу как overflow (у неё нет байта типа).
    pub fn decode_overflow(&self, page_no: u32) -> Result<Page> {
        let data = self.pager.page(page_no).map_err(|e| e.with_page(page_no))?;
        let next = BigEndian::read_u32(&data[0..4]);
        Ok(Page {
            number: page_no,
            data,
            header_offset: 0,
            pointers_end: 0,
            cell_pointers: Vec::new(),
            freeblocks: Vec::new(),
            body: PageBody::Overflow { next },
        })
    }

    fn pointer_ok(&self, page: &Page, ptr: usize, need: usize, usable: usize) -> bool {
        ptr >= page.pointers_end && ptr + need <= usable && !page.in_freeblock(ptr)
    }

    /// Разобрать ячейку `index`. Ошибка касается только этой ячейки.
    pub fn decode_cell(&self, page: &Page, index: usize) -> Result<Cell> {
        self.decode_cell_inner(page, index)
            .map_err(|e| e.with_page(page.number).with_cell(index))
    }

    fn decode_cell_inner(&self, page: &Page, index: usize) -> Result<Cell> {
        let kind = page.kind();
        if kind.tree().is_none() {
            return Err(RepairError::corruption(format!("page type {:?} has no cells", kind)));
        }
        let ptr = *page
            .cell_pointers
            .get(index)
            .ok_or_else(|| RepairError::corruption(format!("cell index {} out of range", index)))?;
        let usable = self.pager.usable_size() as usize;
        if !self.pointer_ok(page, ptr, 1, usable) {
            return Err(RepairError::corruption(format!("cell pointer {} invalid", ptr)));
        }
        let data = &page.data;
        let mut cur = ptr;

        let mut left_child = None;
        if kind.is_interior() {
            if cur + 4 > usable {
                return Err(RepairError::corruption("left child pointer truncated"));
            }
            left_child = Some(BigEndian::read_u32(&data[cur..cur + 4]));
            cur += 4;
        }

        if kind == PageType::TableInterior {
            let (key, _) = read_varint(&data[cur..usable])
                .ok_or_else(|| RepairError::corruption("interior key truncated"))?;
            return Ok(Cell::interior(page.number, index, left_child.unwrap_or(0), key as i64));
        }

        let (payload_len, n) = read_varint(&data[cur..usable])
            .ok_or_else(|| RepairError::corruption("payload length truncated"))?;
        cur += n;

        let mut rowid = None;
        if kind == PageType::TableLeaf {
            let (r, n) = read_varint(&data[cur..usable])
                .ok_or_else(|| RepairError::corruption("rowid truncated"))?;
            rowid = Some(r as i64);
            cur += n;
        }

        let file_bytes = self.pager.page_count() as u64 * self.pager.page_size() as u64;
        if payload_len > file_bytes {
            return Err(RepairError::corruption(format!(
                "payload length {} exceeds file size {}",
                payload_len, file_bytes
            )));
        }

        let local = local_payload_len(payload_len, usable as u32, kind);
        if cur + local > usable {
            return Err(RepairError::corruption(format!(
                "local payload [{}..{}) crosses page boundary",
                cur,
                cur + local
            )));
        }
        if page
            .freeblocks
            .iter()
            .any(|(s, _)| *s > ptr && *s < cur + local)
        {
            return Err(RepairError::corruption("cell overlaps a free block"));
        }

        let payload = if (local as u64) < payload_len {
            if cur + local + 4 > usable {
                return Err(RepairError::corruption("overflow pointer truncated"));
            }
            let first = BigEndian::read_u32(&data[cur + local..cur + local + 4]);
            let full = read_overflow_chain(
                self.pager,
                first,
                &data[cur..cur + local],
                payload_len as usize,
                self.pager.max_overflow_chain(),
            )?;
            Payload::Owned(full)
        } else {
            Payload::Local {
                data: page.data.clone(),
                start: cur,
                len: local,
            }
        };

        Cell::with_record(page.number, index, rowid, left_child, payload, self.pager.encoding())
    }
}

/// Список свободных блоков. Цепочка обязана строго возрастать и лежать
/// за массивом указателей; при нарушении обход просто прекращается.
fn walk_freeblocks(data: &[u8], first: usize, pointers_end: usize, usable: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut off = first;
    let mut prev = 0usize;
    while off != 0 {
        if off <= prev || off < pointers_end || off + 4 > usable {
            break;
        }
        let size = BigEndian::read_u16(&data[off + 2..off + 4]) as usize;
        if size < 4 || off + size > usable {
            break;
        }
        out.push((off, off + size));
        prev = off;
        off = BigEndian::read_u16(&data[off..off + 2]) as usize;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_payload_thresholds() {
        // usable 4096: maxLocal(table leaf)=4061, minLocal=489
        assert_eq!(local_payload_len(100, 4096, PageType::TableLeaf), 100);
        assert_eq!(local_payload_len(4061, 4096, PageType::TableLeaf), 4061);
        // 5000: k = 489 + (5000-489) % 4092 = 489 + 419 = 908
        assert_eq!(local_payload_len(5000, 4096, PageType::TableLeaf), 908);
        // 16383: k = 489 + 15894 % 4092 = 4107 > maxLocal → minLocal
        assert_eq!(local_payload_len(16383, 4096, PageType::TableLeaf), 489);
        // индексные страницы: maxLocal = (4084*64/255)-23 = 1002
        assert_eq!(local_payload_len(1002, 4096, PageType::IndexLeaf), 1002);
        assert!(local_payload_len(1003, 4096, PageType::IndexLeaf) < 1003);
    }

    #[test]
    fn freeblock_walk_stops_on_loops() {
        let mut page = vec![0u8; 512];
        // блок 100 → 200 → 100 (петля назад)
        BigEndian::write_u16(&mut page[100..102], 200);
        BigEndian::write_u16(&mut page[102..104], 8);
        BigEndian::write_u16(&mut page[200..202], 100);
        BigEndian::write_u16(&mut page[202..204], 16);
        let blocks = walk_freeblocks(&page, 100, 20, 512);
        assert_eq!(blocks, vec![(100, 108), (200, 216)]);
    }

    #[test]
    fn type_bytes() {
        assert_eq!(PageType::from_byte(0x0d), PageType::TableLeaf);
        assert_eq!(PageType::from_byte(0x05).tree(), Some(TreeKind::Table));
        assert_eq!(PageType::from_byte(0x02).tree(), Some(TreeKind::Index));
        assert_eq!(PageType::from_byte(0x00), PageType::Unknown);
        assert!(PageType::IndexLeaf.is_leaf());
        assert!(PageType::IndexInterior.carries_records());
        assert!(!PageType::TableInterior.carries_records());
    }
}
