//! page/overflow — сборка payload из overflow-цепочки.
//!
//! Overflow-страница: [next u32 BE][usable-4 байт данных]. next=0 — конец цепочки.
//!
//! Защита от зацикливания и мусорных указателей:
//! - номер страницы обязан быть в 1..=page_count;
//! - повторный визит страницы — петля;
//! - длина цепочки ограничена max_chain (RepairConfig::max_overflow_chain);
//! - цепочка обязана закончиться (next=0) ровно там, где кончился payload.

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashSet;

use crate::error::{RepairError, Result};
use crate::metrics::record_overflow_page;
use crate::pager::Pager;

pub fn read_overflow_chain(
    pager: &Pager,
    first: u32,
    local: &[u8],
    total: usize,
    max_chain: usize,
) -> Result<Vec<u8>> {
    let per_page = pager.usable_size() as usize - 4;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(local);

    let mut next = first;
    let mut seen: HashSet<u32> = HashSet::new();
    while out.len() < total {
        if next == 0 {
            return Err(RepairError::corruption(format!(
                "overflow chain ends early ({} of {} bytes)",
                out.len(),
                total
            )));
        }
        if next > pager.page_count() {
            return Err(RepairError::corruption(format!(
                "overflow page {} out of range",
                next
            )));
        }
        if !seen.insert(next) {
            return Err(RepairError::corruption(format!("overflow chain loops at page {}", next)));
        }
        if seen.len() > max_chain {
            return Err(RepairError::corruption(format!(
                "overflow chain longer than {} pages",
                max_chain
            )));
        }

        let data = pager.page(next)?;
        let take = (total - out.len()).min(per_page);
        out.extend_from_slice(&data[4..4 + take]);
        record_overflow_page();
        next = BigEndian::read_u32(&data[0..4]);
    }

    if next != 0 {
        return Err(RepairError::corruption(format!(
            "overflow chain continues past payload end (next={})",
            next
        )));
    }
    Ok(out)
}
