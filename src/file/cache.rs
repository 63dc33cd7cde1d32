//! O(1) LRU cache for decoded page images.
//!
//! Design:
//! - HashMap<page_no, Entry> stores the shared page bytes and doubly-linked pointers (prev/next by page_no).
//! - head = MRU, tail = LRU.
//! - get() moves the node to head and hands out a clone of the Arc.
//! - put() updates existing (move to head) or inserts a new head, evicting tail if over capacity.
//!
//! Bounded by page count, not bytes. One cache per Pager; never shared across passes.
//! Capacity=0 disables the cache (no-op).

use std::collections::HashMap;
use std::sync::Arc;

use crate::metrics::{record_cache_hit, record_cache_miss};

pub(crate) struct PageCache {
    cap: usize,
    map: HashMap<u32, Entry>,
    head: Option<u32>, // Most-recently used
    tail: Option<u32>, // Least-recently used
}

struct Entry {
    data: Arc<[u8]>,
    prev: Option<u32>,
    next: Option<u32>,
}

impl PageCache {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap,
            map: HashMap::with_capacity(cap.min(4096).max(1)),
            head: None,
            tail: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Hit moves the entry to MRU; misses are counted in metrics.
    pub(crate) fn get(&mut self, page_no: u32) -> Option<Arc<[u8]>> {
        if self.cap == 0 {
            return None;
        }
        let data = match self.map.get(&page_no) {
            Some(e) => e.data.clone(),
            None => {
                record_cache_miss();
                return None;
            }
        };
        self.detach(page_no);
        self.attach_front(page_no);
        record_cache_hit();
        Some(data)
    }

    /// Insert or replace; evicts the LRU entry when full.
    pub(crate) fn put(&mut self, page_no: u32, data: Arc<[u8]>) {
        if self.cap == 0 {
            return;
        }

        if let Some(e) = self.map.get_mut(&page_no) {
            e.data = data;
            self.detach(page_no);
            self.attach_front(page_no);
            return;
        }

        if self.map.len() >= self.cap {
            if let Some(victim) = self.tail {
                self.detach(victim);
                self.map.remove(&victim);
            }
        }

        self.map.insert(
            page_no,
            Entry {
                data,
                prev: None,
                next: None,
            },
        );
        self.attach_front(page_no);
    }

    // ---------------- internal helpers ----------------

    fn detach(&mut self, page_no: u32) {
        let (prev, next) = match self.map.get(&page_no) {
            Some(e) => (e.prev, e.next),
            None => return,
        };

        if self.head == Some(page_no) {
            self.head = next;
        }
        if self.tail == Some(page_no) {
            self.tail = prev;
        }

        if let Some(p) = prev {
            if let Some(pe) = self.map.get_mut(&p) {
                pe.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(ne) = self.map.get_mut(&n) {
                ne.prev = prev;
            }
        }

        if let Some(e) = self.map.get_mut(&page_no) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, page_no: u32) {
        if self.head == Some(page_no) {
            return;
        }

        if let Some(e) = self.map.get_mut(&page_no) {
            e.prev = None;
            e.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(he) = self.map.get_mut(&old_head) {
                he.prev = Some(page_no);
            }
        }
        self.head = Some(page_no);
        if self.tail.is_none() {
            self.tail = Some(page_no);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(b: u8) -> Arc<[u8]> {
        Arc::from(vec![b; 16])
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut c = PageCache::new(2);
        c.put(1, page(1));
        c.put(2, page(2));
        // 1 становится MRU, вытесняться должна 2
        assert!(c.get(1).is_some());
        c.put(3, page(3));
        assert_eq!(c.len(), 2);
        assert!(c.get(2).is_none());
        assert_eq!(c.get(1).map(|d| d[0]), Some(1));
        assert_eq!(c.get(3).map(|d| d[0]), Some(3));
    }

    #[test]
    fn zero_capacity_is_noop() {
        let mut c = PageCache::new(0);
        c.put(1, page(1));
        assert!(c.get(1).is_none());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn put_replaces_existing() {
        let mut c = PageCache::new(4);
        c.put(5, page(1));
        c.put(5, page(9));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(5).map(|d| d[0]), Some(9));
    }
}
