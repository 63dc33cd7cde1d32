//! crawl/crawler — обход B-дерева от корня с локализацией порчи.
//!
//! Walk — ленивая последовательность событий в pre-order:
//!   Page{page, height} — страница разобрана (interior или leaf);
//!   Cell(cell)        — ячейка с записью (лист или interior индекса), в порядке указателей.
//!
//! Правила:
//! - visited-set в пределах одного обхода: повторный визит (цикл, общий потомок) — порча;
//! - номер потомка вне 1..=page_count — порча;
//! - тип страницы, не совпадающий с видом дерева родителя, — порча, поддерево отбрасывается;
//! - каждая ошибка проходит через Classifier; Fatal/MostFatal завершает обход;
//! - флаг остановки проверяется только между страницами (Interrupted).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Classifier, DefaultClassifier, ErrorTracker, Level, RepairError};
use crate::page::{Cell, Page, PageDecoder, TreeKind};
use crate::pager::Pager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Разбирать ячейки листьев.
    Cells,
    /// Только страницы (снимок для material).
    Pages,
}

#[derive(Debug)]
pub enum CrawlEvent {
    Page { page: Page, height: u32 },
    Cell(Cell),
}

pub struct Crawler<'a> {
    decoder: PageDecoder<'a>,
    classifier: Box<dyn Classifier + 'a>,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> Crawler<'a> {
    pub fn new(pager: &'a Pager) -> Self {
        Self {
            decoder: PageDecoder::new(pager),
            classifier: Box::new(DefaultClassifier),
            stop: None,
        }
    }

    pub fn with_classifier(mut self, classifier: impl Classifier + 'a) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn with_stop_flag(mut self, stop: Option<Arc<AtomicBool>>) -> Self {
        self.stop = stop;
        self
    }

    pub fn pager(&self) -> &'a Pager {
        self.decoder.pager()
    }

    /// Ленивый обход дерева с корнем `root`. Ошибки копятся в `tracker`.
    pub fn walk<'c>(&'c self, root: u32, mode: CrawlMode, tracker: &'c mut ErrorTracker) -> Walk<'c, 'a> {
        Walk {
            crawler: self,
            tracker,
            mode,
            stack: vec![Pending { page_no: root, height: 0, tree: None }],
            visited: HashSet::new(),
            queued: VecDeque::new(),
            done: false,
            fatal: false,
            pages_decoded: 0,
            pages_failed: 0,
            cells_failed: 0,
        }
    }

    /// Обход с колбэками. on_page/on_cell возвращают false, чтобы остановить обход
    /// (без ошибки). Итог: true — дерево пройдено без Fatal.
    pub fn crawl<P, C>(&self, root: u32, mode: CrawlMode, tracker: &mut ErrorTracker, mut on_page: P, mut on_cell: C) -> bool
    where
        P: FnMut(&Page, u32) -> bool,
        C: FnMut(Cell) -> bool,
    {
        let mut walk = self.walk(root, mode, tracker);
        while let Some(ev) = walk.next() {
            let go_on = match ev {
                CrawlEvent::Page { page, height } => on_page(&page, height),
                CrawlEvent::Cell(cell) => on_cell(cell),
            };
            if !go_on {
                return !walk.is_fatal();
            }
        }
        !walk.is_fatal()
    }
}

struct Pending {
    page_no: u32,
    height: u32,
    tree: Option<TreeKind>,
}

pub struct Walk<'c, 'a> {
    crawler: &'c Crawler<'a>,
    tracker: &'c mut ErrorTracker,
    mode: CrawlMode,
    stack: Vec<Pending>,
    visited: HashSet<u32>,
    queued: VecDeque<Cell>,
    done: bool,
    fatal: bool,
    pages_decoded: u64,
    pages_failed: u64,
    cells_failed: u64,
}

impl<'c, 'a> Walk<'c, 'a> {
    /// Обход прерван ошибкой уровня Fatal и выше (или флагом остановки).
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Число страниц, до которых обход успел дойти (включая битые).
    pub fn visited(&self) -> usize {
        self.visited.len()
    }

    pub fn pages_decoded(&self) -> u64 {
        self.pages_decoded
    }

    /// Ссылки на страницы, которые не удалось разобрать.
    pub fn pages_failed(&self) -> u64 {
        self.pages_failed
    }

    pub fn cells_failed(&self) -> u64 {
        self.cells_failed
    }

    fn report(&mut self, err: RepairError, height: u32) {
        let level = self.crawler.classifier.classify(&err, height);
        let err = err.with_level(level);
        self.pages_failed += 1;
        log::debug!("crawler: {}", err);
        self.tracker.record(err);
        if level >= Level::Fatal {
            self.fatal = true;
            self.done = true;
            self.queued.clear();
        }
    }

    fn stopped(&self) -> bool {
        self.crawler
            .stop
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn step(&mut self, item: Pending) -> Option<CrawlEvent> {
        let pager = self.crawler.pager();
        let Pending { page_no, height, tree } = item;

        if page_no == 0 || page_no > pager.page_count() {
            self.report(
                RepairError::corruption(format!("child page {} out of range 1..={}", page_no, pager.page_count()))
                    .with_page(page_no),
                height,
            );
            return None;
        }
        if !self.visited.insert(page_no) {
            self.report(
                RepairError::corruption(format!("page {} referenced twice", page_no)).with_page(page_no),
                height,
            );
            return None;
        }

        let page = match self.crawler.decoder.decode(page_no) {
            Ok(p) => p,
            Err(e) => {
                self.report(e, height);
                return None;
            }
        };

        let kind = page.kind();
        let page_tree = match kind.tree() {
            Some(t) => t,
            None => {
                self.report(
                    RepairError::corruption(format!("page type {:?} is not a b-tree page", kind)).with_page(page_no),
                    height,
                );
                return None;
            }
        };
        if let Some(parent) = tree {
            if parent != page_tree {
                self.report(
                    RepairError::corruption(format!("{:?} page under a {:?} tree", kind, parent)).with_page(page_no),
                    height,
                );
                return None;
            }
        }

        if kind.is_interior() {
            // правый край последним: в стек в обратном порядке
            for child in page.children().into_iter().rev() {
                self.stack.push(Pending { page_no: child, height: height + 1, tree: Some(page_tree) });
            }
        }
        if self.mode == CrawlMode::Cells && kind.carries_records() {
            for i in 0..page.cell_count() {
                match self.crawler.decoder.decode_cell(&page, i) {
                    Ok(cell) => self.queued.push_back(cell),
                    // битая ячейка не поднимается выше NotFatal
                    Err(e) => {
                        self.cells_failed += 1;
                        let e = e.with_level(Level::NotFatal);
                        log::debug!("crawler: {}", e);
                        self.tracker.record(e);
                    }
                }
            }
        }
        self.pages_decoded += 1;
        Some(CrawlEvent::Page { page, height })
    }
}

impl<'c, 'a> Iterator for Walk<'c, 'a> {
    type Item = CrawlEvent;

    fn next(&mut self) -> Option<CrawlEvent> {
        loop {
            if let Some(cell) = self.queued.pop_front() {
                return Some(CrawlEvent::Cell(cell));
            }
            if self.done {
                return None;
            }
            let item = match self.stack.pop() {
                Some(i) => i,
                None => {
                    self.done = true;
                    return None;
                }
            };
            if self.stopped() {
                self.tracker.record(RepairError::interrupted());
                self.fatal = true;
                self.done = true;
                return None;
            }
            if let Some(ev) = self.step(item) {
                return Some(ev);
            }
        }
    }
}
