//! Centralized configuration and builder for SalvageDB.
//!
//! - RepairConfig::from_env() reads SALVAGE_* variables.
//! - Fluent with_* setters and RepairBuilder for programmatic overrides.
//!
//! Тюнинг, у которого нет "правильного" значения (интервал milestone,
//! максимальная длина overflow-цепочки), вынесен сюда, а не зашит в код.

use std::fmt;

/// Tunables for one recovery engine instance.
#[derive(Clone, Debug)]
pub struct RepairConfig {
    /// Durable commit of the destination every N assembled cells.
    /// Env: SALVAGE_MILESTONE_CELLS (default 1000, 0 => only per-table commits)
    pub milestone_interval: usize,

    /// Hard cap on overflow pages followed for one cell (also bounded by page count).
    /// Env: SALVAGE_MAX_OVERFLOW_CHAIN (default 65536)
    pub max_overflow_chain: usize,

    /// Page cache size in pages (0 disables).
    /// Env: SALVAGE_PAGE_CACHE_PAGES (default 256)
    pub page_cache_pages: usize,

    /// Map source/WAL files into memory instead of positional reads.
    /// Env: SALVAGE_MMAP (default true)
    pub use_mmap: bool,

    /// Compress material bodies with zstd.
    /// Env: SALVAGE_MATERIAL_ZSTD (default true)
    pub material_zstd: bool,

    /// Ignore the -wal file entirely.
    /// Env: SALVAGE_SKIP_WAL (default false)
    pub skip_wal: bool,

    /// How long the default lockers wait for a busy lock, ms.
    /// 0 = a single attempt. A non-zero wait is the caller's policy: the engine
    /// calls acquire_lock once and fails the operation on the first error.
    /// Env: SALVAGE_LOCK_TIMEOUT_MS (default 0)
    pub lock_timeout_ms: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            milestone_interval: 1000,
            max_overflow_chain: 65536,
            page_cache_pages: 256,
            use_mmap: true,
            material_zstd: true,
            skip_wal: false,
            lock_timeout_ms: 0,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let s = v.trim().to_ascii_lowercase();
        s == "1" || s == "true" || s == "on" || s == "yes"
    })
}

fn env_num<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl RepairConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(n) = env_num::<usize>("SALVAGE_MILESTONE_CELLS") {
            cfg.milestone_interval = n;
        }
        if let Some(n) = env_num::<usize>("SALVAGE_MAX_OVERFLOW_CHAIN") {
            cfg.max_overflow_chain = n.max(1);
        }
        if let Some(n) = env_num::<usize>("SALVAGE_PAGE_CACHE_PAGES") {
            cfg.page_cache_pages = n;
        }
        if let Some(on) = env_flag("SALVAGE_MMAP") {
            cfg.use_mmap = on;
        }
        if let Some(on) = env_flag("SALVAGE_MATERIAL_ZSTD") {
            cfg.material_zstd = on;
        }
        if let Some(on) = env_flag("SALVAGE_SKIP_WAL") {
            cfg.skip_wal = on;
        }
        if let Some(ms) = env_num::<u64>("SALVAGE_LOCK_TIMEOUT_MS") {
            cfg.lock_timeout_ms = ms;
        }

        cfg
    }

    pub fn with_milestone_interval(mut self, cells: usize) -> Self {
        self.milestone_interval = cells;
        self
    }

    pub fn with_max_overflow_chain(mut self, pages: usize) -> Self {
        self.max_overflow_chain = pages.max(1);
        self
    }

    pub fn with_page_cache_pages(mut self, pages: usize) -> Self {
        self.page_cache_pages = pages;
        self
    }

    pub fn with_mmap(mut self, on: bool) -> Self {
        self.use_mmap = on;
        self
    }

    pub fn with_material_zstd(mut self, on: bool) -> Self {
        self.material_zstd = on;
        self
    }

    pub fn with_skip_wal(mut self, on: bool) -> Self {
        self.skip_wal = on;
        self
    }

    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for RepairConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RepairConfig {{ \
             milestone_interval: {}, \
             max_overflow_chain: {}, \
             page_cache_pages: {}, \
             use_mmap: {}, \
             material_zstd: {}, \
             skip_wal: {}, \
             lock_timeout_ms: {} \
             }}",
            self.milestone_interval,
            self.max_overflow_chain,
            self.page_cache_pages,
            self.use_mmap,
            self.material_zstd,
            self.skip_wal,
            self.lock_timeout_ms,
        )
    }
}

/// Builder that starts from env and allows overrides.
#[derive(Clone, Debug)]
pub struct RepairBuilder {
    cfg: RepairConfig,
}

impl Default for RepairBuilder {
    fn default() -> Self {
        Self {
            cfg: RepairConfig::from_env(),
        }
    }
}

impl RepairBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: RepairConfig::default(),
        }
    }

    pub fn milestone_interval(mut self, cells: usize) -> Self {
        self.cfg.milestone_interval = cells;
        self
    }

    pub fn max_overflow_chain(mut self, pages: usize) -> Self {
        self.cfg.max_overflow_chain = pages.max(1);
        self
    }

    pub fn page_cache_pages(mut self, pages: usize) -> Self {
        self.cfg.page_cache_pages = pages;
        self
    }

    pub fn mmap(mut self, on: bool) -> Self {
        self.cfg.use_mmap = on;
        self
    }

    pub fn material_zstd(mut self, on: bool) -> Self {
        self.cfg.material_zstd = on;
        self
    }

    pub fn skip_wal(mut self, on: bool) -> Self {
        self.cfg.skip_wal = on;
        self
    }

    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.lock_timeout_ms = ms;
        self
    }

    pub fn build(self) -> RepairConfig {
        self.cfg
    }
}
