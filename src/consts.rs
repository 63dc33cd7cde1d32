//! Общие константы форматов (SQLite header, B-tree pages, WAL, material, factory).

// -------- Database header --------
pub const DB_HEADER_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const DB_HEADER_SIZE: usize = 100;

// Offsets внутри 100-байтового заголовка (все числа big-endian)
pub const DB_OFF_PAGE_SIZE: usize = 16; // u16, 1 => 65536
pub const DB_OFF_WRITE_VERSION: usize = 18;
pub const DB_OFF_READ_VERSION: usize = 19;
pub const DB_OFF_RESERVED: usize = 20; // u8, байты в конце каждой страницы
pub const DB_OFF_CHANGE_COUNTER: usize = 24;
pub const DB_OFF_PAGE_COUNT: usize = 28;
pub const DB_OFF_FREELIST_TRUNK: usize = 32;
pub const DB_OFF_SCHEMA_COOKIE: usize = 40;
pub const DB_OFF_TEXT_ENCODING: usize = 56;

pub const MIN_PAGE_SIZE: u32 = 512;
pub const MAX_PAGE_SIZE: u32 = 65536;

// -------- B-tree pages --------
pub const PAGE_INDEX_INTERIOR: u8 = 0x02;
pub const PAGE_TABLE_INTERIOR: u8 = 0x05;
pub const PAGE_INDEX_LEAF: u8 = 0x0a;
pub const PAGE_TABLE_LEAF: u8 = 0x0d;

pub const LEAF_HEADER_SIZE: usize = 8;
pub const INTERIOR_HEADER_SIZE: usize = 12;

// Корень каталога (sqlite_master) всегда на странице 1
pub const MASTER_ROOT_PAGE: u32 = 1;
pub const SEQUENCE_TABLE: &str = "sqlite_sequence";
pub const RESERVED_PREFIX: &str = "sqlite_";

// -------- WAL --------
pub const WAL_SUFFIX: &str = "-wal";
pub const WAL_MAGIC_LE: u32 = 0x377f_0682;
pub const WAL_MAGIC_BE: u32 = 0x377f_0683;
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;
pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;

// -------- Material --------
pub const MATERIAL_MAGIC: u32 = 0x5356_4d54; // "SVMT"
pub const MATERIAL_VERSION: u32 = 1;
pub const MATERIAL_CODEC_NONE: u8 = 0;
pub const MATERIAL_CODEC_ZSTD: u8 = 1;
pub const MATERIAL_ZSTD_LEVEL: i32 = 3;

// -------- Factory --------
pub const FACTORY_SUFFIX: &str = ".factory";
pub const FIRST_MATERIAL_SUFFIX: &str = "-first.material";
pub const LAST_MATERIAL_SUFFIX: &str = "-last.material";
pub const RESTORE_DIR: &str = "restore";
pub const RENEW_DIR: &str = "renew";
pub const LOCK_SUFFIX: &str = "-lock";
