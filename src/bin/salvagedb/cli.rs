use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// SalvageDB — восстановление повреждённых SQLite-файлов
#[derive(Parser, Debug)]
#[command(name = "salvagedb", version, about = "SalvageDB CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Crawl a damaged database and assemble everything readable into a new file
    Repair {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        dest: PathBuf,
        /// Only these tables (repeatable). Default: all.
        #[arg(long)]
        table: Vec<String>,
        /// Ignore the -wal file
        #[arg(long)]
        skip_wal: bool,
        /// Commit the destination every N cells (0 = per table only)
        #[arg(long)]
        milestone: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Snapshot table structure into a material slot (<db>-first/-last.material)
    Deconstruct {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        table: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Recover in place: material first, full crawl for the rest, then swap files
    Retrieve {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        table: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Install the prepared schema-only database (or prepare it with --prepare)
    Renew {
        /// Database path; its factory is "<path>.factory"
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        prepare: bool,
    },
    /// Header, WAL and catalog of a database without repairing it
    Inspect {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Decode and print a material file
    Material {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}
