use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};

mod cli;
mod util;
mod cmd_repair;
mod cmd_deconstruct;
mod cmd_retrieve;
mod cmd_renew;
mod cmd_inspect;
mod cmd_material;

fn init_logger() {
    // Уровень из RUST_LOG, иначе info.
    // Пример: RUST_LOG=debug salvagedb repair ...
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Repair { source, dest, table, skip_wal, milestone, json } =>
            cmd_repair::exec(source, dest, table, skip_wal, milestone, json),

        cli::Cmd::Deconstruct { path, table, json } =>
            cmd_deconstruct::exec(path, table, json),

        cli::Cmd::Retrieve { path, table, json } =>
            cmd_retrieve::exec(path, table, json),

        cli::Cmd::Renew { path, prepare } =>
            cmd_renew::exec(path, prepare),

        cli::Cmd::Inspect { path, json } =>
            cmd_inspect::exec(path, json),

        cli::Cmd::Material { path, json } =>
            cmd_material::exec(path, json),
    }
}
