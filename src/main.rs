use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use log::debug;

mod api;
mod app;
mod commands;
mod config;
mod controller;
mod intake;
mod notifier;
mod output;
mod state;
mod utils;
mod watch;

use commands::Cli;

fn init_logger(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; everything has a default.
    let dotenv_loaded = dotenv().is_ok();
    let cli = Cli::parse();
    init_logger(cli.global.verbose);
    debug!("stegodrop starting (.env loaded: {dotenv_loaded})");

    commands::run(cli).await
}
