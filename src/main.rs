mod app;
mod archive;
mod bepinex;
mod catalog;
mod cli;
mod config;
mod conflict;
mod error;
mod fsutil;
mod game;
mod installer;
mod log;
mod manifest;
mod net;
mod plugins;
mod regions;
mod status;
mod toggle;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
