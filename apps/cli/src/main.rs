//! fixturesmith CLI: reproducible e-book fixture generator.
//!
//! Reads a declarative config and writes one bundle per seed, each with
//! resolved notes, citations, images and navigation.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
