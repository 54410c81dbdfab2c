//! IndexFlow CLI: collects the index composition tables, publishes one
//! dataset per cycle and turns the accumulated history into catalogued deltas.

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
