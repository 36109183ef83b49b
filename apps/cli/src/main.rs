//! Heritix CLI: archive cultural-knowledge recordings.
//!
//! Uploads audio, runs the transcription and knowledge pipeline, and queries
//! the resulting archive.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
