// SPDX-License-Identifier: MIT OR Apache-2.0

//! beri - Local retrieval-augmented policy assistant
//!
//! Ranks embedded policy chunks by cosine similarity and streams answers
//! grounded in the retrieved text.

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use commands::Context;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with BERI_LOG env var (e.g., BERI_LOG=debug beri ask "...")
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("BERI_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::new(cli.data_dir, cli.format.unwrap_or_default(), cli.compact);

    match cli.command {
        Commands::Load {
            corpus,
            precomputed,
            force,
        } => {
            commands::load::run(&ctx, corpus.as_deref(), precomputed, force)?;
        }
        Commands::Status => {
            commands::status::run(&ctx)?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            commands::search::run(&ctx, &query, limit, threshold)?;
        }
        Commands::Ask { query } => {
            commands::ask::run(&ctx, &query)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "beri", &mut std::io::stdout());
        }
    }

    Ok(())
}
