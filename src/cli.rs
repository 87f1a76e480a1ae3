// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// beri - Local retrieval-augmented policy assistant
///
/// Loads a policy corpus into a local embedding store once per corpus
/// version, then answers questions grounded in the retrieved policy text.
#[derive(Parser, Debug)]
#[command(name = "beri")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Directory holding the chunk store (defaults to ./.beri)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed and store the policy corpus
    Load {
        /// Corpus JSON file (defaults to [corpus] path in config)
        #[arg(short, long)]
        corpus: Option<PathBuf>,

        /// Records already carry their embeddings
        #[arg(long)]
        precomputed: bool,

        /// Reload even if the store is current
        #[arg(short, long)]
        force: bool,
    },

    /// Show chunk store status
    Status,

    /// Rank policy chunks against a query
    #[command(visible_alias = "s")]
    Search {
        /// Search query
        query: String,

        /// Maximum number of chunks to return
        #[arg(short = 'm', long)]
        limit: Option<usize>,

        /// Minimum similarity score
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Ask a question and stream a grounded answer
    Ask {
        /// Question about the policies
        query: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
