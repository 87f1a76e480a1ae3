// SPDX-License-Identifier: MIT OR Apache-2.0

//! Load the policy corpus into the chunk store

use anyhow::{anyhow, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::Path;

use super::Context;
use crate::cli::OutputFormat;
use beri::bootstrap::{Bootstrap, BootstrapOutcome, CorpusSource};
use beri::corpus::{read_corpus, read_precomputed};
use beri::output::print_json;

/// Load result for JSON output
#[derive(Debug, Serialize)]
struct LoadResult {
    chunks: usize,
    reloaded: bool,
    corpus_version: String,
    store: String,
}

/// Run the load command
pub fn run(ctx: &Context, corpus: Option<&Path>, precomputed: bool, force: bool) -> Result<()> {
    let path = corpus
        .or_else(|| ctx.config.corpus.path())
        .ok_or_else(|| anyhow!("No corpus given: pass --corpus or set [corpus] path in .berirc.toml"))?;

    let source = if precomputed {
        CorpusSource::Precomputed(read_precomputed(path)?)
    } else {
        CorpusSource::Raw(read_corpus(path)?)
    };

    let mut store = ctx.store();
    let mut embedder = ctx.embedder()?;

    let pb = if ctx.format == OutputFormat::Text && std::io::stderr().is_terminal() {
        ProgressBar::new(100)
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}% | {msg}")?
            .progress_chars("##."),
    );

    let outcome = Bootstrap::new(&mut store, embedder.as_mut(), source)
        .force_reload(force)
        .run(|state| {
            pb.set_position(u64::from(state.progress));
            pb.set_message(state.message.clone());
        });
    pb.finish_and_clear();

    let (chunks, reloaded) = match outcome? {
        BootstrapOutcome::Ready { chunks, reloaded } => (chunks, reloaded),
        BootstrapOutcome::Cancelled => {
            eprintln!("{} Load cancelled", "✗".red());
            return Ok(());
        }
    };

    let result = LoadResult {
        chunks,
        reloaded,
        corpus_version: store.expected_version().to_string(),
        store: ctx.store_path().display().to_string(),
    };

    match ctx.format {
        OutputFormat::Json => print_json(&result, ctx.compact)?,
        OutputFormat::Text => {
            if reloaded {
                println!(
                    "{} Loaded {} chunks (corpus version {})",
                    "✓".green(),
                    result.chunks.to_string().yellow(),
                    result.corpus_version.cyan()
                );
            } else {
                println!(
                    "{} Corpus already current: {} chunks (corpus version {})",
                    "✓".green(),
                    result.chunks.to_string().yellow(),
                    result.corpus_version.cyan()
                );
            }
        }
    }

    Ok(())
}
