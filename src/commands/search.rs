// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rank policy chunks against a query

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::Context;
use crate::cli::OutputFormat;
use beri::corpus::{MessageSource, ScoredChunk};
use beri::output::{
    colorize_content, colorize_score, colorize_section, colorize_source, print_json,
};
use beri::retrieval::{extract_sources, Retriever};

/// Search result for JSON output
#[derive(Debug, Serialize)]
struct SearchResult<'a> {
    query: &'a str,
    results: &'a [ScoredChunk],
    sources: &'a [MessageSource],
}

/// Run the search command
pub fn run(ctx: &Context, query: &str, limit: Option<usize>, threshold: Option<f32>) -> Result<()> {
    let store = ctx.open_store()?;
    if !store.is_populated()? {
        eprintln!(
            "{} Corpus not loaded for version {}; run `beri load` first",
            "!".yellow(),
            store.expected_version()
        );
    }

    let mut policy = ctx.config.policy();
    if let Some(limit) = limit {
        policy = policy.with_top_k(limit);
    }
    if let Some(threshold) = threshold {
        policy = policy.with_threshold(threshold);
    }

    let mut embedder = ctx.embedder()?;
    let results = Retriever::new(&store, embedder.as_mut(), policy).retrieve(query)?;
    let sources = extract_sources(&results);

    match ctx.format {
        OutputFormat::Json => print_json(
            &SearchResult {
                query,
                results: &results,
                sources: &sources,
            },
            ctx.compact,
        )?,
        OutputFormat::Text => {
            if results.is_empty() {
                println!("{} No policy chunks found for: {}", "✗".red(), query.yellow());
                return Ok(());
            }

            let use_color = ctx.use_color();
            println!("\n{} Results for: {}\n", "🔍".cyan(), query.yellow());
            for scored in &results {
                println!(
                    "  [{}] {} ({})",
                    colorize_score(scored.score, use_color),
                    colorize_source(scored.source(), use_color),
                    colorize_section(scored.section(), use_color)
                );
                for line in scored.chunk.content.lines() {
                    println!("    {}", colorize_content(line, use_color));
                }
                println!();
            }

            println!("Sources:");
            for source in &sources {
                println!("  - {}", source);
            }
        }
    }

    Ok(())
}
