// SPDX-License-Identifier: MIT OR Apache-2.0

//! Show chunk store status

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::Context;
use crate::cli::OutputFormat;
use beri::output::print_json;

#[derive(Debug, Serialize)]
struct StatusResult {
    store: String,
    chunks: usize,
    populated: bool,
    stored_version: Option<String>,
    expected_version: String,
    fingerprint: Option<String>,
    dimension: Option<usize>,
}

/// Run the status command
pub fn run(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;

    let status = StatusResult {
        store: ctx.store_path().display().to_string(),
        chunks: store.count()?,
        populated: store.is_populated()?,
        stored_version: store.corpus_version()?.map(|v| v.to_string()),
        expected_version: store.expected_version().to_string(),
        fingerprint: store.fingerprint()?,
        dimension: store.dimension()?,
    };

    match ctx.format {
        OutputFormat::Json => print_json(&status, ctx.compact)?,
        OutputFormat::Text => {
            let state = if status.populated {
                "populated".green()
            } else {
                "not loaded".red()
            };
            println!("Store:            {}", status.store.cyan());
            println!("Chunks:           {}", status.chunks);
            println!("Status:           {}", state);
            println!(
                "Corpus version:   {} (expected {})",
                status.stored_version.as_deref().unwrap_or("-"),
                status.expected_version
            );
            println!(
                "Fingerprint:      {}",
                status.fingerprint.as_deref().unwrap_or("-")
            );
            println!(
                "Dimension:        {}",
                status
                    .dimension
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    Ok(())
}
