// SPDX-License-Identifier: MIT OR Apache-2.0

//! Answer a question from the policy corpus

use anyhow::{Context as _, Result};
use colored::Colorize;
use std::io::Write;
use tracing::error;

use super::Context;
use crate::cli::OutputFormat;
use beri::assistant::{Assistant, AssistantSettings, GENERIC_FAILURE_MESSAGE};
use beri::generation::create_generator;
use beri::output::{colorize_section, colorize_source, print_json};

/// Run the ask command
pub fn run(ctx: &Context, query: &str) -> Result<()> {
    let store = ctx.open_store()?;
    if !store.is_populated()? {
        eprintln!(
            "{} Corpus not loaded for version {}; run `beri load` first",
            "!".yellow(),
            store.expected_version()
        );
    }

    let mut embedder = ctx.embedder()?;
    let mut generator = create_generator(&ctx.config.generation)
        .context("Failed to create generation provider")?;
    let settings = AssistantSettings::from_config(&ctx.config);
    let mut assistant = Assistant::new(&store, embedder.as_mut(), generator.as_mut(), settings);

    let streaming = ctx.format == OutputFormat::Text;
    let mut stdout = std::io::stdout();
    let result = assistant.ask(query, |token| {
        if streaming {
            print!("{}", token);
            let _ = stdout.flush();
        }
    });

    let answer = match result {
        Ok(answer) => answer,
        Err(err) => {
            error!("ask failed: {}", err);
            if streaming {
                println!();
            }
            println!("{}", GENERIC_FAILURE_MESSAGE);
            if err.is_configuration_error() {
                eprintln!(
                    "{} Stored embeddings do not match the embedding model; run `beri load --force`",
                    "!".yellow()
                );
            }
            return Err(err).context("Failed to answer question");
        }
    };

    match ctx.format {
        OutputFormat::Json => print_json(&answer, ctx.compact)?,
        OutputFormat::Text => {
            if !answer.text.ends_with('\n') {
                println!();
            }
            if !answer.sources.is_empty() {
                let use_color = ctx.use_color();
                println!("\nSources:");
                for source in &answer.sources {
                    println!(
                        "  - {} - {}",
                        colorize_source(&source.source, use_color),
                        colorize_section(&source.section, use_color)
                    );
                }
            }
        }
    }

    Ok(())
}
