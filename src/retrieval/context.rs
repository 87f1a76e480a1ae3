// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt context assembly and citation extraction.

use std::collections::HashSet;

use crate::corpus::{MessageSource, ScoredChunk};

/// Context handed to generation when retrieval found nothing.
pub const NO_CONTEXT_MESSAGE: &str = "No relevant policy content found. \
Tell the user the information is not in the policy documents and refer them to a member of staff.";

const BLOCK_SEPARATOR: &str = "\n\n";

/// Joins ranked chunks into one labelled context block, keeping their order.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_MESSAGE.to_string();
    }

    chunks
        .iter()
        .map(|c| format!("From {} ({}):\n{}", c.source(), c.section(), c.chunk.content))
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

/// One citation per distinct `(source, section)`, in first-seen order.
pub fn extract_sources(chunks: &[ScoredChunk]) -> Vec<MessageSource> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert((c.source(), c.section())))
        .map(|c| MessageSource {
            source: c.source().to_string(),
            section: c.section().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, ChunkMetadata};

    fn scored(source: &str, section: &str, content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("{}-{}", source, section),
                content: content.to_string(),
                embedding: vec![1.0],
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    section: section.to_string(),
                    chunk_index: 0,
                },
            },
            score,
        }
    }

    #[test]
    fn empty_input_yields_sentinel() {
        assert_eq!(format_context(&[]), NO_CONTEXT_MESSAGE);
    }

    #[test]
    fn blocks_are_labelled_and_keep_order() {
        let chunks = vec![
            scored("Phone Policy", "Lessons", "Phones stay off.", 0.4),
            scored("AI Policy", "Homework", "Declare any AI use.", 0.9),
        ];
        assert_eq!(
            format_context(&chunks),
            "From Phone Policy (Lessons):\nPhones stay off.\n\n\
             From AI Policy (Homework):\nDeclare any AI use."
        );
    }

    #[test]
    fn sources_dedupe_in_first_seen_order() {
        let chunks = vec![
            scored("AI Policy", "Homework", "a", 0.9),
            scored("Phone Policy", "Lessons", "b", 0.8),
            scored("AI Policy", "Homework", "c", 0.7),
            scored("AI Policy", "Exams", "d", 0.6),
            scored("Phone Policy", "Lessons", "e", 0.5),
        ];

        let sources = extract_sources(&chunks);
        let labels: Vec<String> = sources.iter().map(ToString::to_string).collect();
        assert_eq!(
            labels,
            vec![
                "AI Policy - Homework",
                "Phone Policy - Lessons",
                "AI Policy - Exams",
            ]
        );
    }

    #[test]
    fn same_section_name_in_different_sources_is_distinct() {
        let chunks = vec![
            scored("AI Policy", "Scope", "a", 0.9),
            scored("Phone Policy", "Scope", "b", 0.8),
        ];
        assert_eq!(extract_sources(&chunks).len(), 2);
    }
}
