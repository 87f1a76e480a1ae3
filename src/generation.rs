// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation boundary: prompt framing and streaming text providers.
//!
//! Providers receive the system prompt, the assembled context and the raw
//! query, and hand back a lazy stream of tokens. The stream is finite and is
//! consumed until exhaustion; dropping it early stops the provider.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::{BufRead, BufReader, Lines, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

use crate::config::{GenerationConfig, GenerationProviderType};

/// Default cap on generated tokens.
pub const DEFAULT_MAX_TOKENS: usize = 150;

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// System prompt used unless configuration overrides it.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are BERI (Bespoke Education Retrieval Infrastructure), a helpful assistant for Haberdashers' School policies.

Your role is to answer questions about school policies using ONLY the provided context. You must:

1. Answer based solely on the policy documents provided in the context
2. Always cite your sources by mentioning the policy name and section
3. If the answer is not in the provided context, say "I couldn't find this information in the school policies. Please check with a member of staff."
4. Use clear, accessible language appropriate for students aged 11-18
5. Be concise but thorough
6. Never make up or assume policy content that isn't in the context
7. Use UK British spelling and grammar
8. Be accurate
9. Don't answer random questions that are not related to the policy documents

Remember: You can only provide information that is explicitly stated in the policy documents, and to use the context and only the context that is provided."#;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One framed chat message sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Everything a provider needs to answer one question.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub context: &'a str,
    pub query: &'a str,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Wraps retrieved context and the question into the user turn.
pub fn build_user_message(context: &str, query: &str) -> String {
    format!(
        "CONTEXT:\n{}\n\nQUESTION: {}\n\nBased on the context above, please answer the question. \
         Remember to cite your sources.",
        context, query
    )
}

/// System and user messages for `request`.
pub fn build_messages(request: &GenerationRequest<'_>) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: Role::System,
            content: request.system_prompt.to_string(),
        },
        ChatMessage {
            role: Role::User,
            content: build_user_message(request.context, request.query),
        },
    ]
}

/// Lazy, finite sequence of generated tokens.
pub type TokenStream<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// Trait for text generation providers.
pub trait GenerationProvider: Send {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Fails if the provider cannot run in this environment.
    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    /// Starts generating an answer for `request`.
    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<TokenStream<'_>>;
}

/// Builds the provider selected by configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn GenerationProvider>> {
    debug!(provider = ?config.provider(), "creating generation provider");
    match config.provider() {
        GenerationProviderType::Command => Ok(Box::new(CommandGenerator::new(
            config.command().to_string(),
            config.model().to_string(),
        ))),
        GenerationProviderType::Echo => Ok(Box::new(EchoGenerator::new())),
    }
}

/// Generator that shells out to an external process.
///
/// The command receives `{"model", "messages", "max_tokens", "temperature",
/// "stream": true}` on stdin and prints one token per line, each encoded as
/// a JSON string. Lines that are not JSON strings are passed through as
/// plain text followed by a newline. Its stderr is inherited.
pub struct CommandGenerator {
    command: String,
    model: String,
}

impl CommandGenerator {
    pub fn new(command: String, model: String) -> Self {
        Self { command, model }
    }

    fn program(&self) -> Option<&str> {
        self.command.split_whitespace().next()
    }
}

impl GenerationProvider for CommandGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn check_available(&self) -> Result<()> {
        let program = self
            .program()
            .ok_or_else(|| anyhow::anyhow!("Generation command is empty"))?;
        which::which(program)
            .with_context(|| format!("Generation command not found: {}", program))?;
        Ok(())
    }

    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<TokenStream<'_>> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": build_messages(request),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn generation command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.to_string().as_bytes())
                .context("Failed to write generation payload to stdin")?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Generation command has no stdout"))?;

        Ok(Box::new(CommandTokens {
            child,
            lines: BufReader::new(stdout).lines(),
            finished: false,
        }))
    }
}

struct CommandTokens {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    finished: bool,
}

impl CommandTokens {
    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .child
            .wait()
            .context("Failed to wait for generation command")?;
        if !status.success() {
            bail!("Generation command failed (status {})", status);
        }
        Ok(())
    }
}

impl Iterator for CommandTokens {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(Ok(parse_token(&line)));
                }
                Some(Err(err)) => {
                    let _ = self.finish();
                    return Some(Err(
                        anyhow::Error::new(err).context("Failed to read generation output")
                    ));
                }
                None => return self.finish().err().map(Err),
            }
        }
    }
}

impl Drop for CommandTokens {
    fn drop(&mut self) {
        if !self.finished {
            debug!("token stream dropped early, stopping generation command");
            if let Err(err) = self.child.kill() {
                warn!("Failed to stop generation command: {}", err);
            }
            let _ = self.child.wait();
        }
    }
}

fn parse_token(line: &str) -> String {
    match serde_json::from_str::<String>(line) {
        Ok(token) => token,
        Err(_) => format!("{}\n", line),
    }
}

/// Offline generator that streams the retrieved context back word by word.
pub struct EchoGenerator {
    model: String,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self {
            model: "echo".to_string(),
        }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationProvider for EchoGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<TokenStream<'_>> {
        let tokens: Vec<String> = request
            .context
            .split_inclusive(char::is_whitespace)
            .take(request.max_tokens)
            .map(str::to_string)
            .collect();
        Ok(Box::new(tokens.into_iter().map(Ok)))
    }
}
