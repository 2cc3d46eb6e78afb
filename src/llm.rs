//! Summarizer oracle invocation and digest extraction.
//!
//! The summarizer is an external subprocess treated as an opaque
//! text-in/text-out callable. Memoir shells out to the Claude CLI in pipe
//! mode with all tools disabled, a hard timeout, and a marker variable in
//! the environment so cooperating session-start hooks can detect a
//! programmatic invocation and skip their side effects — without the marker
//! a hook that itself shells out to the indexer can fork-bomb.
//!
//! Content above the chunking threshold is split (semantically when message
//! structure is available, fixed-size otherwise), each chunk is digested
//! with "chunk k of n" framing, and a final merge call deduplicates by
//! meaning. The oracle's reply is parsed by taking the outermost `{…}`;
//! anything unparsable degrades to an empty digest rather than an error.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde_json::{Value, json};
use wait_timeout::ChildExt;

use crate::chunker::{self, ChunkLimits, MessageData};
use crate::config::ProcessingConfig;
use crate::error::MemoirError;
use crate::extraction::Extraction;

const DIGEST_PROMPT: &str = include_str!("prompts/digest.md");
const CHUNK_PROMPT: &str = include_str!("prompts/chunk.md");
const MERGE_PROMPT: &str = include_str!("prompts/merge.md");

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Input window for a single summarizer call, in bytes.
pub const DEFAULT_WINDOW: usize = 140_000;

/// Environment marker telling cooperating hooks this is a programmatic
/// invocation, not an interactive session.
pub const SUBAGENT_ENV: &str = "MEMOIR_SUBAGENT";

/// The oracle seam: prompt in, text out.
pub trait Summarizer {
    fn complete(&self, prompt: &str) -> Result<String, MemoirError>;

    /// Model identifier recorded on extractions.
    fn model(&self) -> &str;
}

/// Summarizer backed by `claude -p` (pipe mode).
pub struct ClaudeCli {
    model: String,
    timeout: Duration,
}

impl ClaudeCli {
    pub fn new(model: impl Into<String>, timeout_secs: u64) -> ClaudeCli {
        ClaudeCli {
            model: model.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Summarizer for ClaudeCli {
    fn complete(&self, prompt: &str) -> Result<String, MemoirError> {
        let mut child = Command::new("claude")
            .args([
                "-p",
                "--output-format",
                "json",
                "--model",
                &self.model,
                "--allowedTools",
                "",
                "--no-session-persistence",
            ])
            .env(SUBAGENT_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MemoirError::Oracle(format!("failed to start claude: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .map_err(|e| MemoirError::Oracle(format!("failed to write prompt: {e}")))?;
        }

        // Drain stdout on a thread so a large response can't deadlock the
        // timed wait on a full pipe.
        let mut stdout = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_string(&mut buf);
            }
            buf
        });

        let status = child
            .wait_timeout(self.timeout)
            .map_err(|e| MemoirError::Oracle(format!("failed to wait for claude: {e}")))?;

        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MemoirError::Oracle(format!(
                "claude timed out after {}s",
                self.timeout.as_secs()
            )));
        };

        let output = reader.join().unwrap_or_default();

        if !status.success() {
            return Err(MemoirError::Oracle(format!(
                "claude exited with status {status}"
            )));
        }

        let parsed: Value = serde_json::from_str(&output)
            .map_err(|e| MemoirError::Oracle(format!("unparsable claude output: {e}")))?;
        parsed
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MemoirError::Oracle("claude output missing result field".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Extraction thresholds, derived from the `[processing]` config table.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub max_content_chars: usize,
    pub limits: ChunkLimits,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub window: usize,
}

impl ExtractOptions {
    pub fn from_config(processing: &ProcessingConfig) -> ExtractOptions {
        ExtractOptions {
            max_content_chars: processing.max_content_chars,
            limits: processing.limits(),
            chunk_size: processing.chunk_size,
            chunk_overlap: processing.chunk_overlap,
            window: DEFAULT_WINDOW,
        }
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions::from_config(&ProcessingConfig::default())
    }
}

/// Extract a structured digest from one conversation.
///
/// Content at or below the threshold gets a single oracle call. Above it,
/// the content is chunked — at topic boundaries when `messages` is
/// non-empty, fixed-size with overlap otherwise — digested per chunk, then
/// merged with one final call. Oracle failures are fatal for the
/// extraction; parse failures degrade to an empty digest.
pub fn extract_digest(
    oracle: &dyn Summarizer,
    content: &str,
    messages: &[MessageData],
    opts: &ExtractOptions,
) -> Result<Extraction, MemoirError> {
    let mut extraction = if content.len() > opts.max_content_chars {
        let chunks = if messages.is_empty() {
            chunker::split_with_overlap(content, opts.chunk_size, opts.chunk_overlap)
        } else {
            chunker::split_semantic(content, messages, opts.limits)
        };

        let total = chunks.len();
        let mut results = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            results.push(extract_chunk(oracle, chunk, i + 1, total, opts.window)?);
        }
        merge_chunks(oracle, &results, opts.window)?
    } else {
        let prompt = DIGEST_PROMPT.replace("{content}", &truncate_window(content, opts.window));
        let response = oracle.complete(&prompt)?;
        Extraction::from_response(&response)
    };

    extraction.model_used = Some(oracle.model().to_string());
    Ok(extraction)
}

fn extract_chunk(
    oracle: &dyn Summarizer,
    content: &str,
    chunk_num: usize,
    total_chunks: usize,
    window: usize,
) -> Result<Value, MemoirError> {
    let prompt = CHUNK_PROMPT
        .replace("{chunk_num}", &chunk_num.to_string())
        .replace("{total_chunks}", &total_chunks.to_string())
        .replace("{content}", &truncate_window(content, window));

    let response = oracle.complete(&prompt)?;
    Ok(outermost_object(&response).unwrap_or_else(|| {
        json!({"builds": [], "learnings": [], "friction": [], "breakthroughs": []})
    }))
}

fn merge_chunks(
    oracle: &dyn Summarizer,
    chunk_results: &[Value],
    window: usize,
) -> Result<Extraction, MemoirError> {
    let formatted = serde_json::to_string_pretty(chunk_results)?;
    let prompt = MERGE_PROMPT
        .replace("{num_chunks}", &chunk_results.len().to_string())
        .replace("{chunk_results}", &truncate_window(&formatted, window));

    let response = oracle.complete(&prompt)?;
    Ok(Extraction::from_response(&response))
}

/// Parse the outermost `{…}` in a response into a JSON value.
fn outermost_object(response: &str) -> Option<Value> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

/// Truncate content to the summarizer window, appending an elided marker
/// when anything was cut.
fn truncate_window(content: &str, window: usize) -> String {
    if content.len() <= window {
        return content.to_string();
    }
    let mut end = window;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let omitted = content.len() - end;
    format!(
        "{}\n\n[... truncated, {omitted} chars omitted ...]",
        &content[..end]
    )
}
