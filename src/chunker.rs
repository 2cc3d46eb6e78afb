//! Semantic chunking for bounded-window summarization.
//!
//! The external summarizer has a bounded input window; naive fixed-size
//! splits cut through topics. This module builds chunks aligned to topic
//! boundaries inferred from message structure: timestamp gaps, the user
//! returning after a run of assistant messages, the end of a tool-call
//! sequence, and explicit markers in the text.
//!
//! Chunks are non-overlapping, cover the input modulo whitespace trimmed at
//! seams, and never exceed the configured maximum. Inputs that fit the
//! window and contain no boundaries pass through as a single chunk.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Merge chunks smaller than this with their neighbors.
pub const DEFAULT_MIN: usize = 15_000;
/// Split chunks larger than this at paragraph breaks.
pub const DEFAULT_MAX: usize = 80_000;
/// Preferred single-topic chunk size.
pub const DEFAULT_TARGET: usize = 40_000;
/// Timestamp gap that marks a strong topic boundary.
pub const DEFAULT_GAP_SECONDS: i64 = 300;

/// Fixed-size fallback chunking, for content without message structure.
pub const DEFAULT_CHUNK_SIZE: usize = 140_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 5_000;

/// Speaker role within a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message structure used for topic-boundary detection.
///
/// `offset`/`length` are byte positions into the adapter's `full_text`,
/// accounting for the two-byte `\n\n` separator between messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub offset: usize,
    pub length: usize,
    pub is_tool_result: bool,
    pub has_tool_use: bool,
}

/// Size limits for semantic chunk assembly.
#[derive(Debug, Clone, Copy)]
pub struct ChunkLimits {
    pub min: usize,
    pub max: usize,
    pub target: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            target: DEFAULT_TARGET,
        }
    }
}

static TOPIC_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)let's move on",
        r"(?i)new topic:",
        r"(?i)moving on to",
        r"(?i)switching to",
        r"(?m)^---+$",
        r"(?im)^#+\s",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Largest index `<= pos` that is a UTF-8 character boundary of `s`.
fn floor_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut i = pos;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Detect topic boundaries in a conversation.
///
/// For each message index `i >= 1` a weighted score is summed over four
/// signals:
///
/// - timestamp gap over `gap_seconds`: 1.0
/// - user message after three or more consecutive assistant messages: 0.5
/// - assistant without tools following assistant with tools: 0.3
/// - explicit topic marker in the message body: 0.2 (once per message)
///
/// A boundary is declared before message `i` when the score reaches 0.5.
pub fn detect_topic_boundaries(
    messages: &[MessageData],
    content: &str,
    gap_seconds: i64,
) -> Vec<usize> {
    if messages.len() < 2 {
        return Vec::new();
    }

    let mut boundaries = Vec::new();
    let mut consecutive_assistant = 0u32;
    let mut prev_assistant_had_tools = false;

    for i in 1..messages.len() {
        let msg = &messages[i];
        let prev = &messages[i - 1];
        let mut score = 0.0f64;

        if (msg.timestamp - prev.timestamp).num_seconds() > gap_seconds {
            score += 1.0;
        }

        if msg.role == Role::User && consecutive_assistant >= 3 {
            score += 0.5;
        }

        if msg.role == Role::Assistant
            && prev.role == Role::Assistant
            && prev_assistant_had_tools
            && !msg.has_tool_use
        {
            score += 0.3;
        }

        let start = floor_char_boundary(content, msg.offset.min(content.len()));
        let end = floor_char_boundary(content, (msg.offset + msg.length).min(content.len()));
        let body = &content[start..end];
        if TOPIC_MARKERS.iter().any(|re| re.is_match(body)) {
            score += 0.2;
        }

        if msg.role == Role::Assistant {
            consecutive_assistant += 1;
            prev_assistant_had_tools = msg.has_tool_use;
        } else {
            consecutive_assistant = 0;
            prev_assistant_had_tools = false;
        }

        if score >= 0.5 {
            boundaries.push(i);
        }
    }

    boundaries
}

/// Split content at paragraph breaks, targeting chunks near `target` bytes.
///
/// Looks for `\n\n` within a ±5000 window of the target; when none exists
/// the chunk is cut hard at `max` (clamped to a character boundary).
pub fn split_at_paragraphs(content: &str, target: usize, max: usize) -> Vec<String> {
    if content.len() <= max {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = content;

    while rest.len() > max {
        let lo = floor_char_boundary(rest, target.saturating_sub(5_000));
        let hi = floor_char_boundary(rest, (target + 5_000).min(rest.len()));
        let window = &rest[lo..hi];

        // Break closest to the target, scanning every \n\n in the window.
        let mut best: Option<usize> = None;
        let mut pos = 0;
        while let Some(idx) = window[pos..].find("\n\n") {
            let actual = lo + pos + idx;
            let closer = match best {
                None => true,
                Some(b) => actual.abs_diff(target) < b.abs_diff(target),
            };
            if closer {
                best = Some(actual);
            }
            pos += idx + 1;
        }

        let cut = best.unwrap_or_else(|| floor_char_boundary(rest, max));
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }

    chunks
}

/// Split content into semantic chunks based on topic boundaries.
///
/// 1. Detect boundaries from message structure.
/// 2. Split at the byte offsets of boundary messages.
/// 3. Merge forward any segment below `limits.min`; re-merge a short final
///    segment into its predecessor.
/// 4. Split anything above `limits.max` at paragraph breaks near
///    `limits.target`.
///
/// Without messages, or without any boundary, falls back to pure paragraph
/// splitting with the same target and max.
pub fn split_semantic(content: &str, messages: &[MessageData], limits: ChunkLimits) -> Vec<String> {
    if messages.is_empty() {
        return split_at_paragraphs(content, limits.target, limits.max);
    }

    let boundaries = detect_topic_boundaries(messages, content, DEFAULT_GAP_SECONDS);

    if boundaries.is_empty() {
        if content.len() <= limits.max {
            return vec![content.to_string()];
        }
        return split_at_paragraphs(content, limits.target, limits.max);
    }

    // Split just before each boundary message.
    let mut segments: Vec<&str> = Vec::new();
    let mut prev_offset = 0;
    for &idx in &boundaries {
        let cut = floor_char_boundary(content, messages[idx].offset.min(content.len()));
        let segment = content[prev_offset..cut].trim_end();
        if !segment.is_empty() {
            segments.push(segment);
        }
        prev_offset = cut;
    }
    let last = content[prev_offset..].trim_end();
    if !last.is_empty() {
        segments.push(last);
    }

    // Merge small segments forward.
    let mut merged: Vec<String> = Vec::new();
    let mut current = String::new();
    for segment in segments {
        if current.is_empty() {
            current.push_str(segment);
        } else if current.len() + segment.len() + 2 < limits.min {
            current.push_str("\n\n");
            current.push_str(segment);
        } else {
            merged.push(std::mem::take(&mut current));
            current.push_str(segment);
        }
    }
    if !current.is_empty() {
        merged.push(current);
    }

    // A lone short chunk stays as-is; a short final chunk merges backward.
    if merged.len() > 1 && merged.last().is_some_and(|c| c.len() < limits.min) {
        let tail = merged.pop().unwrap_or_default();
        if let Some(prev) = merged.last_mut() {
            prev.push_str("\n\n");
            prev.push_str(&tail);
        }
    }

    // Enforce the maximum.
    let mut chunks = Vec::new();
    for chunk in merged {
        if chunk.len() > limits.max {
            chunks.extend(split_at_paragraphs(&chunk, limits.target, limits.max));
        } else {
            chunks.push(chunk);
        }
    }

    chunks
}

/// Fixed-size overlapping split, used when no message structure exists and
/// the content exceeds the summarizer window. Prefers a paragraph break in
/// the last tenth of each chunk.
pub fn split_with_overlap(content: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if content.len() <= chunk_size {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < content.len() {
        let mut end = floor_char_boundary(content, (start + chunk_size).min(content.len()));

        if end < content.len() {
            let search_start = end.saturating_sub(chunk_size / 10);
            if let Some(idx) = content[search_start..end].rfind("\n\n") {
                if idx > 0 {
                    end = search_start + idx + 2;
                }
            }
        }

        chunks.push(content[start..end].to_string());

        if end >= content.len() {
            break;
        }
        let next = floor_char_boundary(content, end.saturating_sub(overlap));
        start = if next <= start { end } else { next };
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(ts_offset_secs: i64, role: Role, offset: usize, length: usize) -> MessageData {
        MessageData {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
                + chrono::Duration::seconds(ts_offset_secs),
            role,
            offset,
            length,
            is_tool_result: false,
            has_tool_use: false,
        }
    }

    #[test]
    fn test_boundary_by_time_gap() {
        // Messages at t, t+1m, t+11m: the ten-minute gap fires before index 2.
        let content = "first message\n\nsecond message\n\nthird message";
        let messages = vec![
            msg(0, Role::User, 0, 13),
            msg(60, Role::Assistant, 15, 14),
            msg(660, Role::User, 31, 13),
        ];
        let boundaries = detect_topic_boundaries(&messages, content, DEFAULT_GAP_SECONDS);
        assert_eq!(boundaries, vec![2]);
    }

    #[test]
    fn test_no_boundary_for_quick_exchange() {
        let content = "hello\n\nhi there";
        let messages = vec![msg(0, Role::User, 0, 5), msg(30, Role::Assistant, 7, 8)];
        let boundaries = detect_topic_boundaries(&messages, content, DEFAULT_GAP_SECONDS);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_user_return_after_assistant_run() {
        let content = "a\n\nb\n\nc\n\nd\n\ne";
        let messages = vec![
            msg(0, Role::User, 0, 1),
            msg(10, Role::Assistant, 3, 1),
            msg(20, Role::Assistant, 6, 1),
            msg(30, Role::Assistant, 9, 1),
            msg(40, Role::User, 12, 1),
        ];
        // 0.5 from the user return alone reaches the threshold.
        let boundaries = detect_topic_boundaries(&messages, content, DEFAULT_GAP_SECONDS);
        assert_eq!(boundaries, vec![4]);
    }

    #[test]
    fn test_marker_alone_is_not_enough() {
        let content = "intro\n\n# New heading here";
        let messages = vec![msg(0, Role::User, 0, 5), msg(10, Role::Assistant, 7, 18)];
        let boundaries = detect_topic_boundaries(&messages, content, DEFAULT_GAP_SECONDS);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn test_single_message_no_boundaries() {
        let messages = vec![msg(0, Role::User, 0, 5)];
        assert!(detect_topic_boundaries(&messages, "hello", DEFAULT_GAP_SECONDS).is_empty());
    }

    #[test]
    fn test_small_input_single_chunk() {
        let content = "short conversation";
        let messages = vec![msg(0, Role::User, 0, 18)];
        let chunks = split_semantic(content, &messages, ChunkLimits::default());
        assert_eq!(chunks, vec![content.to_string()]);
    }

    fn gapped_segments(sizes: &[usize]) -> (String, Vec<MessageData>) {
        let mut content = String::new();
        let mut messages = Vec::new();
        for (i, &size) in sizes.iter().enumerate() {
            if i > 0 {
                content.push_str("\n\n");
            }
            let offset = content.len();
            let body = "x".repeat(size);
            content.push_str(&body);
            messages.push(msg(i as i64 * 600, Role::User, offset, size));
        }
        (content, messages)
    }

    #[test]
    fn test_merge_small_segments_below_min() {
        let (content, messages) = gapped_segments(&[5_000, 5_000, 5_000]);
        let limits = ChunkLimits { min: 16_000, max: 80_000, target: 40_000 };
        let chunks = split_semantic(&content, &messages, limits);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].len() >= 15_000);
    }

    #[test]
    fn test_min_threshold_splits_into_two() {
        let (content, messages) = gapped_segments(&[5_000, 5_000, 5_000]);
        let limits = ChunkLimits { min: 10_000, max: 80_000, target: 40_000 };
        let chunks = split_semantic(&content, &messages, limits);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_split_at_paragraphs_near_target() {
        // Paragraphs of 1000 bytes; an oversized input should cut near target.
        let para = "y".repeat(998);
        let content = std::iter::repeat(para.as_str())
            .take(20)
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split_at_paragraphs(&content, 8_000, 12_000);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 12_000);
        }
        // First cut lands within the ±5000 window of the target.
        assert!(chunks[0].len().abs_diff(8_000) <= 5_000);
    }

    #[test]
    fn test_split_at_paragraphs_no_break_hard_cut() {
        let content = "z".repeat(30_000);
        let chunks = split_at_paragraphs(&content, 8_000, 12_000);
        assert!(chunks.iter().all(|c| c.len() <= 12_000));
        let total: usize = chunks.iter().map(String::len).sum();
        assert_eq!(total, 30_000);
    }

    #[test]
    fn test_split_semantic_no_messages_falls_back() {
        let para = "p".repeat(4_998);
        let content = std::iter::repeat(para.as_str())
            .take(10)
            .collect::<Vec<_>>()
            .join("\n\n");
        let limits = ChunkLimits { min: 5_000, max: 20_000, target: 10_000 };
        let chunks = split_semantic(&content, &[], limits);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 20_000));
    }

    #[test]
    fn test_split_with_overlap_covers_content() {
        let content = "w".repeat(10_000);
        let chunks = split_with_overlap(&content, 4_000, 500);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 4_000));
    }

    #[test]
    fn test_split_with_overlap_small_passthrough() {
        let chunks = split_with_overlap("tiny", 4_000, 500);
        assert_eq!(chunks, vec!["tiny".to_string()]);
    }

    #[test]
    fn test_chunks_respect_utf8_boundaries() {
        let content = "日本語のテキスト ".repeat(2_000);
        let chunks = split_at_paragraphs(&content, 8_000, 12_000);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
        }
    }
}
