//! Log context assembly for inference prompts
//!
//! Buffered history from several sources is merged into one transcript
//! ordered by timestamp. When the transcript would not fit the character
//! budget, each source gets an equal share of it, error-looking lines get
//! first claim on that share, and the rest of the share goes to the most
//! recent lines.
//!
//! The split is deliberately equal: a source with far more errors than
//! the others does not get a larger share.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::event::LogEvent;

/// Substrings (case-insensitive) that mark a line as error-indicative
pub const ERROR_KEYWORDS: [&str; 6] = ["error", "exception", "fatal", "panic", "status: 5", "failed"];

/// Characters a rendered line costs beyond its source name and text:
/// the brackets, the separating space and the newline.
pub const LINE_OVERHEAD: usize = 4;

static ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives: Vec<String> = ERROR_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&format!("(?i){}", alternatives.join("|"))).unwrap()
});

/// Check whether a line looks like it reports a failure
pub fn is_error_indicative(text: &str) -> bool {
    ERROR_PATTERN.is_match(text)
}

/// A pane's history offered as inference context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSource {
    pub name: String,
    pub selected: bool,
    pub line_count: usize,
    /// Rough size in characters, for display
    pub char_estimate: usize,
}

/// One line of context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLine {
    pub timestamp: DateTime<Utc>,
    pub source_name: String,
    pub text: String,
}

impl ContextLine {
    pub fn new(timestamp: DateTime<Utc>, source_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            source_name: source_name.into(),
            text: text.into(),
        }
    }

    pub fn from_event(source_name: &str, event: &LogEvent) -> Self {
        Self::new(event.timestamp, source_name, event.text.clone())
    }

    /// Budget cost of the rendered line
    pub fn size(&self) -> usize {
        self.source_name.len() + self.text.len() + LINE_OVERHEAD
    }

    pub fn render(&self) -> String {
        format!("[{}] {}", self.source_name, self.text)
    }
}

/// All lines of one source, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHistory {
    pub name: String,
    /// Lines arrived out-of-band rather than from a live session
    pub synthetic: bool,
    pub lines: Vec<ContextLine>,
}

/// Result of assembling context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    /// Kept lines in timestamp order
    pub lines: Vec<ContextLine>,
    /// Number of input lines across all sources
    pub total_lines: usize,
}

impl AssembledContext {
    pub fn retained_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn is_truncated(&self) -> bool {
        self.lines.len() < self.total_lines
    }

    /// Render the transcript, with a footer when lines were left out
    pub fn render(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(ContextLine::render)
            .collect::<Vec<_>>()
            .join("\n");
        if self.is_truncated() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "[showing {} of {} log lines]",
                self.lines.len(),
                self.total_lines
            ));
        }
        out
    }
}

/// Pick which line indices of one source to keep within `share` characters.
fn retain_within_share(lines: &[ContextLine], share: usize) -> Vec<usize> {
    let error_indices: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_error_indicative(&line.text))
        .map(|(i, _)| i)
        .collect();
    let error_size: usize = error_indices.iter().map(|&i| lines[i].size()).sum();

    let reserved = if error_size > share { share / 2 } else { error_size };
    let recent_budget = share - reserved;

    // Newest to oldest, stopping at the first line that does not fit.
    let mut kept = Vec::new();
    let mut used = 0;
    for i in (0..lines.len()).rev() {
        let size = lines[i].size();
        if used + size > recent_budget {
            break;
        }
        used += size;
        kept.push(i);
    }
    kept.reverse();

    // Error lines older than the recency window come out of the reservation.
    let oldest_kept = kept.first().copied().unwrap_or(lines.len());
    let mut rescued = Vec::new();
    let mut reserve_used = 0;
    for &i in error_indices.iter().rev().filter(|&&i| i < oldest_kept) {
        let size = lines[i].size();
        if reserve_used + size <= reserved {
            reserve_used += size;
            rescued.push(i);
        }
    }
    rescued.reverse();

    rescued.extend(kept);
    rescued
}

/// Merge and, if needed, truncate source histories to fit `char_budget`.
///
/// Deterministic for identical input: ordering depends only on the line
/// timestamps, the order of `sources`, and each source's line order.
pub fn assemble(sources: &[SourceHistory], char_budget: usize) -> AssembledContext {
    let total_lines: usize = sources.iter().map(|s| s.lines.len()).sum();
    let total_size: usize = sources
        .iter()
        .flat_map(|s| s.lines.iter())
        .map(ContextLine::size)
        .sum();

    let mut lines: Vec<ContextLine> = if total_size <= char_budget {
        sources.iter().flat_map(|s| s.lines.iter().cloned()).collect()
    } else {
        let share = char_budget / sources.len();
        tracing::debug!(
            "Context of {} chars exceeds budget {}, {} chars per source",
            total_size,
            char_budget,
            share
        );
        sources
            .iter()
            .flat_map(|s| {
                retain_within_share(&s.lines, share)
                    .into_iter()
                    .map(|i| s.lines[i].clone())
            })
            .collect()
    };

    // Stable: ties keep source order, then per-source order.
    lines.sort_by_key(|line| line.timestamp);

    AssembledContext { lines, total_lines }
}

/// Build the log transcript handed to the inference call
pub fn build_prompt(sources: &[SourceHistory], char_budget: usize) -> String {
    assemble(sources, char_budget).render()
}
