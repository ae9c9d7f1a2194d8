// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Output Sanitizer (C3): strips control/role markers from model output and detects stop
//! sequences that straddle token boundaries via a rolling buffer.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

const ROLLING_BUFFER_LEN: usize = 20;

/// Outcome of classifying one token from the raw generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeOutcome {
    /// Emit this (possibly partially stripped) text to the client.
    Emit(String),
    /// Drop this token; it was a control sequence or became empty after stripping.
    Suppress,
    /// A stop sequence was detected; the caller must terminate generation. The token that
    /// triggered detection is not emitted.
    Stop,
}

pub struct OutputSanitizer {
    stop_tokens: Vec<String>,
    patterns: Vec<Regex>,
    buffer: VecDeque<String>,
}

impl OutputSanitizer {
    pub fn new(stop_tokens: &[&str]) -> Self {
        let mut patterns = Vec::new();
        for token in stop_tokens {
            patterns.push(Regex::new(&regex::escape(token)).expect("escaped literal is valid"));
        }
        for raw in CONTROL_PATTERNS {
            patterns.push(Regex::new(raw).expect("static control pattern is valid"));
        }

        Self {
            stop_tokens: stop_tokens.iter().map(|s| s.to_string()).collect(),
            patterns,
            buffer: VecDeque::with_capacity(ROLLING_BUFFER_LEN),
        }
    }

    /// Non-streaming sanitize: strip all control markers and stop tokens from a complete text,
    /// then collapse excess blank lines and trim.
    pub fn sanitize(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for pattern in &self.patterns {
            cleaned = pattern.replace_all(&cleaned, "").into_owned();
        }
        let collapsed = COLLAPSE_NEWLINES.replace_all(&cleaned, "\n\n");
        collapsed.trim().to_string()
    }

    /// Streaming sanitize: classify a single token against the rolling tail buffer.
    pub fn sanitize_token(&mut self, token: &str) -> SanitizeOutcome {
        self.buffer.push_back(token.to_string());
        while self.buffer.len() > ROLLING_BUFFER_LEN {
            self.buffer.pop_front();
        }
        let combined: String = self.buffer.iter().cloned().collect();

        if self.stop_tokens.iter().any(|stop| combined.contains(stop.as_str())) {
            return SanitizeOutcome::Stop;
        }

        for pattern in &self.patterns {
            if pattern.find(token).map(|m| m.start() == 0 && m.end() == token.len()).unwrap_or(false)
            {
                return SanitizeOutcome::Suppress;
            }
        }

        let mut cleaned = token.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&cleaned) {
                cleaned = pattern.replace_all(&cleaned, "").into_owned();
            }
        }

        if cleaned.is_empty() && !token.is_empty() {
            return SanitizeOutcome::Suppress;
        }

        SanitizeOutcome::Emit(cleaned)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

static CONTROL_PATTERNS: &[&str] = &[
    r"<\|im_start\|>\s*(user|assistant|system)\s*",
    r"<\|im_end\|>",
    r"\[INST\]",
    r"\[/INST\]",
    r"<<SYS>>",
    r"<</SYS>>",
    r"<s>",
    r"</s>",
    r"<\|begin_of_text\|>",
    r"<\|end_of_text\|>",
    r"<\|start_header_id\|>\s*(user|assistant|system)\s*<\|end_header_id\|>",
    r"<\|eot_id\|>",
    r"###\s*(Instruction|Response|System):\s*",
];

static COLLAPSE_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static pattern is valid"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_chatml_markers() {
        let sanitizer = OutputSanitizer::new(&["<|im_end|>"]);
        let out = sanitizer.sanitize("<|im_start|>assistant\nHello<|im_end|>");
        assert_eq!(out, "Hello");
    }

    #[test]
    fn sanitize_collapses_excess_newlines() {
        let sanitizer = OutputSanitizer::new(&["</s>"]);
        let out = sanitizer.sanitize("a\n\n\n\nb");
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn idempotent_on_already_clean_text() {
        let sanitizer = OutputSanitizer::new(&["</s>"]);
        let once = sanitizer.sanitize("Hello there");
        let twice = sanitizer.sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn streaming_stop_token_split_across_tokens_is_detected() {
        let mut sanitizer = OutputSanitizer::new(&["</s>"]);
        let mut emitted = String::new();
        let tokens = ["Hel", "lo", " ", "</", "s>", " ignored"];
        for token in tokens {
            match sanitizer.sanitize_token(token) {
                SanitizeOutcome::Emit(text) => emitted.push_str(&text),
                SanitizeOutcome::Suppress => {}
                SanitizeOutcome::Stop => break,
            }
        }
        assert_eq!(emitted, "Hello ");
    }

    #[test]
    fn full_control_token_is_suppressed_not_emitted() {
        let mut sanitizer = OutputSanitizer::new(&["<|im_end|>"]);
        let outcome = sanitizer.sanitize_token("<|im_start|>user\n");
        assert_eq!(outcome, SanitizeOutcome::Suppress);
    }
}
