//! Token Estimation
//!
//! Heuristic token counting for context-window budgeting. Estimates only;
//! no tokenizer is consulted.

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;

/// Default context window.
pub const DEFAULT_MAX_TOKENS: usize = 4096;

const COMMON_WORDS: [&str; 10] = ["the", "be", "to", "of", "and", "a", "in", "that", "have", "i"];
const SUBWORDS: [&str; 7] = ["ing", "ed", "ly", "er", "est", "tion", "ment"];

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.,!?;:'"(){}\[\]]"#).expect("valid punctuation pattern"));
static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("valid number pattern"));
static NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n+").expect("valid newline pattern"));

// == Estimate ==
/// Estimates how many tokens `text` costs. Never less than 1.
pub fn estimate_tokens(text: &str) -> usize {
    let mut tokens = 0;

    for word in text.split_whitespace() {
        if COMMON_WORDS.contains(&word.to_lowercase().as_str()) || NUMBER.is_match(word) {
            tokens += 1;
            continue;
        }

        tokens += PUNCTUATION.find_iter(word).count();

        let mut remaining = word.to_string();
        for subword in SUBWORDS {
            if remaining.contains(subword) {
                tokens += 1;
                remaining = remaining.replacen(subword, "", 1);
            }
        }

        tokens += remaining.chars().count().div_ceil(4);
    }

    tokens += NEWLINES.find_iter(text).count();
    tokens.max(1)
}

// == Token Counter ==
/// Running token budget. Shareable between tasks.
#[derive(Debug)]
pub struct TokenCounter {
    max_tokens: usize,
    used: AtomicUsize,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl TokenCounter {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            used: AtomicUsize::new(0),
        }
    }

    pub fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    /// Adds the estimate for `text` to the running total and returns it.
    pub fn track(&self, text: &str) -> usize {
        let tokens = estimate_tokens(text);
        self.used.fetch_add(tokens, Ordering::SeqCst);
        tokens
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Budget left; negative once overspent.
    pub fn remaining(&self) -> i64 {
        self.max_tokens as i64 - self.used() as i64
    }

    pub fn would_exceed_limit(&self, text: &str) -> bool {
        self.used() + estimate_tokens(text) > self.max_tokens
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_costs_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("   "), 1);
    }

    #[test]
    fn test_common_words_and_numbers() {
        // "the" and "a" are common, "2024" is numeric
        assert_eq!(estimate_tokens("the a 2024"), 3);
        assert_eq!(estimate_tokens("The"), 1);
    }

    #[test]
    fn test_subwords_and_remainder() {
        // "running": "ing" found (1), remainder "runn" -> 1
        assert_eq!(estimate_tokens("running"), 2);
        // "cat" -> ceil(3/4) = 1
        assert_eq!(estimate_tokens("cat"), 1);
        // "abcdefgh" -> 2
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn test_punctuation_and_newlines() {
        // "hi!" -> punctuation 1 + ceil(3/4) 1; newline run counts 1; "yo" -> 1
        assert_eq!(estimate_tokens("hi!\n\nyo"), 4);
    }

    #[test]
    fn test_counter_tracks_and_resets() {
        let counter = TokenCounter::new(10);
        assert_eq!(counter.track("abcdefgh"), 2);
        assert_eq!(counter.used(), 2);
        assert_eq!(counter.remaining(), 8);

        counter.reset();
        assert_eq!(counter.used(), 0);
    }

    #[test]
    fn test_would_exceed_limit() {
        let counter = TokenCounter::new(3);
        counter.track("abcdefgh");
        assert!(!counter.would_exceed_limit("cat"));
        assert!(counter.would_exceed_limit("abcdefgh"));
    }

    #[test]
    fn test_default_budget() {
        assert_eq!(TokenCounter::default().max_tokens(), DEFAULT_MAX_TOKENS);
    }
}
