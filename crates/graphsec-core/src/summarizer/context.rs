//! Rolling context of recent summaries, bounded by a token budget.

use std::collections::VecDeque;

use crate::config::CHARS_PER_TOKEN;

/// Rough token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    tokens: usize,
}

/// Most recent summaries, oldest evicted first once over budget.
#[derive(Debug, Clone)]
pub struct ContextBuffer {
    entries: VecDeque<Entry>,
    tokens: usize,
    limit: usize,
}

impl ContextBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            tokens: 0,
            limit,
        }
    }

    /// Append a summary for `name`, then evict until within budget.
    /// An entry larger than the whole budget is dropped.
    pub fn push(&mut self, name: &str, summary: &str) {
        let text = format!("- {}: {}", name, summary.trim());
        let tokens = estimate_tokens(&text);
        if tokens > self.limit {
            return;
        }
        self.entries.push_back(Entry { text, tokens });
        self.tokens += tokens;
        while self.tokens > self.limit {
            match self.entries.pop_front() {
                Some(old) => self.tokens -= old.tokens,
                None => break,
            }
        }
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
