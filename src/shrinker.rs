//! Shrinker - token renaming over minified content
//!
//! Replaces RegExp-matchable long identifiers (CSS classes, ids, data
//! properties written as `_LIKE_THIS`) with short generated names, shared
//! across every asset in the process so references stay consistent. This is
//! a pure string substitution pass; no code is ever evaluated.
//!
//! At environment quiescence the token table is dumped (sorted by use
//! count) to the diagnostic cache for inspection.

use std::collections::HashMap;

use regex::{Captures, Regex};

/// Replacement alphabet for generated names.
const REPLACEMENT_CHARACTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Generated names that would collide with language keywords are skipped.
const SKIP_WORDS: &[&str] = &[
    "do", "id", "in", "if", "for", "new", "try", "var", "case", "else", "this", "void", "with",
];

struct Token {
    replacement: String,
    count: usize,
}

/// Shared token-renaming state.
pub struct Shrinker {
    patterns: Vec<Regex>,
    tokens: HashMap<String, Token>,
    order: Vec<String>,
    token_count: usize,
}

impl Default for Shrinker {
    fn default() -> Self {
        Self::new()
    }
}

impl Shrinker {
    pub fn new() -> Self {
        Self {
            patterns: vec![Regex::new(r"(?i)(^|[^A-Z0-9])(_[A-Z][_A-Z0-9]+)").unwrap()],
            tokens: HashMap::new(),
            order: Vec::new(),
            token_count: 0,
        }
    }

    /// Forget every token and start numbering from scratch.
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.order.clear();
        self.token_count = 0;
    }

    /// Rename every matching token in the given text.
    pub fn shrink(&mut self, text: &str) -> String {
        let patterns = self.patterns.clone();
        let mut shrunk = text.to_string();
        for pattern in &patterns {
            shrunk = pattern
                .replace_all(&shrunk, |captures: &Captures| {
                    let prefix = captures.get(1).map_or("", |m| m.as_str());
                    let name = captures.get(2).map_or("", |m| m.as_str());
                    let replacement = self.token_replacement(name);
                    format!("{prefix}{replacement}")
                })
                .into_owned();
        }
        shrunk
    }

    fn token_replacement(&mut self, name: &str) -> String {
        if !self.tokens.contains_key(name) {
            let replacement = self.next_replacement();
            self.tokens.insert(
                name.to_string(),
                Token {
                    replacement,
                    count: 0,
                },
            );
            self.order.push(name.to_string());
        }
        let token = self.tokens.get_mut(name).unwrap();
        token.count += 1;
        token.replacement.clone()
    }

    /// Next short name in base-26, skipping reserved words.
    fn next_replacement(&mut self) -> String {
        let radix = REPLACEMENT_CHARACTERS.len();
        let mut replacement = String::new();
        while replacement.is_empty() || SKIP_WORDS.contains(&replacement.as_str()) {
            let mut number = self.token_count;
            self.token_count += 1;
            replacement = (REPLACEMENT_CHARACTERS[number % radix] as char).to_string();
            while number >= radix {
                number = (number as f64 / radix as f64 - 0.999).floor() as usize;
                replacement.insert(0, REPLACEMENT_CHARACTERS[number % radix] as char);
            }
        }
        replacement
    }

    /// Token table as JSON `[[token, count], ...]`, most-used first.
    pub fn token_dump(&self) -> String {
        let mut counts: Vec<(&str, usize)> = self
            .order
            .iter()
            .map(|name| (name.as_str(), self.tokens[name].count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        serde_json::to_string(&counts).unwrap_or_else(|_| "[]".to_string())
    }
}
