//! Token counting and token-bounded trimming using tiktoken-rs.
//!
//! Every chunk-size decision in the pipeline goes through one [`Tokenizer`]
//! (cl100k_base), so the `token_count` stored on a chunk always matches what
//! the chunker measured while building it.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Default number of cached token counts
const DEFAULT_CACHE_SIZE: usize = 10_000;

/// How many token positions a boundary may shift when a cut lands inside a
/// multi-byte character.
const MAX_BOUNDARY_SHIFT: usize = 4;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Failed to load tokenizer: {0}")]
    Load(String),
    #[error("Failed to decode tokens: {0}")]
    Decode(String),
}

impl Serialize for TokenError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Cache for token counts, keyed by content hash
struct TokenCache {
    cache: HashMap<u64, u32>,
    max_size: usize,
}

impl TokenCache {
    fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    fn get(&self, hash: u64) -> Option<u32> {
        self.cache.get(&hash).copied()
    }

    fn insert(&mut self, hash: u64, count: u32) {
        // At capacity: drop half the entries
        if self.cache.len() >= self.max_size {
            let keys_to_remove: Vec<_> = self.cache.keys().take(self.max_size / 2).copied().collect();
            for key in keys_to_remove {
                self.cache.remove(&key);
            }
        }
        self.cache.insert(hash, count);
    }
}

/// Hash content for cache lookup
fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// The single tokenization scheme shared by chunking, validation and the CLI.
pub struct Tokenizer {
    bpe: CoreBPE,
    cache: RwLock<TokenCache>,
}

impl Tokenizer {
    /// Load the cl100k_base encoding.
    pub fn cl100k() -> Result<Self, TokenError> {
        let bpe = cl100k_base().map_err(|e| TokenError::Load(e.to_string()))?;
        Ok(Self {
            bpe,
            cache: RwLock::new(TokenCache::new(DEFAULT_CACHE_SIZE)),
        })
    }

    /// Count tokens in `text`. Results are cached by content hash.
    pub fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let content_hash = hash_content(text);
        if let Some(count) = self.cache.read().get(content_hash) {
            return count;
        }

        let count = self.bpe.encode_ordinary(text).len() as u32;
        self.cache.write().insert(content_hash, count);
        count
    }

    /// First `max_tokens` tokens of `text`.
    ///
    /// The returned string re-encodes to at most `max_tokens` tokens; BPE can
    /// merge differently after a cut, so the window shrinks until it fits.
    pub fn head(&self, text: &str, max_tokens: usize) -> Result<String, TokenError> {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }

        let mut end = max_tokens;
        loop {
            let trimmed = self.decode_range(&tokens, 0, end, Cut::End)?;
            if self.count(&trimmed) as usize <= max_tokens || end == 0 {
                return Ok(trimmed);
            }
            end -= 1;
        }
    }

    /// Last `n_tokens` tokens of `text`.
    pub fn tail(&self, text: &str, n_tokens: usize) -> Result<String, TokenError> {
        if n_tokens == 0 {
            return Ok(String::new());
        }
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= n_tokens {
            return Ok(text.to_string());
        }
        self.decode_range(&tokens, tokens.len() - n_tokens, tokens.len(), Cut::Start)
    }

    /// Split `text` into consecutive windows of at most `max_tokens` tokens.
    /// Used for atomic units (a single word) that exceed the limit on their own.
    pub fn windows(&self, text: &str, max_tokens: usize) -> Result<Vec<String>, TokenError> {
        let max_tokens = max_tokens.max(1);
        let mut pieces = Vec::new();
        let mut rest = text.to_string();

        while !rest.is_empty() {
            let piece = self.head(&rest, max_tokens)?;
            if piece.is_empty() {
                // A single character wider than the limit: emit it alone
                let Some(first) = rest.chars().next() else { break };
                pieces.push(first.to_string());
                rest = rest[first.len_utf8()..].to_string();
                continue;
            }
            rest = rest[piece.len()..].to_string();
            pieces.push(piece);
        }

        Ok(pieces)
    }

    /// Decode `tokens[start..end]`, nudging the cut boundary when it splits a
    /// multi-byte character.
    fn decode_range(&self, tokens: &[usize], start: usize, end: usize, cut: Cut) -> Result<String, TokenError> {
        let mut last_error = String::new();
        for shift in 0..=MAX_BOUNDARY_SHIFT {
            let (s, e) = match cut {
                Cut::End => (start, end.saturating_sub(shift)),
                Cut::Start => ((start + shift).min(end), end),
            };
            match self.bpe.decode(tokens[s..e].to_vec()) {
                Ok(text) => return Ok(text),
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(TokenError::Decode(last_error))
    }
}

#[derive(Clone, Copy)]
enum Cut {
    Start,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer() -> Tokenizer {
        Tokenizer::cl100k().unwrap()
    }

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(tokenizer().count(""), 0);
    }

    #[test]
    fn test_count_tokens_simple() {
        let count = tokenizer().count("Hello, world!");
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn test_count_tokens_cached() {
        let tok = tokenizer();
        let text = "This is a test sentence for caching.";
        assert_eq!(tok.count(text), tok.count(text));
    }

    #[test]
    fn test_head_within_limit_is_identity() {
        let tok = tokenizer();
        let text = "Short text.";
        assert_eq!(tok.head(text, 100).unwrap(), text);
    }

    #[test]
    fn test_head_trims_to_limit() {
        let tok = tokenizer();
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let trimmed = tok.head(text, 5).unwrap();
        assert!(tok.count(&trimmed) <= 5);
        assert!(text.starts_with(&trimmed));
    }

    #[test]
    fn test_tail_returns_suffix() {
        let tok = tokenizer();
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let tail = tok.tail(text, 3).unwrap();
        assert!(text.ends_with(&tail));
        assert!(tok.count(&tail) <= 3);
        assert_eq!(tok.tail(text, 0).unwrap(), "");
    }

    #[test]
    fn test_windows_cover_text() {
        let tok = tokenizer();
        let word = "supercalifragilisticexpialidocious".repeat(8);
        let pieces = tok.windows(&word, 4).unwrap();
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), word);
        for piece in &pieces {
            assert!(tok.count(piece) <= 4);
        }
    }
}
