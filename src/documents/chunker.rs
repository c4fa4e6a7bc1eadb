//! Document Chunking
//!
//! Splits cleaned text into token-bounded passages. Sentences are packed
//! greedily up to `max_tokens`; each new chunk is seeded with the tail of the
//! previous one; over-long sentences fall back to word packing; chunks under
//! `min_tokens` are folded into their predecessor when the result still fits.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ConfigError;
use crate::rbac::{Department, Role};
use crate::tokens::{TokenError, Tokenizer};

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tokenizer error: {0}")]
    Token(#[from] TokenError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("File too large: {0} bytes (max {1} bytes)")]
    FileTooLarge(u64, u64),
    #[error("Documents {first} and {second} share the name '{name}'; chunk ids would collide")]
    DuplicateSource { name: String, first: String, second: String },
}

impl Serialize for ChunkerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Token bounds for chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 300,
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// A retrievable passage of a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// `<source_document>_<ordinal>`, ordinal 1-based and zero-padded
    pub chunk_id: String,
    pub text: String,
    pub source_document: String,
    pub department: Department,
    pub accessible_roles: Vec<Role>,
    /// Token length of `text` under the shared tokenizer
    pub token_count: u32,
}

/// Build a chunk ID from its document and 1-based ordinal
pub fn chunk_id(source_document: &str, ordinal: usize) -> String {
    format!("{}_{:03}", source_document, ordinal)
}

/// Split text into sentences (Unicode sentence boundaries, UAX #29)
fn split_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct Chunker {
    tokenizer: Arc<Tokenizer>,
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(tokenizer: Arc<Tokenizer>, config: ChunkerConfig) -> Self {
        Self { tokenizer, config }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Chunk cleaned text. Empty input yields no chunks; no chunk ever exceeds
    /// `max_tokens` tokens.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>, TokenError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let max = self.config.max_tokens;
        if self.tokenizer.count(text) as usize <= max {
            return Ok(vec![text.to_string()]);
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in split_sentences(text) {
            let sentence_tokens = self.tokenizer.count(sentence) as usize;

            if sentence_tokens > max {
                // Close what we have first so output keeps document order
                if !current.is_empty() {
                    chunks.push(self.close(&current)?);
                    current.clear();
                    current_tokens = 0;
                }
                chunks.extend(self.split_oversized(sentence)?);
                continue;
            }

            if !current.is_empty() && current_tokens + sentence_tokens > max {
                let closed = self.close(&current)?;
                // Overlap shrinks when the incoming sentence leaves less room
                let room = max - sentence_tokens;
                let overlap = self
                    .tokenizer
                    .tail(&closed, self.config.overlap_tokens.min(room))?;
                chunks.push(closed);

                current.clear();
                current_tokens = 0;
                if !overlap.trim().is_empty() {
                    current_tokens = self.tokenizer.count(&overlap) as usize;
                    current.push(overlap.trim().to_string());
                }
            }

            current.push(sentence.to_string());
            current_tokens += sentence_tokens;
        }

        if !current.is_empty() {
            chunks.push(self.close(&current)?);
        }

        self.merge_short(chunks)
    }

    /// Join buffered parts and hard-trim to `max_tokens`
    fn close(&self, parts: &[String]) -> Result<String, TokenError> {
        self.tokenizer.head(&parts.join(" "), self.config.max_tokens)
    }

    /// Word-by-word packing for a sentence that alone exceeds `max_tokens`.
    fn split_oversized(&self, sentence: &str) -> Result<Vec<String>, TokenError> {
        let max = self.config.max_tokens;
        let mut pieces = Vec::new();
        let mut words: Vec<&str> = Vec::new();
        let mut word_total = 0usize;

        for word in sentence.split_whitespace() {
            let word_tokens = self.tokenizer.count(&format!("{} ", word)) as usize;

            if word_tokens > max {
                if !words.is_empty() {
                    pieces.push(self.tokenizer.head(&words.join(" "), max)?);
                    words.clear();
                    word_total = 0;
                }
                pieces.extend(self.tokenizer.windows(word, max)?);
                continue;
            }

            if !words.is_empty() && word_total + word_tokens > max {
                pieces.push(self.tokenizer.head(&words.join(" "), max)?);
                words.clear();
                word_total = 0;
            }
            words.push(word);
            word_total += word_tokens;
        }

        if !words.is_empty() {
            pieces.push(self.tokenizer.head(&words.join(" "), max)?);
        }

        pieces.retain(|p| !p.trim().is_empty());
        Ok(pieces)
    }

    /// Fold chunks under `min_tokens` into the previous chunk when the merge
    /// fits. Looks backward only: a short first chunk stays as it is.
    fn merge_short(&self, chunks: Vec<String>) -> Result<Vec<String>, TokenError> {
        let max = self.config.max_tokens;
        let mut merged: Vec<String> = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let chunk = self.tokenizer.head(&chunk, max)?;
            if chunk.trim().is_empty() {
                continue;
            }

            if (self.tokenizer.count(&chunk) as usize) < self.config.min_tokens {
                if let Some(previous) = merged.last_mut() {
                    let candidate = format!("{} {}", previous, chunk);
                    if self.tokenizer.count(&candidate) as usize <= max {
                        *previous = candidate;
                        continue;
                    }
                }
            }

            merged.push(chunk);
        }

        Ok(merged)
    }

    /// Chunk a document's cleaned text into records tagged with its
    /// department and roles.
    pub fn chunk_records(
        &self,
        source_document: &str,
        cleaned_text: &str,
        department: Department,
        accessible_roles: &[Role],
    ) -> Result<Vec<ChunkRecord>, TokenError> {
        let chunks = self.chunk(cleaned_text)?;

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, text)| ChunkRecord {
                chunk_id: chunk_id(source_document, i + 1),
                token_count: self.tokenizer.count(&text),
                text,
                source_document: source_document.to_string(),
                department,
                accessible_roles: accessible_roles.to_vec(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn shared_tokenizer() -> Arc<Tokenizer> {
        static TOKENIZER: OnceLock<Arc<Tokenizer>> = OnceLock::new();
        TOKENIZER
            .get_or_init(|| Arc::new(Tokenizer::cl100k().unwrap()))
            .clone()
    }

    fn chunker(min: usize, max: usize, overlap: usize) -> Chunker {
        Chunker::new(
            shared_tokenizer(),
            ChunkerConfig {
                min_tokens: min,
                max_tokens: max,
                overlap_tokens: overlap,
            },
        )
    }

    fn numbered_sentences(n: usize) -> String {
        (1..=n)
            .map(|i| format!("Sentence number {} talks about quarterly budget planning in detail.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_input() {
        assert!(chunker(5, 50, 5).chunk("").unwrap().is_empty());
        assert!(chunker(5, 50, 5).chunk("   ").unwrap().is_empty());
    }

    #[test]
    fn test_single_short_sentence_is_one_chunk() {
        let text = "The travel policy covers economy flights only.";
        let chunks = chunker(300, 512, 50).chunk(text).unwrap();
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_short_document_returned_whole() {
        let text = numbered_sentences(5);
        let chunks = chunker(300, 512, 50).chunk(&text).unwrap();
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_long_document_respects_max() {
        let c = chunker(20, 60, 10);
        let text = numbered_sentences(40);
        let chunks = c.chunk(&text).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(c.tokenizer().count(chunk) <= 60, "chunk over limit: {}", chunk);
        }
    }

    #[test]
    fn test_overlap_comes_from_previous_chunk_tail() {
        let c = chunker(1, 60, 8);
        let text = numbered_sentences(12);
        let chunks = c.chunk(&text).unwrap();
        assert!(chunks.len() > 1);

        let tail = c.tokenizer().tail(&chunks[0], 8).unwrap();
        assert!(chunks[1].starts_with(tail.trim()), "second chunk should open with the first chunk's tail");
    }

    #[test]
    fn test_oversized_sentence_falls_back_to_words() {
        let c = chunker(1, 30, 5);
        let long_sentence = (0..120).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = c.chunk(&format!("Intro line here. {}.", long_sentence)).unwrap();
        assert!(chunks.len() > 2);
        for chunk in &chunks {
            assert!(c.tokenizer().count(chunk) <= 30);
        }
        assert!(chunks[0].starts_with("Intro line here."));
    }

    #[test]
    fn test_single_giant_word_is_windowed() {
        let c = chunker(1, 10, 2);
        let word = "x".repeat(400);
        let chunks = c.chunk(&word).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(c.tokenizer().count(chunk) <= 10);
        }
    }

    #[test]
    fn test_short_trailing_chunk_merges_backward() {
        let c = chunker(25, 60, 0);
        let body = numbered_sentences(3);
        let text = format!("{} Done.", body);
        let chunks = c.chunk(&text).unwrap();
        // "Done." is far below min_tokens and must not stand alone
        assert!(chunks.iter().all(|chunk| chunk != "Done."));
        assert!(chunks.last().unwrap().ends_with("Done."));
    }

    #[test]
    fn test_merge_skipped_when_it_would_overflow() {
        let c = chunker(10, 14, 0);
        let first = "one two three four five six seven eight nine ten eleven twelve thirteen".to_string();
        let tail = "tiny tail".to_string();
        assert!(c.tokenizer().count(&first) as usize <= 14);
        assert!(c.tokenizer().count(&format!("{} {}", first, tail)) as usize > 14);

        let merged = c.merge_short(vec![first.clone(), tail.clone()]).unwrap();
        assert_eq!(merged, vec![first, tail]);
    }

    #[test]
    fn test_short_first_chunk_stays() {
        let c = chunker(50, 100, 0);
        let merged = c.merge_short(vec!["lonely start".to_string()]).unwrap();
        assert_eq!(merged, vec!["lonely start".to_string()]);
    }

    #[test]
    fn test_idempotent_boundaries() {
        let c = chunker(20, 60, 10);
        let text = numbered_sentences(30);
        assert_eq!(c.chunk(&text).unwrap(), c.chunk(&text).unwrap());
    }

    #[test]
    fn test_chunk_records_ids_and_counts() {
        let c = chunker(20, 60, 10);
        let text = numbered_sentences(20);
        let records = c
            .chunk_records("budget.md", &text, Department::Finance, &[Role::Finance, Role::CLevel])
            .unwrap();
        assert!(records.len() > 1);
        assert_eq!(records[0].chunk_id, "budget.md_001");
        assert_eq!(records[1].chunk_id, "budget.md_002");
        for record in &records {
            assert_eq!(record.token_count, c.tokenizer().count(&record.text));
            assert_eq!(record.department, Department::Finance);
            assert_eq!(record.accessible_roles, vec![Role::Finance, Role::CLevel]);
        }
    }

    fn sentence_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[A-Za-z]{1,10}( [A-Za-z]{1,10}){0,25}[.!?]",
            "[a-z]{30,90}",
            "[A-Za-z0-9]{1,8}( [A-Za-z0-9,]{1,8}){40,90}\\.",
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_chunk_exceeds_max(
            sentences in proptest::collection::vec(sentence_strategy(), 0..30),
            max in 8usize..80,
            min_ratio in 0.0f64..1.0,
            overlap_ratio in 0.0f64..0.9,
        ) {
            let min = ((max as f64 * min_ratio) as usize).max(1);
            let overlap = (max as f64 * overlap_ratio) as usize;
            let c = chunker(min, max, overlap);
            let text = sentences.join(" ");

            let chunks = c.chunk(&text).unwrap();
            for chunk in &chunks {
                prop_assert!(c.tokenizer().count(chunk) as usize <= max);
                prop_assert!(!chunk.trim().is_empty());
            }
            prop_assert_eq!(chunks.clone(), c.chunk(&text).unwrap());
        }
    }
}
