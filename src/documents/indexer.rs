//! Index Builder
//!
//! Loads chunk records into the vector index, reusing cached embeddings by
//! `chunk_id` and embedding only what the cache lacks.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::chunker::{ChunkRecord, ChunkerError};
use super::embeddings::{Embedder, Embedding, EmbeddingError};
use super::store::{EmbeddingCache, StoreError};
use super::validation::ValidationError;
use crate::config::ConfigError;
use crate::index::{IndexEntry, IndexError, VectorIndex};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Chunking failed: {0}")]
    Chunker(#[from] ChunkerError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Serialize for BuildError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Counts from one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub total: usize,
    pub reused: usize,
    pub embedded: usize,
    /// Records written to the vector index; 0 for a cache-only build
    pub upserted: usize,
}

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    index: Option<Arc<dyn VectorIndex>>,
    batch_size: usize,
    concurrency: usize,
    revalidate_cached_text: bool,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index: Some(index),
            ..Self::cache_only(embedder)
        }
    }

    /// Builder that only fills the embedding cache. Used for the in-process
    /// backend, which is loaded from the cache at query time.
    pub fn cache_only(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: None,
            batch_size: 64,
            concurrency: 4,
            revalidate_cached_text: false,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Re-embed cached entries whose stored text differs from the chunk.
    pub fn revalidate_cached_text(mut self, enabled: bool) -> Self {
        self.revalidate_cached_text = enabled;
        self
    }

    fn cached<'a>(&self, cache: &'a EmbeddingCache, record: &ChunkRecord) -> Option<&'a Embedding> {
        let entry = cache.get(&record.chunk_id)?;
        if self.revalidate_cached_text && entry.record.text != record.text {
            debug!(chunk_id = %record.chunk_id, "Cached text changed; re-embedding");
            return None;
        }
        Some(&entry.embedding)
    }

    /// Embed what is missing, rewrite the cache, then upsert every record.
    pub async fn build(&self, records: &[ChunkRecord], cache: &mut EmbeddingCache) -> Result<IndexReport, BuildError> {
        let mut report = IndexReport {
            total: records.len(),
            ..IndexReport::default()
        };

        let missing: Vec<&ChunkRecord> = records
            .iter()
            .filter(|r| self.cached(cache, r).is_none())
            .collect();
        report.embedded = missing.len();
        report.reused = records.len() - missing.len();
        info!(total = report.total, reused = report.reused, to_embed = report.embedded, "Building index");

        let embedder = &self.embedder;
        let fresh: Vec<Vec<Embedding>> = stream::iter(missing.chunks(self.batch_size))
            .map(|batch| async move {
                let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
                embedder.embed_batch(&texts).await
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for (record, embedding) in missing.iter().zip(fresh.into_iter().flatten()) {
            cache.insert((*record).clone(), embedding);
        }
        cache.save()?;

        let Some(index) = &self.index else {
            info!(total = report.total, embedded = report.embedded, "Embedding cache updated; no index to upsert");
            return Ok(report);
        };

        for batch in records.chunks(self.batch_size) {
            let mut entries = Vec::with_capacity(batch.len());
            for record in batch {
                let embedding = cache
                    .get(&record.chunk_id)
                    .map(|e| e.embedding.clone())
                    .ok_or_else(|| IndexError::Invalid(format!("no embedding for {}", record.chunk_id)))?;
                entries.push(IndexEntry::from_record(record, embedding));
            }
            index.upsert(entries).await?;
            report.upserted += batch.len();
            debug!(count = batch.len(), "Upserted batch");
        }

        info!(total = report.total, reused = report.reused, embedded = report.embedded, "Index build complete");
        Ok(report)
    }
}
