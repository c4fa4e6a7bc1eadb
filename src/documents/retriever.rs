//! RBAC-Filtered Retrieval
//!
//! Embeds the query, over-fetches nearest candidates from the vector index,
//! drops every candidate the requesting role may not see, and returns the
//! survivors in index (distance) order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::embeddings::{Embedder, EmbeddingError};
use crate::index::{ChunkMetadata, IndexError, VectorIndex};
use crate::rbac::Role;

/// Candidates requested from the index before filtering
pub const DEFAULT_OVER_FETCH: usize = 10;

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

impl Serialize for RetrieverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A chunk the role may see, with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub text: String,
    pub source_document: String,
    pub department: String,
    pub distance: f32,
}

/// Whether `role` may see a chunk with this metadata. The super-role sees
/// everything; any other role must be listed (case-insensitively).
pub fn is_admitted(role: Role, metadata: &ChunkMetadata) -> bool {
    role.is_super() || metadata.role_keys().iter().any(|r| r == role.key())
}

pub struct RbacRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    over_fetch: usize,
}

impl RbacRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, over_fetch: usize) -> Self {
        Self {
            embedder,
            index,
            over_fetch: over_fetch.max(1),
        }
    }

    pub fn over_fetch(&self) -> usize {
        self.over_fetch
    }

    /// Up to `k` admitted hits, closest first. The index is always asked for
    /// `over_fetch` candidates regardless of `k`.
    pub async fn search(&self, query: &str, role: Role, k: usize) -> Result<Vec<RetrievalHit>, RetrieverError> {
        let vector = self.embedder.embed(query).await?;
        let candidates = self.index.query(&vector, self.over_fetch).await?;
        let fetched = candidates.len();

        let mut hits = Vec::new();
        for candidate in candidates {
            let (Some(metadata), Some(text)) = (candidate.metadata, candidate.document) else {
                warn!(chunk_id = %candidate.id, "Skipping candidate without metadata or text");
                continue;
            };
            if !is_admitted(role, &metadata) {
                continue;
            }
            hits.push(RetrievalHit {
                chunk_id: candidate.id,
                text,
                source_document: metadata.source_document,
                department: metadata.department,
                distance: candidate.distance,
            });
        }

        debug!(role = %role, fetched = fetched, admitted = hits.len(), k = k, "RBAC-filtered search");
        hits.truncate(k);
        Ok(hits)
    }
}
