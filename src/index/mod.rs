//! Vector Index
//!
//! The similarity-search capability: upsert chunk vectors with their metadata,
//! and query the nearest candidates by distance (smaller = more similar).
//! Backends: Chroma over HTTP (`crate::chroma`) and an in-process index.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chroma::client::ChromaError;
use crate::documents::chunker::ChunkRecord;
use crate::documents::embeddings::Embedding;

pub use memory::MemoryIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Chroma error: {0}")]
    Chroma(#[from] ChromaError),
    #[error("Embedding has {got} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Invalid index operation: {0}")]
    Invalid(String),
}

impl Serialize for IndexError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Metadata stored next to each vector. `accessible_roles` is a
/// comma-joined role list, since index metadata values are scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_document: String,
    pub department: String,
    pub accessible_roles: String,
    pub token_count: u32,
}

impl ChunkMetadata {
    pub fn from_record(record: &ChunkRecord) -> Self {
        Self {
            source_document: record.source_document.clone(),
            department: record.department.to_string(),
            accessible_roles: record
                .accessible_roles
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(","),
            token_count: record.token_count,
        }
    }

    /// Stored roles, trimmed and lower-cased.
    pub fn role_keys(&self) -> Vec<String> {
        self.accessible_roles
            .split(',')
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// A vector to insert or replace, keyed by chunk ID.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub embedding: Embedding,
    pub document: String,
    pub metadata: ChunkMetadata,
}

impl IndexEntry {
    pub fn from_record(record: &ChunkRecord, embedding: Embedding) -> Self {
        Self {
            id: record.chunk_id.clone(),
            embedding,
            document: record.text.clone(),
            metadata: ChunkMetadata::from_record(record),
        }
    }
}

/// A nearest-neighbour result. Metadata or text may be absent when the
/// backing store holds records written by something else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexCandidate {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Option<ChunkMetadata>,
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `n_results` candidates, ascending distance.
    async fn query(&self, vector: &[f32], n_results: usize) -> Result<Vec<IndexCandidate>, IndexError>;

    /// Insert or replace entries by ID.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}
