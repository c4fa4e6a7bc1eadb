//! Chroma Collection Schemas
//!
//! The chunk collection layout (metadata fields per record) and the
//! `VectorIndex` implementation backed by a Chroma collection.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::client::{ChromaClient, ChromaError, ChromaQueryResult};
use crate::index::{ChunkMetadata, IndexCandidate, IndexEntry, IndexError, VectorIndex};

/// Default collection name for chunk vectors
pub const DEFAULT_COLLECTION: &str = "chroma_db";

/// Fields requested on every query
const QUERY_INCLUDE: &[&str] = &["documents", "metadatas", "distances"];

/// Build metadata for a chunk record
pub fn chunk_metadata(meta: &ChunkMetadata) -> Value {
    json!({
        "source_document": meta.source_document,
        "department": meta.department,
        "accessible_roles": meta.accessible_roles,
        "token_count": meta.token_count as i64,
    })
}

/// Parse stored metadata; `None` when required fields are missing.
pub fn parse_chunk_metadata(value: &Value) -> Option<ChunkMetadata> {
    Some(ChunkMetadata {
        source_document: value.get("source_document")?.as_str()?.to_string(),
        department: value.get("department")?.as_str()?.to_string(),
        accessible_roles: value.get("accessible_roles")?.as_str()?.to_string(),
        token_count: value
            .get("token_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    })
}

/// Flatten the first query's results into candidates, closest first.
fn candidates_from_result(result: ChromaQueryResult) -> Result<Vec<IndexCandidate>, ChromaError> {
    let ids = result.ids.into_iter().next().unwrap_or_default();
    let distances = result
        .distances
        .and_then(|d| d.into_iter().next())
        .ok_or_else(|| ChromaError::Deserialize("query result has no distances".to_string()))?;
    if distances.len() != ids.len() {
        return Err(ChromaError::Deserialize(format!(
            "{} ids but {} distances",
            ids.len(),
            distances.len()
        )));
    }

    let mut documents = result
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default()
        .into_iter();
    let mut metadatas = result
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default()
        .into_iter();

    Ok(ids
        .into_iter()
        .zip(distances)
        .map(|(id, distance)| IndexCandidate {
            id,
            document: documents.next().flatten(),
            metadata: metadatas.next().flatten().as_ref().and_then(parse_chunk_metadata),
            distance,
        })
        .collect())
}

/// A Chroma collection used as the chunk vector index.
pub struct ChromaIndex {
    client: ChromaClient,
    name: String,
    collection_id: OnceCell<String>,
}

impl ChromaIndex {
    pub fn new(client: ChromaClient, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
            collection_id: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve (and remember) the collection ID. Read paths never create.
    async fn resolve(&self, create: bool) -> Result<&str, ChromaError> {
        if let Some(id) = self.collection_id.get() {
            return Ok(id.as_str());
        }

        let info = if create {
            self.client.get_or_create_collection(&self.name, None).await?
        } else {
            self.client.get_collection(&self.name).await?
        };
        debug!(name = %self.name, id = %info.id, "Resolved collection");

        let id = self.collection_id.get_or_init(|| async { info.id }).await;
        Ok(id.as_str())
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn query(&self, vector: &[f32], n_results: usize) -> Result<Vec<IndexCandidate>, IndexError> {
        let id = match self.resolve(false).await {
            Ok(id) => id,
            Err(ChromaError::CollectionNotFound(name)) => {
                warn!(name = %name, "Collection missing; treating index as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let result = self
            .client
            .query(id, vector, n_results as u32, QUERY_INCLUDE)
            .await?;
        Ok(candidates_from_result(result)?)
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let id = self.resolve(true).await?;

        let mut ids = Vec::with_capacity(entries.len());
        let mut documents = Vec::with_capacity(entries.len());
        let mut embeddings = Vec::with_capacity(entries.len());
        let mut metadatas = Vec::with_capacity(entries.len());
        for entry in entries {
            metadatas.push(chunk_metadata(&entry.metadata));
            ids.push(entry.id);
            documents.push(entry.document);
            embeddings.push(entry.embedding);
        }

        self.client.upsert(id, ids, documents, embeddings, metadatas).await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        match self.resolve(false).await {
            Ok(id) => {
                let count = self.client.count(id).await?;
                info!(name = %self.name, count = count, "Collection count");
                Ok(count as usize)
            }
            Err(ChromaError::CollectionNotFound(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
