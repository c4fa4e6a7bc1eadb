//! In-process vector index: brute-force squared-L2 search over entries held
//! behind a read-mostly lock. Used for offline runs and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{IndexCandidate, IndexEntry, IndexError, VectorIndex};
use crate::documents::embeddings::squared_l2;

#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let index = Self::new();
        index.insert_all(entries);
        index
    }

    fn insert_all(&self, entries: impl IntoIterator<Item = IndexEntry>) {
        let mut guard = self.entries.write();
        for entry in entries {
            match guard.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => guard.push(entry),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn query(&self, vector: &[f32], n_results: usize) -> Result<Vec<IndexCandidate>, IndexError> {
        let entries = self.entries.read();

        if let Some(first) = entries.first() {
            if first.embedding.len() != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: first.embedding.len(),
                    got: vector.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &IndexEntry)> = entries
            .iter()
            .map(|e| (squared_l2(&e.embedding, vector), e))
            .collect();
        // Stable sort: equal distances keep insertion order
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(n_results);

        debug!(n_results = n_results, returned = scored.len(), "Memory index query");
        Ok(scored
            .into_iter()
            .map(|(distance, e)| IndexCandidate {
                id: e.id.clone(),
                document: Some(e.document.clone()),
                metadata: Some(e.metadata.clone()),
                distance,
            })
            .collect())
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let existing = self.entries.read().first().map(|e| e.embedding.len());
        if let (Some(existing), Some(incoming)) = (existing, entries.first().map(|e| e.embedding.len())) {
            if existing != incoming {
                return Err(IndexError::DimensionMismatch {
                    expected: existing,
                    got: incoming,
                });
            }
        }
        self.insert_all(entries);
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;

    fn entry(id: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            embedding,
            document: format!("text of {}", id),
            metadata: ChunkMetadata {
                source_document: "doc.md".to_string(),
                department: "General".to_string(),
                accessible_roles: "Employees,C-Level".to_string(),
                token_count: 3,
            },
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let index = MemoryIndex::from_entries(vec![
            entry("far", vec![0.0, 3.0]),
            entry("near", vec![1.0, 0.0]),
            entry("mid", vec![0.0, 1.0]),
        ]);

        let hits = index.query(&[1.0, 0.0], 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 2.0);
    }

    #[tokio::test]
    async fn test_query_truncates() {
        let index = MemoryIndex::from_entries(vec![entry("a", vec![0.0]), entry("b", vec![1.0])]);
        assert_eq!(index.query(&[0.0], 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = MemoryIndex::new();
        index.upsert(vec![entry("a", vec![0.0, 0.0])]).await.unwrap();
        index.upsert(vec![entry("a", vec![1.0, 1.0]), entry("b", vec![2.0, 2.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 2);

        let hits = index.query(&[1.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let index = MemoryIndex::new();
        assert!(index.query(&[1.0, 2.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = MemoryIndex::from_entries(vec![entry("a", vec![0.0, 0.0])]);
        assert!(matches!(
            index.query(&[0.0], 1).await,
            Err(IndexError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }
}
