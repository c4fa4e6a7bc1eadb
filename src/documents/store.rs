//! Chunk and Embedding Persistence
//!
//! Newline-delimited JSON files: one Chunk Record per line in the chunk file,
//! and Chunk Record fields plus `embedding` per line in the embedding cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::chunker::ChunkRecord;
use super::embeddings::Embedding;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}:{line}: malformed record{}: {message}", label(.chunk_id))]
    Parse {
        path: String,
        line: usize,
        chunk_id: Option<String>,
        message: String,
    },
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn label(chunk_id: &Option<String>) -> String {
    chunk_id.as_ref().map(|id| format!(" ({})", id)).unwrap_or_default()
}

impl Serialize for StoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Parse a JSONL file line by line. Blank lines are skipped; a bad line
/// reports its line number and, when recoverable, its `chunk_id`.
fn read_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parse_error = |chunk_id: Option<String>, message: String| StoreError::Parse {
            path: path.display().to_string(),
            line: i + 1,
            chunk_id,
            message,
        };

        let value: Value =
            serde_json::from_str(&line).map_err(|e| parse_error(None, e.to_string()))?;
        let chunk_id = value
            .get("chunk_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let record = serde_json::from_value(value).map_err(|e| parse_error(chunk_id, e.to_string()))?;
        records.push(record);
    }

    Ok(records)
}

fn write_jsonl<'a, T: Serialize + 'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a T>,
) -> Result<usize, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// The chunk file produced by a corpus build.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    path: PathBuf,
}

impl ChunkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        let records: Vec<ChunkRecord> = read_jsonl(&self.path)?;
        debug!(path = %self.path.display(), count = records.len(), "Read chunk records");
        Ok(records)
    }

    /// Replace the file with `records`, in order.
    pub fn write(&self, records: &[ChunkRecord]) -> Result<(), StoreError> {
        let count = write_jsonl(&self.path, records)?;
        info!(path = %self.path.display(), count = count, "Wrote chunk records");
        Ok(())
    }
}

/// One embedding-cache line: the chunk it was computed from plus the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEmbedding {
    #[serde(flatten)]
    pub record: ChunkRecord,
    pub embedding: Embedding,
}

/// Embeddings keyed by `chunk_id`, persisted across builds.
///
/// Saving merges: entries for chunks no longer in the corpus are kept.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    path: PathBuf,
    entries: BTreeMap<String, CachedEmbedding>,
}

impl EmbeddingCache {
    /// Load the cache at `path`; a missing file is an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut entries = BTreeMap::new();

        if path.exists() {
            for entry in read_jsonl::<CachedEmbedding>(&path)? {
                entries.insert(entry.record.chunk_id.clone(), entry);
            }
        }

        debug!(path = %path.display(), count = entries.len(), "Loaded embedding cache");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, chunk_id: &str) -> Option<&CachedEmbedding> {
        self.entries.get(chunk_id)
    }

    /// Insert or overwrite the entry for `record.chunk_id`.
    pub fn insert(&mut self, record: ChunkRecord, embedding: Embedding) {
        self.entries.insert(
            record.chunk_id.clone(),
            CachedEmbedding { record, embedding },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CachedEmbedding> {
        self.entries.values()
    }

    /// Rewrite the cache file with every entry (sorted by `chunk_id`).
    pub fn save(&self) -> Result<(), StoreError> {
        let count = write_jsonl(&self.path, self.entries.values())?;
        info!(path = %self.path.display(), count = count, "Saved embedding cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{Department, Role};
    use tempfile::TempDir;

    fn record(id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            text: text.to_string(),
            source_document: "handbook.md".to_string(),
            department: Department::General,
            accessible_roles: vec![Role::Employees, Role::CLevel],
            token_count: 3,
        }
    }

    #[test]
    fn test_chunk_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path().join("processed").join("chunks.jsonl"));
        let records = vec![
            record("handbook.md_001", "Leave policy \"quoted\" text."),
            record("handbook.md_002", "Second chunk, with unicode caf\u{e9}."),
        ];

        store.write(&records).unwrap();
        let read = store.read().unwrap();

        assert_eq!(read.len(), records.len());
        for (a, b) in read.iter().zip(records.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
            assert_eq!(a.text, b.text);
            assert_eq!(a.token_count, b.token_count);
        }
        assert_eq!(read, records);
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(record("a_001", "x")).unwrap();
        assert_eq!(json["department"], "General");
        assert_eq!(json["accessible_roles"], serde_json::json!(["Employees", "C-Level"]));
        assert_eq!(json["token_count"], 3);
    }

    #[test]
    fn test_malformed_line_reports_chunk_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.jsonl");
        fs::write(
            &path,
            "{\"chunk_id\":\"bad_001\",\"text\":\"t\",\"source_document\":\"s\",\"department\":\"Finance\",\"accessible_roles\":[\"Janitor\"],\"token_count\":1}\n",
        )
        .unwrap();

        let err = ChunkStore::new(&path).read().unwrap_err();
        match err {
            StoreError::Parse { line, chunk_id, .. } => {
                assert_eq!(line, 1);
                assert_eq!(chunk_id.as_deref(), Some("bad_001"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::load(dir.path().join("none.jsonl")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_merge_keeps_orphans() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emb.jsonl");

        let mut cache = EmbeddingCache::load(&path).unwrap();
        cache.insert(record("old_001", "old"), vec![0.1, 0.2]);
        cache.save().unwrap();

        let mut cache = EmbeddingCache::load(&path).unwrap();
        cache.insert(record("new_001", "new"), vec![0.3, 0.4]);
        cache.save().unwrap();

        let cache = EmbeddingCache::load(&path).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("old_001").unwrap().embedding, vec![0.1, 0.2]);
        assert_eq!(cache.get("new_001").unwrap().record.text, "new");
    }

    #[test]
    fn test_cache_line_is_flat() {
        let line = serde_json::to_value(CachedEmbedding {
            record: record("a_001", "x"),
            embedding: vec![1.0],
        })
        .unwrap();
        assert_eq!(line["chunk_id"], "a_001");
        assert_eq!(line["embedding"], serde_json::json!([1.0]));
    }
}
