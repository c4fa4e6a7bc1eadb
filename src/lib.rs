// RoleRAG Library
// Exports core modules for use by the CLI binary

pub mod access_log;
pub mod chroma;
pub mod config;
pub mod documents;
pub mod generation;
pub mod index;
pub mod rbac;
pub mod service;
pub mod tokens;

// Re-export commonly used types for the CLI
pub use access_log::AccessLog;
pub use config::{load_settings, ConfigError, IndexBackend, Settings};
pub use documents::{
    Answer, ChunkRecord, ChunkStore, CorpusBuild, IndexReport, RetrievalHit, ValidationReport, NO_ANSWER,
};
pub use index::VectorIndex;
pub use rbac::{AccessError, Department, Role, RoleAccessTable};
pub use service::{
    chunk_corpus, index_corpus, index_from_settings, validate_chunks, RagService, SearchService, ServiceError,
};
pub use tokens::{TokenError, Tokenizer};
