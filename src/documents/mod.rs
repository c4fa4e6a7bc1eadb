//! Document Pipeline
//!
//! Build time: corpus -> cleaner -> chunker -> store -> validation -> indexer.
//! Query time: retriever -> assembler.

pub mod assembler;
pub mod chunker;
pub mod cleaner;
pub mod corpus;
pub mod embeddings;
pub mod indexer;
pub mod retriever;
pub mod store;
pub mod validation;

// Re-export key public types
pub use assembler::{build_prompt, compute_confidence, Answer, AnswerAssembler, NO_ANSWER};
pub use chunker::{chunk_id, ChunkRecord, Chunker, ChunkerConfig, ChunkerError};
pub use cleaner::clean;
pub use corpus::{build_corpus, list_documents, read_document, CorpusBuild};
pub use embeddings::{Embedder, Embedding, EmbeddingError, HashingEmbedder, OpenAiEmbedder};
pub use indexer::{BuildError, IndexBuilder, IndexReport};
pub use retriever::{is_admitted, RbacRetriever, RetrievalHit, RetrieverError};
pub use store::{CachedEmbedding, ChunkStore, EmbeddingCache, StoreError};
pub use validation::{validate_corpus, ValidationError, ValidationReport};
