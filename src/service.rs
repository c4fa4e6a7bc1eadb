//! RAG Service
//!
//! The explicitly constructed service object: capabilities (embedder, vector
//! index, generator) are built once from `Settings` and injected, the role is
//! authorized before any retrieval, and answered queries are written to the
//! access log. Also hosts the build-time pipeline steps used by the CLI.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::access_log::AccessLog;
use crate::chroma::{ChromaClient, ChromaIndex};
use crate::config::{env_secret, ConfigError, EmbeddingConfig, EmbeddingProvider, GenerationConfig, IndexBackend, Settings};
use crate::documents::{
    build_corpus, validate_corpus, Answer, AnswerAssembler, BuildError, ChunkStore, Chunker, CorpusBuild, Embedder,
    EmbeddingCache, EmbeddingError, HashingEmbedder, IndexBuilder, IndexReport, OpenAiEmbedder, RbacRetriever,
    RetrievalHit, RetrieverError, StoreError, ValidationReport,
};
use crate::generation::{GenerationError, Generator, OpenAiGenerator};
use crate::index::{IndexEntry, IndexError, MemoryIndex, VectorIndex};
use crate::rbac::{AccessError, RoleAccessTable};
use crate::tokens::Tokenizer;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Access denied: {0}")]
    Access(#[from] AccessError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrieverError),
    #[error("Embedding setup failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Generator setup failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl serde::Serialize for ServiceError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// ============ CAPABILITY FACTORIES ============

pub fn embedder_from_settings(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, ServiceError> {
    match config.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        EmbeddingProvider::Openai => {
            let key = env_secret(&config.api_key_env)?;
            let embedder = OpenAiEmbedder::new(
                &key,
                &config.base_url,
                &config.model,
                Some(config.dimensions),
                Duration::from_secs(config.timeout_secs),
                config.max_retries,
            )?;
            Ok(Arc::new(embedder))
        }
    }
}

pub fn generator_from_settings(config: &GenerationConfig) -> Result<Arc<dyn Generator>, ServiceError> {
    let key = env_secret(&config.api_key_env)?;
    let generator = OpenAiGenerator::new(
        &key,
        &config.base_url,
        &config.model,
        config.temperature,
        config.max_tokens,
        Duration::from_secs(config.timeout_secs),
    )?;
    Ok(Arc::new(generator))
}

/// In-process index holding the embeddings of the current chunk file.
/// Cache entries for chunks no longer in the corpus are left out.
pub fn load_memory_index(settings: &Settings) -> Result<MemoryIndex, ServiceError> {
    let records = ChunkStore::new(&settings.paths.chunks_file).read()?;
    let cache = EmbeddingCache::load(&settings.paths.embeddings_file)?;

    let current: HashSet<&str> = records.iter().map(|r| r.chunk_id.as_str()).collect();
    let entries: Vec<IndexEntry> = cache
        .entries()
        .filter(|e| current.contains(e.record.chunk_id.as_str()))
        .map(|e| IndexEntry::from_record(&e.record, e.embedding.clone()))
        .collect();

    if entries.len() < records.len() {
        warn!(
            chunks = records.len(),
            embedded = entries.len(),
            "Some chunks have no cached embedding; run `rolerag index`"
        );
    }
    info!(count = entries.len(), "Loaded memory index");
    Ok(MemoryIndex::from_entries(entries))
}

/// The configured index for querying. The memory backend is filled from the
/// embedding cache.
pub fn index_from_settings(settings: &Settings) -> Result<Arc<dyn VectorIndex>, ServiceError> {
    match settings.index.backend {
        IndexBackend::Chroma => {
            let client = ChromaClient::new(&settings.index.chroma_url);
            Ok(Arc::new(ChromaIndex::new(client, &settings.index.collection)))
        }
        IndexBackend::Memory => Ok(Arc::new(load_memory_index(settings)?)),
    }
}

pub fn retriever_from_settings(settings: &Settings) -> Result<RbacRetriever, ServiceError> {
    Ok(RbacRetriever::new(
        embedder_from_settings(&settings.embedding)?,
        index_from_settings(settings)?,
        settings.retrieval.over_fetch,
    ))
}

// ============ SERVICE ============

/// Search-only surface: RBAC-filtered retrieval without a generator, so it
/// needs no generation credentials.
pub struct SearchService {
    retriever: RbacRetriever,
    access: RoleAccessTable,
}

impl SearchService {
    pub fn new(retriever: RbacRetriever, access: RoleAccessTable) -> Self {
        Self { retriever, access }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ServiceError> {
        Ok(Self::new(retriever_from_settings(settings)?, settings.access_table()?))
    }

    /// RBAC-filtered hits for an authorized role.
    pub async fn search(&self, role_name: &str, query: &str, k: usize) -> Result<Vec<RetrievalHit>, ServiceError> {
        let role = self.access.authorize(role_name)?;
        Ok(self.retriever.search(query, role, k).await?)
    }
}

pub struct RagService {
    assembler: AnswerAssembler,
    access: RoleAccessTable,
    access_log: Option<AccessLog>,
}

impl RagService {
    pub fn new(assembler: AnswerAssembler, access: RoleAccessTable) -> Self {
        Self {
            assembler,
            access,
            access_log: None,
        }
    }

    pub fn with_access_log(mut self, log: AccessLog) -> Self {
        self.access_log = Some(log);
        self
    }

    /// Build every capability from settings. This is the only initialization
    /// step; nothing is created lazily behind the caller's back.
    pub fn from_settings(settings: &Settings) -> Result<Self, ServiceError> {
        let retriever = retriever_from_settings(settings)?;
        let generator = generator_from_settings(&settings.generation)?;
        let assembler = AnswerAssembler::new(retriever, generator, settings.retrieval);

        let mut service = Self::new(assembler, settings.access_table()?);
        if let Some(path) = &settings.paths.access_log {
            service = service.with_access_log(AccessLog::new(path));
        }
        Ok(service)
    }

    pub fn access_table(&self) -> &RoleAccessTable {
        &self.access
    }

    /// RBAC-filtered hits for an authorized role.
    pub async fn search(&self, role_name: &str, query: &str, k: usize) -> Result<Vec<RetrievalHit>, ServiceError> {
        let role = self.access.authorize(role_name)?;
        Ok(self.assembler.retriever().search(query, role, k).await?)
    }

    /// Answer for an authorized role, without logging.
    pub async fn answer(&self, role_name: &str, query: &str) -> Result<Answer, ServiceError> {
        let role = self.access.authorize(role_name)?;
        Ok(self.assembler.answer(query, role).await?)
    }

    /// Authorize, answer and record the query in the access log. A failed
    /// log write is reported but never fails the request.
    pub async fn ask(&self, username: &str, role_name: &str, query: &str) -> Result<Answer, ServiceError> {
        let role = self.access.authorize(role_name).inspect_err(|e| {
            warn!(user = %username, role = %role_name, error = %e, "Rejected query");
        })?;
        let answer = self.assembler.answer(query, role).await?;

        if let Some(log) = &self.access_log {
            if let Err(e) = log.record(username, role.key(), query, answer.confidence) {
                warn!(path = %log.path().display(), error = %e, "Failed to write access log");
            }
        }
        Ok(answer)
    }
}

// ============ BUILD PIPELINE ============

/// Chunk the raw corpus and write the chunk file.
pub fn chunk_corpus(settings: &Settings, tokenizer: Arc<Tokenizer>) -> Result<CorpusBuild, BuildError> {
    let chunker = Chunker::new(tokenizer, settings.chunking.into());
    let build = build_corpus(&settings.paths.raw_dir, &chunker, &settings.role_mapper()?)?;
    ChunkStore::new(&settings.paths.chunks_file).write(&build.records)?;
    Ok(build)
}

/// Run the integrity pass over the chunk file.
pub fn validate_chunks(settings: &Settings, tokenizer: &Tokenizer) -> Result<ValidationReport, BuildError> {
    let records = ChunkStore::new(&settings.paths.chunks_file).read()?;
    Ok(validate_corpus(
        &records,
        tokenizer,
        settings.chunking.into(),
        &settings.access_table()?,
    )?)
}

/// Validate, then embed (cache-aware) and upsert the chunk file into the
/// configured index. A validation failure halts before anything is indexed.
/// The memory backend only needs the embedding cache, so nothing is upserted.
pub async fn index_corpus(settings: &Settings, tokenizer: &Tokenizer) -> Result<IndexReport, BuildError> {
    let records = ChunkStore::new(&settings.paths.chunks_file).read()?;
    validate_corpus(&records, tokenizer, settings.chunking.into(), &settings.access_table()?)?;

    let embedder = embedder_from_settings(&settings.embedding).map_err(build_setup_error)?;
    let mut cache = EmbeddingCache::load(&settings.paths.embeddings_file)?;

    let builder = match settings.index.backend {
        IndexBackend::Chroma => {
            let index = index_from_settings(settings).map_err(build_setup_error)?;
            IndexBuilder::new(embedder, index)
        }
        IndexBackend::Memory => IndexBuilder::cache_only(embedder),
    };

    builder
        .batch_size(settings.index.batch_size)
        .concurrency(settings.index.concurrency)
        .revalidate_cached_text(settings.index.revalidate_cached_text)
        .build(&records, &mut cache)
        .await
}

fn build_setup_error(e: ServiceError) -> BuildError {
    match e {
        ServiceError::Config(e) => BuildError::Config(e),
        ServiceError::Embedding(e) => BuildError::Embedding(e),
        ServiceError::Index(e) => BuildError::Index(e),
        ServiceError::Store(e) => BuildError::Store(e),
        other => BuildError::Config(ConfigError::Invalid(other.to_string())),
    }
}
