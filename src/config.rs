//! Configuration
//!
//! Layered with `figment`: built-in defaults -> user config
//! (`<config_dir>/rolerag/config.toml`) -> project config (`rolerag.toml` or an
//! explicit path) -> environment (`ROLERAG_` prefix, `__` for nesting, e.g.
//! `ROLERAG_RETRIEVAL__TOP_K=3`).
//!
//! Role and department names are parsed into closed enums here, so a typo in
//! the mapping fails at load time instead of silently producing `Unknown`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::documents::chunker::ChunkerConfig;
use crate::rbac::{AccessError, Department, DepartmentRule, Role, RoleAccessTable, RoleMapper};

/// Project-level config file looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = "rolerag.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Access configuration error: {0}")]
    Access(#[from] AccessError),
    #[error("No roles configured for department {department} (document: {document})")]
    NoRoles { department: String, document: String },
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),
}

impl Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathsConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub departments: Vec<DepartmentConfig>,
    /// Department for documents no rule matches; unset means such documents
    /// fail the build.
    pub fallback_department: Option<String>,
    /// Role -> readable departments. Replaces the built-in table when set.
    pub access: Option<BTreeMap<String, Vec<String>>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            departments: default_departments(),
            fallback_department: None,
            access: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub chunks_file: PathBuf,
    pub embeddings_file: PathBuf,
    pub access_log: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            chunks_file: PathBuf::from("data/processed/chunks.jsonl"),
            embeddings_file: PathBuf::from("data/processed/chunks_with_embeddings.jsonl"),
            access_log: Some(PathBuf::from("access.log")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: 300,
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

impl From<ChunkingConfig> for ChunkerConfig {
    fn from(c: ChunkingConfig) -> Self {
        ChunkerConfig {
            min_tokens: c.min_tokens,
            max_tokens: c.max_tokens,
            overlap_tokens: c.overlap_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates requested from the index before RBAC filtering
    pub over_fetch: usize,
    pub top_k: usize,
    /// Hits used as generation context and for confidence
    pub context_chunks: usize,
    /// Nearest-hit distance above which the answer is "I don't know"
    pub relevance_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            over_fetch: 10,
            top_k: 5,
            context_chunks: 3,
            relevance_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Chroma,
    /// In-process index loaded from the embedding cache
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub chroma_url: String,
    pub collection: String,
    pub batch_size: usize,
    /// Concurrent embedding requests during a build
    pub concurrency: usize,
    /// Re-embed a cached chunk when its stored text no longer matches
    pub revalidate_cached_text: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Chroma,
            chroma_url: "http://127.0.0.1:8000".to_string(),
            collection: crate::chroma::collections::DEFAULT_COLLECTION.to_string(),
            batch_size: 64,
            concurrency: 4,
            revalidate_cached_text: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Local feature-hashing embeddings, no network
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 384,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 256,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// One `[[departments]]` entry. Order in the file is the match order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentConfig {
    pub name: String,
    pub folders: Vec<String>,
    pub allowed_roles: Vec<String>,
}

fn default_departments() -> Vec<DepartmentConfig> {
    let entry = |name: &str, folder: &str, roles: &[&str]| DepartmentConfig {
        name: name.to_string(),
        folders: vec![folder.to_string()],
        allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
    };
    vec![
        entry("Finance", "/finance/", &["Finance", "C-Level"]),
        entry("Marketing", "/marketing/", &["Marketing", "C-Level"]),
        entry("HR", "/hr/", &["HR", "C-Level"]),
        entry("Engineering", "/engineering/", &["Engineering", "C-Level"]),
        entry(
            "General",
            "/general/",
            &["Employees", "Finance", "HR", "Marketing", "Engineering", "C-Level"],
        ),
    ]
}

/// Load settings from the layered sources.
///
/// `explicit` replaces the project-level `rolerag.toml` lookup.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("rolerag").join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!("config file not found: {}", path.display())));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let project = Path::new(PROJECT_CONFIG_FILE);
            if project.exists() {
                figment = figment.merge(Toml::file(project));
            }
        }
    }

    figment = figment.merge(Env::prefixed("ROLERAG_").split("__"));

    let settings: Settings = figment.extract().map_err(Box::new)?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Check numeric bounds and parse every role/department name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.chunking;
        if c.min_tokens == 0 || c.min_tokens > c.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "chunking requires 0 < min_tokens <= max_tokens (got {} / {})",
                c.min_tokens, c.max_tokens
            )));
        }
        if c.overlap_tokens >= c.max_tokens {
            return Err(ConfigError::Invalid(format!(
                "overlap_tokens ({}) must be below max_tokens ({})",
                c.overlap_tokens, c.max_tokens
            )));
        }

        let r = &self.retrieval;
        if r.top_k == 0 || r.over_fetch == 0 || r.context_chunks == 0 {
            return Err(ConfigError::Invalid(
                "retrieval top_k, over_fetch and context_chunks must be at least 1".to_string(),
            ));
        }
        if !r.relevance_threshold.is_finite() || r.relevance_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "relevance_threshold must be a non-negative number (got {})",
                r.relevance_threshold
            )));
        }
        if self.index.batch_size == 0 {
            return Err(ConfigError::Invalid("index batch_size must be at least 1".to_string()));
        }

        self.role_mapper()?;
        self.access_table()?;
        Ok(())
    }

    /// Build the Role Mapper from `[[departments]]`.
    pub fn role_mapper(&self) -> Result<RoleMapper, ConfigError> {
        let mut rules = Vec::with_capacity(self.departments.len());
        for entry in &self.departments {
            let department = parse_known_department(&entry.name)?;
            if rules.iter().any(|r: &DepartmentRule| r.department == department) {
                return Err(ConfigError::Invalid(format!("department configured twice: {}", entry.name)));
            }
            let roles = entry
                .allowed_roles
                .iter()
                .map(|r| r.parse::<Role>())
                .collect::<Result<Vec<_>, _>>()?;
            let folders: Vec<&str> = entry.folders.iter().map(String::as_str).collect();
            rules.push(DepartmentRule::new(department, &folders, &roles));
        }

        let fallback = self
            .fallback_department
            .as_deref()
            .map(parse_known_department)
            .transpose()?;

        Ok(RoleMapper::new(rules, fallback))
    }

    /// Build the Role-Access Table, from `[access]` when present.
    pub fn access_table(&self) -> Result<RoleAccessTable, ConfigError> {
        let Some(access) = &self.access else {
            return Ok(RoleAccessTable::default());
        };

        let mut rules = HashMap::new();
        for (role_name, departments) in access {
            let role: Role = role_name.parse()?;
            let departments = departments
                .iter()
                .map(|d| parse_known_department(d))
                .collect::<Result<BTreeSet<_>, _>>()?;
            rules.insert(role, departments);
        }
        Ok(RoleAccessTable::new(rules))
    }
}

fn parse_known_department(name: &str) -> Result<Department, ConfigError> {
    let department: Department = name.parse()?;
    if department == Department::Unknown {
        return Err(ConfigError::Invalid(format!("'{}' is reserved and cannot be configured", name)));
    }
    Ok(department)
}

/// Read a secret from the environment variable named in the config.
pub fn env_secret(var: &str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(var.to_string()))
}
