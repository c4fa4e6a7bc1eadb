//! RoleRAG CLI
//!
//! Command-line interface for building the chunk corpus and index, and for
//! role-scoped search and question answering. Output is JSON on stdout; logs
//! go to stderr.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rolerag_lib::{
    chunk_corpus, index_corpus, index_from_settings, load_settings, validate_chunks, Department, RagService,
    RetrievalHit, SearchService, Settings, Tokenizer, VectorIndex,
};

/// Default user recorded in the access log when `--user` is omitted
const DEFAULT_USER: &str = "cli";

#[derive(Parser)]
#[command(name = "rolerag")]
#[command(about = "RoleRAG CLI - Role-aware retrieval over a private corpus", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./rolerag.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk the raw corpus into the chunk file
    Chunk,
    /// Run the integrity pass over the chunk file
    Validate,
    /// Embed and upsert the chunk file into the index
    Index,
    /// Number of records in the index
    Count,
    /// RBAC-filtered search
    Search {
        /// Requesting role
        #[arg(short, long)]
        role: String,
        /// Search query
        query: String,
        /// Maximum hits to return (default: retrieval.top_k)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Answer a question for a role
    Ask {
        /// Requesting role
        #[arg(short, long)]
        role: String,
        /// Username recorded in the access log
        #[arg(short, long, default_value = DEFAULT_USER)]
        user: String,
        /// Question
        query: String,
    },
    /// Token counting commands
    Tokens {
        #[command(subcommand)]
        action: TokensAction,
    },
    /// List roles and the departments each can read
    Roles,
}

#[derive(Subcommand)]
enum TokensAction {
    /// Count tokens in text
    Count {
        /// Text to count (or - to read from stdin)
        text: String,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct ChunkOutput {
    documents: usize,
    chunks: usize,
    skipped: Vec<String>,
    output: PathBuf,
}

#[derive(Serialize)]
struct CountOutput {
    count: usize,
}

#[derive(Serialize)]
struct SearchOutput {
    role: String,
    hits: Vec<RetrievalHit>,
}

#[derive(Serialize)]
struct TokenCountOutput {
    tokens: u32,
}

#[derive(Serialize)]
struct RoleOutput {
    role: String,
    departments: Vec<Department>,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("ROLERAG_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(json) => println!("{}", json),
        Err(e) => {
            println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    match cli.command {
        // Token counting needs no settings
        Commands::Tokens { action } => handle_tokens(action),
        command => {
            let settings = load_settings(cli.config.as_deref())?;
            run_with_settings(command, &settings).await
        }
    }
}

async fn run_with_settings(command: Commands, settings: &Settings) -> anyhow::Result<String> {
    match command {
        Commands::Chunk => handle_chunk(settings),
        Commands::Validate => {
            let tokenizer = Tokenizer::cl100k()?;
            Ok(serde_json::to_string(&validate_chunks(settings, &tokenizer)?)?)
        }
        Commands::Index => {
            let tokenizer = Tokenizer::cl100k()?;
            Ok(serde_json::to_string(&index_corpus(settings, &tokenizer).await?)?)
        }
        Commands::Count => {
            let count = index_from_settings(settings)?.count().await?;
            Ok(serde_json::to_string(&CountOutput { count })?)
        }
        Commands::Search { role, query, k } => {
            let service = SearchService::from_settings(settings)?;
            let hits = service
                .search(&role, &query, k.unwrap_or(settings.retrieval.top_k))
                .await?;
            Ok(serde_json::to_string(&SearchOutput { role, hits })?)
        }
        Commands::Ask { role, user, query } => {
            let service = RagService::from_settings(settings)?;
            let answer = service.ask(&user, &role, &query).await?;
            Ok(serde_json::to_string(&answer)?)
        }
        Commands::Roles => handle_roles(settings),
        Commands::Tokens { action } => handle_tokens(action),
    }
}

// ============ Handlers ============

fn handle_chunk(settings: &Settings) -> anyhow::Result<String> {
    let tokenizer = Arc::new(Tokenizer::cl100k()?);
    let build = chunk_corpus(settings, tokenizer)?;

    let output = ChunkOutput {
        documents: build.documents,
        chunks: build.records.len(),
        skipped: build.skipped,
        output: settings.paths.chunks_file.clone(),
    };
    Ok(serde_json::to_string(&output)?)
}

fn handle_roles(settings: &Settings) -> anyhow::Result<String> {
    let table = settings.access_table()?;
    let roles: Vec<RoleOutput> = table
        .roles()
        .into_iter()
        .map(|role| RoleOutput {
            role: role.to_string(),
            departments: table.departments(role).into_iter().collect(),
        })
        .collect();
    Ok(serde_json::to_string(&roles)?)
}

fn handle_tokens(action: TokensAction) -> anyhow::Result<String> {
    match action {
        TokensAction::Count { text } => {
            let input = if text == "-" {
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                buffer
            } else {
                text
            };

            let tokens = Tokenizer::cl100k()?.count(&input);
            Ok(serde_json::to_string(&TokenCountOutput { tokens })?)
        }
    }
}
