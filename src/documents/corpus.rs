//! Corpus Loading
//!
//! Finds the raw documents, reads them as text (CSV rendered as a table) and
//! runs clean -> chunk -> department/role tagging over the whole corpus.

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::chunker::{ChunkRecord, Chunker, ChunkerError};
use super::cleaner::clean;
use crate::rbac::RoleMapper;

/// Maximum file size to read (10MB)
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// File types making up the corpus
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "csv"];

/// Outcome of a corpus build
#[derive(Debug, Clone, Serialize)]
pub struct CorpusBuild {
    pub records: Vec<ChunkRecord>,
    pub documents: usize,
    /// Documents whose cleaned text was empty
    pub skipped: Vec<String>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// All `.md` and `.csv` files under `raw_dir`, recursively, sorted.
/// Hidden files and directories are skipped.
pub fn list_documents(raw_dir: &Path) -> Result<Vec<PathBuf>, ChunkerError> {
    if !raw_dir.is_dir() {
        return Err(ChunkerError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("corpus directory not found: {}", raw_dir.display()),
        )));
    }

    let mut documents = Vec::new();
    let walker = WalkDir::new(raw_dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| ChunkerError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if extension(entry.path()).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str())) {
            documents.push(entry.into_path());
        }
    }

    documents.sort();
    debug!(dir = %raw_dir.display(), count = documents.len(), "Listed documents");
    Ok(documents)
}

/// Read a document as text. CSV files are rendered as a table.
pub fn read_document(path: &Path) -> Result<String, ChunkerError> {
    let size = fs::metadata(path)?.len();
    if size > MAX_FILE_SIZE {
        return Err(ChunkerError::FileTooLarge(size, MAX_FILE_SIZE));
    }

    let raw = fs::read_to_string(path)?;
    match extension(path).as_deref() {
        Some("md") => Ok(raw),
        Some("csv") => Ok(render_csv(&raw)),
        _ => Err(ChunkerError::UnsupportedType(path.display().to_string())),
    }
}

/// Split CSV text into rows of fields. Handles quoted fields with embedded
/// commas, doubled quotes and line breaks.
fn parse_csv(raw: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                if row.iter().any(|f| !f.trim().is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            (c, _) => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        if row.iter().any(|f| !f.trim().is_empty()) {
            rows.push(row);
        }
    }
    rows
}

/// Render CSV as a whitespace-aligned table: header row, then data rows.
fn render_csv(raw: &str) -> String {
    let rows = parse_csv(raw);
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut widths = vec![0usize; columns];
    for row in &rows {
        for (i, field) in row.iter().enumerate() {
            widths[i] = widths[i].max(field.trim().chars().count());
        }
    }

    rows.iter()
        .map(|row| {
            (0..columns)
                .map(|i| {
                    let field = row.get(i).map(|f| f.trim()).unwrap_or("");
                    format!("{:>width$}", field, width = widths[i])
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chunk every document under `raw_dir`.
///
/// A document with no usable text after cleaning contributes no chunks.
/// A document whose department has no roles halts the build, as do two
/// documents sharing a file name (their chunk ids would collide).
pub fn build_corpus(raw_dir: &Path, chunker: &Chunker, mapper: &RoleMapper) -> Result<CorpusBuild, ChunkerError> {
    let documents = list_documents(raw_dir)?;
    let mut records = Vec::new();
    let mut skipped = Vec::new();
    let mut sources: HashMap<String, String> = HashMap::with_capacity(documents.len());

    for path in &documents {
        let relative = path.strip_prefix(raw_dir).unwrap_or(path);
        let relative_str = relative.to_string_lossy();
        let (department, roles) = mapper.resolve(&relative_str)?;

        let source_document = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| relative_str.to_string());
        if let Some(first) = sources.insert(source_document.clone(), relative_str.to_string()) {
            return Err(ChunkerError::DuplicateSource {
                name: source_document,
                first,
                second: relative_str.to_string(),
            });
        }

        let cleaned = clean(&read_document(path)?);
        if cleaned.is_empty() {
            warn!(document = %relative_str, "No content after cleaning; skipping");
            skipped.push(source_document);
            continue;
        }

        let chunks = chunker.chunk_records(&source_document, &cleaned, department, &roles)?;
        info!(document = %relative_str, department = %department, chunks = chunks.len(), "Chunked document");
        records.extend(chunks);
    }

    info!(documents = documents.len(), chunks = records.len(), "Corpus build complete");
    Ok(CorpusBuild {
        records,
        documents: documents.len(),
        skipped,
    })
}
