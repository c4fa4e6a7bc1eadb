//! Corpus Validation
//!
//! Integrity pass over built chunk records. Runs before indexing; the first
//! violation stops the pass and names the offending chunk.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{info, warn};

use super::chunker::{ChunkRecord, ChunkerConfig};
use crate::rbac::RoleAccessTable;
use crate::tokens::Tokenizer;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No chunks to validate")]
    NoChunks,
    #[error("Chunk {chunk}: field '{field}' is empty")]
    EmptyField { chunk: String, field: &'static str },
    #[error("Duplicate chunk_id: {0}")]
    DuplicateId(String),
    #[error("Chunk {chunk_id}: token_count {count} outside 1..={max}")]
    TokenCountOutOfRange { chunk_id: String, count: u32, max: usize },
    #[error("Chunk {chunk_id}: stored token_count {stored} but text has {actual} tokens")]
    TokenCountMismatch { chunk_id: String, stored: u32, actual: u32 },
    #[error("Chunk {chunk_id}: role {role} may not read department {department}")]
    RoleNotPermitted { chunk_id: String, role: String, department: String },
    #[error("Chunk {chunk_id}: role {role} can read department {department} but is not listed")]
    RoleNotListed { chunk_id: String, role: String, department: String },
}

impl Serialize for ValidationError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Summary of a passing corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub chunks: usize,
    pub documents: usize,
    /// Chunks below `min_tokens` (allowed, reported)
    pub short_chunks: usize,
    pub by_department: BTreeMap<String, usize>,
}

/// Label for a chunk in diagnostics: its ID, or its position when the ID is empty.
fn label(index: usize, record: &ChunkRecord) -> String {
    if record.chunk_id.trim().is_empty() {
        format!("#{}", index + 1)
    } else {
        record.chunk_id.clone()
    }
}

fn check_record(
    index: usize,
    record: &ChunkRecord,
    tokenizer: &Tokenizer,
    bounds: ChunkerConfig,
    table: &RoleAccessTable,
) -> Result<(), ValidationError> {
    let chunk = label(index, record);
    let empty = |field: &'static str| ValidationError::EmptyField {
        chunk: chunk.clone(),
        field,
    };

    if record.chunk_id.trim().is_empty() {
        return Err(empty("chunk_id"));
    }
    if record.text.trim().is_empty() {
        return Err(empty("text"));
    }
    if record.source_document.trim().is_empty() {
        return Err(empty("source_document"));
    }
    if record.accessible_roles.is_empty() {
        return Err(empty("accessible_roles"));
    }

    if record.token_count == 0 || record.token_count as usize > bounds.max_tokens {
        return Err(ValidationError::TokenCountOutOfRange {
            chunk_id: chunk,
            count: record.token_count,
            max: bounds.max_tokens,
        });
    }
    let actual = tokenizer.count(&record.text);
    if actual != record.token_count {
        return Err(ValidationError::TokenCountMismatch {
            chunk_id: chunk,
            stored: record.token_count,
            actual,
        });
    }

    for role in &record.accessible_roles {
        if !table.can_read(*role, record.department) {
            return Err(ValidationError::RoleNotPermitted {
                chunk_id: chunk,
                role: role.to_string(),
                department: record.department.to_string(),
            });
        }
    }
    for role in table.roles() {
        if role.is_super() || record.accessible_roles.contains(&role) {
            continue;
        }
        if table.can_read(role, record.department) {
            return Err(ValidationError::RoleNotListed {
                chunk_id: chunk,
                role: role.to_string(),
                department: record.department.to_string(),
            });
        }
    }

    Ok(())
}

/// Check every record; stop at the first violation.
pub fn validate_corpus(
    records: &[ChunkRecord],
    tokenizer: &Tokenizer,
    bounds: ChunkerConfig,
    table: &RoleAccessTable,
) -> Result<ValidationReport, ValidationError> {
    if records.is_empty() {
        return Err(ValidationError::NoChunks);
    }

    let mut seen = HashSet::with_capacity(records.len());
    let mut documents = HashSet::new();
    let mut report = ValidationReport {
        chunks: records.len(),
        ..ValidationReport::default()
    };

    for (index, record) in records.iter().enumerate() {
        check_record(index, record, tokenizer, bounds, table)?;

        if !seen.insert(record.chunk_id.as_str()) {
            return Err(ValidationError::DuplicateId(record.chunk_id.clone()));
        }
        documents.insert(record.source_document.as_str());

        if (record.token_count as usize) < bounds.min_tokens {
            report.short_chunks += 1;
        }
        *report
            .by_department
            .entry(record.department.to_string())
            .or_insert(0) += 1;
    }

    report.documents = documents.len();
    if report.short_chunks > 0 {
        warn!(
            short = report.short_chunks,
            min_tokens = bounds.min_tokens,
            "Chunks below min_tokens"
        );
    }
    info!(chunks = report.chunks, documents = report.documents, "Corpus valid");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{Department, Role};

    fn tokenizer() -> Tokenizer {
        Tokenizer::cl100k().unwrap()
    }

    fn bounds() -> ChunkerConfig {
        ChunkerConfig {
            min_tokens: 5,
            max_tokens: 50,
            overlap_tokens: 5,
        }
    }

    fn record(tok: &Tokenizer, id: &str, text: &str, department: Department, roles: &[Role]) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            text: text.to_string(),
            source_document: format!("{}.md", department),
            department,
            accessible_roles: roles.to_vec(),
            token_count: tok.count(text),
        }
    }

    fn valid_corpus(tok: &Tokenizer) -> Vec<ChunkRecord> {
        vec![
            record(
                tok,
                "fin.md_001",
                "Quarterly revenue grew by twelve percent year over year.",
                Department::Finance,
                &[Role::Finance, Role::CLevel],
            ),
            record(tok, "gen.md_001", "Hi.", Department::General, &Role::ALL),
        ]
    }

    #[test]
    fn test_valid_corpus() {
        let tok = tokenizer();
        let report = validate_corpus(&valid_corpus(&tok), &tok, bounds(), &RoleAccessTable::default()).unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(report.documents, 2);
        assert_eq!(report.short_chunks, 1);
        assert_eq!(report.by_department.get("Finance"), Some(&1));
    }

    #[test]
    fn test_empty_corpus() {
        let tok = tokenizer();
        assert_eq!(
            validate_corpus(&[], &tok, bounds(), &RoleAccessTable::default()),
            Err(ValidationError::NoChunks)
        );
    }

    #[test]
    fn test_empty_text_names_chunk() {
        let tok = tokenizer();
        let mut corpus = valid_corpus(&tok);
        corpus[1].text = "  ".to_string();
        let err = validate_corpus(&corpus, &tok, bounds(), &RoleAccessTable::default()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::EmptyField {
                chunk: "gen.md_001".to_string(),
                field: "text"
            }
        );
    }

    #[test]
    fn test_token_count_mismatch() {
        let tok = tokenizer();
        let mut corpus = valid_corpus(&tok);
        corpus[0].token_count += 1;
        assert!(matches!(
            validate_corpus(&corpus, &tok, bounds(), &RoleAccessTable::default()),
            Err(ValidationError::TokenCountMismatch { .. })
        ));
    }

    #[test]
    fn test_token_count_over_max() {
        let tok = tokenizer();
        let mut corpus = valid_corpus(&tok);
        corpus[0].token_count = 51;
        assert!(matches!(
            validate_corpus(&corpus, &tok, bounds(), &RoleAccessTable::default()),
            Err(ValidationError::TokenCountOutOfRange { .. })
        ));
    }

    #[test]
    fn test_duplicate_id() {
        let tok = tokenizer();
        let mut corpus = valid_corpus(&tok);
        corpus[1].chunk_id = "fin.md_001".to_string();
        corpus[1].department = Department::Finance;
        corpus[1].accessible_roles = vec![Role::Finance, Role::CLevel];
        assert_eq!(
            validate_corpus(&corpus, &tok, bounds(), &RoleAccessTable::default()),
            Err(ValidationError::DuplicateId("fin.md_001".to_string()))
        );
    }

    #[test]
    fn test_employees_on_finance_rejected() {
        let tok = tokenizer();
        let mut corpus = valid_corpus(&tok);
        corpus[0].accessible_roles.push(Role::Employees);
        assert!(matches!(
            validate_corpus(&corpus, &tok, bounds(), &RoleAccessTable::default()),
            Err(ValidationError::RoleNotPermitted { .. })
        ));
    }

    #[test]
    fn test_employees_missing_from_general_rejected() {
        let tok = tokenizer();
        let mut corpus = valid_corpus(&tok);
        corpus[1].accessible_roles.retain(|r| *r != Role::Employees);
        assert!(matches!(
            validate_corpus(&corpus, &tok, bounds(), &RoleAccessTable::default()),
            Err(ValidationError::RoleNotListed { .. })
        ));
    }
}
