//! Core data models used throughout the knowledge base.
//!
//! These types represent the chunks, catalog records, conversation turns and
//! operation outcomes that flow through ingestion, deletion and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A span of document text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Original filename of the document the chunk came from.
    pub source_file: String,
    /// Position of the chunk within its document, contiguous from 0.
    pub ordinal: usize,
}

/// Catalog entry recording that a file is indexed for an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub owner: String,
    pub original_filename: String,
    pub stored_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn matches(&self, owner: &str, filename: &str) -> bool {
        self.owner == owner && self.original_filename == filename
    }
}

/// A chunk returned from [`crate::index::VectorIndex::search`].
///
/// `score` is a similarity for the cosine metric (higher is closer) and a
/// distance for the l2 metric (lower is closer).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// One question/answer exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Outcome of an ingestion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Indexed { filename: String, chunks: usize },
    /// `(owner, filename)` was already in the catalog; nothing changed.
    AlreadyIndexed { filename: String },
}

impl IngestStatus {
    /// Number of chunks added by this request (0 for a duplicate).
    pub fn chunks(&self) -> usize {
        match self {
            IngestStatus::Indexed { chunks, .. } => *chunks,
            IngestStatus::AlreadyIndexed { .. } => 0,
        }
    }

    pub fn message(&self, owner: &str) -> String {
        match self {
            IngestStatus::Indexed { filename, chunks } => format!(
                "Indexed {} chunks from '{}' for owner '{}'.",
                chunks, filename, owner
            ),
            IngestStatus::AlreadyIndexed { filename } => {
                format!("'{}' already indexed for owner '{}'.", filename, owner)
            }
        }
    }
}

/// Outcome of a deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The file was not in the catalog.
    NotFound { filename: String },
    /// The file was removed and the owner has no documents left.
    DeletedNoneLeft { filename: String },
    /// The file was removed and the index was rebuilt from the remaining files.
    DeletedAndRebuilt {
        filename: String,
        files: usize,
        chunks: usize,
    },
}

impl DeleteStatus {
    pub fn message(&self, owner: &str) -> String {
        match self {
            DeleteStatus::NotFound { filename } => {
                format!("'{}' not found for owner '{}'.", filename, owner)
            }
            DeleteStatus::DeletedNoneLeft { filename } => format!(
                "'{}' deleted. No documents left for owner '{}'.",
                filename, owner
            ),
            DeleteStatus::DeletedAndRebuilt {
                filename,
                files,
                chunks,
            } => format!(
                "'{}' removed. Index for owner '{}' rebuilt from {} files ({} chunks).",
                filename, owner, files, chunks
            ),
        }
    }
}

/// Outcome of clearing an owner's conversation memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearStatus {
    Cleared,
    NothingToClear,
}

impl ClearStatus {
    pub fn message(&self, owner: &str) -> String {
        match self {
            ClearStatus::Cleared => format!("Chat history cleared for owner '{}'.", owner),
            ClearStatus::NothingToClear => format!("No chat history for owner '{}'.", owner),
        }
    }
}

/// Result of rebuilding an owner's index from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildSummary {
    /// Files whose chunks made it into the new index.
    pub files: usize,
    /// Files listed in the catalog whose stored document could not be read.
    pub skipped: usize,
    pub chunks: usize,
}

/// Longest accepted owner identifier.
const MAX_OWNER_LEN: usize = 128;

/// Check that an owner identifier can safely name a directory.
///
/// Accepts ASCII letters, digits, `-`, `_`, `.` and `@`, must not start
/// with `.`, and is limited to 128 characters. Names that collide with the
/// catalog file or its temporary file in `vector_store_dir` are rejected.
pub fn validate_owner(owner: &str) -> crate::error::KbResult<()> {
    let valid = !owner.is_empty()
        && owner.len() <= MAX_OWNER_LEN
        && !owner.starts_with('.')
        && !is_catalog_name(owner)
        && owner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(crate::error::KbError::InvalidOwner(owner.to_string()))
    }
}

fn is_catalog_name(owner: &str) -> bool {
    let catalog = crate::catalog::CATALOG_FILE.as_bytes();
    owner
        .as_bytes()
        .get(..catalog.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(catalog))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("alice").is_ok());
        assert!(validate_owner("u1").is_ok());
        assert!(validate_owner("bob.smith@example.com").is_ok());
        assert!(validate_owner("").is_err());
        assert!(validate_owner("..").is_err());
        assert!(validate_owner(".hidden").is_err());
        assert!(validate_owner("a/b").is_err());
        assert!(validate_owner("a\\b").is_err());
        assert!(validate_owner(&"x".repeat(129)).is_err());
        assert!(validate_owner("files.json").is_err());
        assert!(validate_owner("files.json.tmp").is_err());
        assert!(validate_owner("FILES.JSON").is_err());
        assert!(validate_owner("files").is_ok());
    }

    #[test]
    fn test_file_record_defaults_optional_fields() {
        let json = r#"{"owner":"u1","original_filename":"a.txt","stored_path":"/tmp/a.txt"}"#;
        let record: FileRecord = serde_json::from_str(json).unwrap();
        assert!(record.matches("u1", "a.txt"));
        assert_eq!(record.chunk_count, None);
        assert_eq!(record.indexed_at, None);
    }

    #[test]
    fn test_status_messages() {
        let status = IngestStatus::Indexed {
            filename: "notes.txt".into(),
            chunks: 3,
        };
        assert_eq!(status.chunks(), 3);
        assert!(status.message("u1").contains("3 chunks"));
        assert_eq!(
            IngestStatus::AlreadyIndexed {
                filename: "notes.txt".into()
            }
            .chunks(),
            0
        );
        assert!(ClearStatus::NothingToClear.message("u1").contains("No chat history"));
    }
}
