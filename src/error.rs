//! Error types for the knowledge base core.
//!
//! Collaborator failures (loading, embedding, generation) abort the current
//! operation and are reported through [`KbError`]. Conditions that callers
//! should treat as ordinary outcomes (a duplicate upload, deleting a file
//! that is not indexed, asking a question before anything was uploaded) are
//! modelled as status values in [`crate::models`] instead, so they never
//! show up here in the normal flow.

use thiserror::Error;

/// Errors raised by the index manager and its collaborators.
#[derive(Error, Debug)]
pub enum KbError {
    /// `(owner, filename)` is already present in the catalog.
    #[error("'{filename}' is already indexed for owner '{owner}'")]
    DuplicateDocument { owner: String, filename: String },

    /// No catalog record for `(owner, filename)`.
    #[error("'{filename}' not found for owner '{owner}'")]
    DocumentNotFound { owner: String, filename: String },

    /// The loader does not know how to read this kind of file.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The document could not be read or parsed.
    #[error("failed to load document {path}: {reason}")]
    LoadError { path: String, reason: String },

    /// The embedding collaborator failed (quota, timeout, malformed input,
    /// or a vector of the wrong dimension).
    #[error("embedding failed: {0}")]
    EmbeddingError(String),

    /// The answer collaborator failed.
    #[error("generation failed: {0}")]
    GenerationError(String),

    /// Persisted vectors and docstore disagree; the index must be rebuilt
    /// from the catalog.
    #[error("index for owner '{owner}' is corrupt: {reason}")]
    CorruptIndex { owner: String, reason: String },

    /// The catalog could not be written. The previous catalog is intact.
    #[error("failed to write catalog: {0}")]
    CatalogWriteError(String),

    /// The owner has no index on disk.
    #[error("no index for owner '{0}'")]
    IndexMissing(String),

    /// Owner identifiers name directories, so they must be plain path components.
    #[error("invalid owner identifier: {0:?}")]
    InvalidOwner(String),

    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    /// An upload would overwrite a stored document.
    #[error("file already exists: {0}")]
    FileExists(String),

    /// The index holds vectors for a file the catalog does not list and the
    /// automatic rollback failed. Running a rebuild for the owner repairs it.
    #[error("index and catalog diverged for owner '{owner}': {reason}")]
    Inconsistent { owner: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KbError {
    /// Stable machine-readable code, used by the HTTP layer and in logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            KbError::DuplicateDocument { .. } => "DUPLICATE_DOCUMENT",
            KbError::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            KbError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            KbError::LoadError { .. } => "LOAD_ERROR",
            KbError::EmbeddingError(_) => "EMBEDDING_ERROR",
            KbError::GenerationError(_) => "GENERATION_ERROR",
            KbError::CorruptIndex { .. } => "CORRUPT_INDEX",
            KbError::CatalogWriteError(_) => "CATALOG_WRITE_ERROR",
            KbError::IndexMissing(_) => "INDEX_MISSING",
            KbError::InvalidOwner(_) => "INVALID_OWNER",
            KbError::InvalidFilename(_) => "INVALID_FILENAME",
            KbError::FileExists(_) => "FILE_EXISTS",
            KbError::Inconsistent { .. } => "INCONSISTENT",
            KbError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KbError::EmbeddingError(_) | KbError::GenerationError(_) | KbError::Io(_)
        )
    }

    pub(crate) fn load(path: impl Into<String>, reason: impl ToString) -> Self {
        KbError::LoadError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(owner: &str, reason: impl Into<String>) -> Self {
        KbError::CorruptIndex {
            owner: owner.to_string(),
            reason: reason.into(),
        }
    }
}

pub type KbResult<T> = std::result::Result<T, KbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_unique() {
        let errors = vec![
            KbError::DuplicateDocument {
                owner: "a".into(),
                filename: "f".into(),
            },
            KbError::DocumentNotFound {
                owner: "a".into(),
                filename: "f".into(),
            },
            KbError::UnsupportedFormat("x".into()),
            KbError::load("p", "r"),
            KbError::EmbeddingError("e".into()),
            KbError::GenerationError("g".into()),
            KbError::corrupt("a", "r"),
            KbError::CatalogWriteError("c".into()),
            KbError::IndexMissing("a".into()),
            KbError::InvalidOwner("..".into()),
            KbError::InvalidFilename("".into()),
            KbError::FileExists("f".into()),
            KbError::Inconsistent {
                owner: "a".into(),
                reason: "r".into(),
            },
            KbError::Io(std::io::Error::other("boom")),
        ];
        let codes: Vec<&str> = errors.iter().map(|e| e.error_code()).collect();
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b, "duplicate error code {}", a);
            }
        }
    }

    #[test]
    fn test_retryable() {
        assert!(KbError::EmbeddingError("quota".into()).is_retryable());
        assert!(!KbError::corrupt("a", "count mismatch").is_retryable());
    }

    #[test]
    fn test_messages_name_owner() {
        let err = KbError::DocumentNotFound {
            owner: "alice".into(),
            filename: "notes.txt".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("notes.txt"));
    }
}
