//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one document: duplicate check → load →
//! chunking → embedding → index persist → catalog append. Runs under the
//! owner's lock so concurrent ingests for the same owner never interleave
//! their index load and persist.
//!
//! Nothing durable changes until the index is persisted. If the catalog
//! write then fails, the previous index generation is restored (or the
//! index removed when there was none), keeping catalog and index in step.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::chunk::split_segments;
use crate::error::{KbError, KbResult};
use crate::extract::load_document;
use crate::index::VectorIndex;
use crate::models::{validate_owner, FileRecord, IngestStatus};
use crate::rebuild::rebuild_locked;
use crate::service::KnowledgeBase;

/// Index the document stored at `path` for `owner`.
///
/// The document is identified by its file name; a second ingest of the
/// same name for the same owner is reported as [`IngestStatus::AlreadyIndexed`].
pub async fn ingest_document(kb: &KnowledgeBase, path: &Path, owner: &str) -> KbResult<IngestStatus> {
    validate_owner(owner)?;
    let filename = file_name_of(path)?;
    let _owner_guard = kb.locks.lock(owner).await;

    if kb.catalog.find(owner, &filename).await?.is_some() {
        tracing::info!(owner, filename = %filename, "already indexed, skipping");
        return Ok(IngestStatus::AlreadyIndexed { filename });
    }

    let segments = load_document(path)?;
    let chunks = split_segments(&filename, &segments, &kb.config.chunking);
    if chunks.is_empty() {
        return Err(KbError::load(
            path.display().to_string(),
            "document contains no text",
        ));
    }
    let chunk_count = chunks.len();

    let previous = load_or_repair(kb, owner).await?;
    let batch_size = kb.config.embedding.batch_size;
    let index = match &previous {
        Some(existing) => {
            let mut index = existing.clone();
            index
                .add_vectors(chunks, kb.embedder.as_ref(), batch_size)
                .await?;
            index
        }
        None => {
            VectorIndex::create(
                chunks,
                kb.embedder.as_ref(),
                batch_size,
                kb.store.metric(),
            )
            .await?
        }
    };

    kb.store.persist(owner, &index)?;

    let record = FileRecord {
        owner: owner.to_string(),
        original_filename: filename.clone(),
        stored_path: path.display().to_string(),
        chunk_count: Some(chunk_count),
        indexed_at: Some(Utc::now()),
    };
    if let Err(err) = kb.catalog.append(record).await {
        return Err(restore_previous(kb, owner, previous.as_ref(), err));
    }

    tracing::info!(
        owner,
        filename = %filename,
        chunks = chunk_count,
        total = index.len(),
        "indexed document"
    );
    Ok(IngestStatus::Indexed {
        filename,
        chunks: chunk_count,
    })
}

/// Store `bytes` as `<upload_dir>/<owner>/<filename>` and ingest it.
///
/// An existing stored file is rejected with [`KbError::FileExists`]. If
/// ingestion fails the stored file is removed again so the upload can be
/// retried.
pub async fn upload_document(
    kb: &KnowledgeBase,
    owner: &str,
    filename: &str,
    bytes: &[u8],
) -> KbResult<IngestStatus> {
    validate_owner(owner)?;
    let name = sanitize_filename(filename)?;
    let dir = kb.config.storage.upload_dir.join(owner);
    fs::create_dir_all(&dir)?;
    let dest = dir.join(&name);

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&dest)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(KbError::FileExists(name));
        }
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_all()) {
        let _ = fs::remove_file(&dest);
        return Err(e.into());
    }
    drop(file);
    tracing::debug!(owner, path = %dest.display(), bytes = bytes.len(), "stored upload");

    let result = ingest_document(kb, &dest, owner).await;
    if let Err(err) = &result {
        tracing::warn!(owner, filename = %name, error = %err, "ingest failed, discarding upload");
        let _ = fs::remove_file(&dest);
    }
    result
}

/// Where an upload named `filename` for `owner` is stored.
pub fn upload_path(upload_dir: &Path, owner: &str, filename: &str) -> KbResult<PathBuf> {
    validate_owner(owner)?;
    Ok(upload_dir.join(owner).join(sanitize_filename(filename)?))
}

/// Reduce a client-supplied name to a plain file name.
///
/// Rejects empty names and names that only make sense as paths
/// (`.`, `..`, or a trailing separator).
pub fn sanitize_filename(filename: &str) -> KbResult<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(KbError::InvalidFilename(filename.to_string()));
    }
    Ok(base.to_string())
}

fn file_name_of(path: &Path) -> KbResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| KbError::InvalidFilename(path.display().to_string()))
}

/// Load `owner`'s index, rebuilding it from the catalog if it is corrupt
/// or missing while the catalog still lists files for the owner.
///
/// Caller must hold the owner lock.
pub(crate) async fn load_or_repair(kb: &KnowledgeBase, owner: &str) -> KbResult<Option<VectorIndex>> {
    match kb.store.load(owner) {
        Ok(Some(index)) => return Ok(Some(index)),
        Ok(None) => {
            if kb.catalog.for_owner(owner).await?.is_empty() {
                return Ok(None);
            }
            tracing::warn!(owner, "index missing for cataloged files, rebuilding");
        }
        Err(KbError::CorruptIndex { reason, .. }) => {
            tracing::warn!(owner, reason = %reason, "corrupt index, rebuilding from catalog");
        }
        Err(e) => return Err(e),
    }

    let (index, summary) = rebuild_locked(kb, owner).await?;
    tracing::info!(
        owner,
        files = summary.files,
        skipped = summary.skipped,
        chunks = summary.chunks,
        "repaired index"
    );
    Ok(index)
}

/// Undo an index persist after the catalog write failed.
fn restore_previous(
    kb: &KnowledgeBase,
    owner: &str,
    previous: Option<&VectorIndex>,
    err: KbError,
) -> KbError {
    let restored = match previous {
        Some(index) => kb.store.persist(owner, index),
        None => kb.store.remove(owner),
    };
    match restored {
        Ok(()) => {
            tracing::warn!(owner, error = %err, "catalog write failed, restored previous index");
            err
        }
        Err(restore_err) => {
            tracing::error!(
                owner,
                error = %err,
                restore_error = %restore_err,
                "catalog and index are out of step; run `kb rebuild`"
            );
            KbError::Inconsistent {
                owner: owner.to_string(),
                reason: format!(
                    "catalog write failed ({}) and index restore failed ({})",
                    err, restore_err
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_keeps_basename() {
        assert_eq!(sanitize_filename("notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn test_sanitize_filename_rejects_path_like() {
        for bad in ["", "  ", ".", "..", "dir/", "a/.."] {
            assert!(
                matches!(sanitize_filename(bad), Err(KbError::InvalidFilename(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_upload_path_is_per_owner() {
        let path = upload_path(Path::new("/data/uploads"), "u1", "a.md").unwrap();
        assert_eq!(path, Path::new("/data/uploads/u1/a.md"));
        assert!(upload_path(Path::new("/data/uploads"), "..", "a.md").is_err());
    }
}
