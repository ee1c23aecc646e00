//! Document deletion and index rebuild.
//!
//! The index is append-only, so removing a document means rebuilding the
//! owner's index from the files that remain in the catalog. The rebuild
//! walks the catalog in order: the first readable file seeds
//! [`VectorIndex::create`] and every later file is merged with
//! [`VectorIndex::add_vectors`].
//!
//! Deletion builds the replacement index before touching the catalog, so an
//! embedding failure aborts the delete with catalog and index unchanged.

use std::fs;
use std::path::Path;

use crate::chunk::split_segments;
use crate::error::{KbError, KbResult};
use crate::extract::load_document;
use crate::index::VectorIndex;
use crate::models::{validate_owner, Chunk, DeleteStatus, FileRecord, RebuildSummary};
use crate::service::KnowledgeBase;

/// Remove `filename` from `owner`'s knowledge base and rebuild the index
/// from the remaining files.
pub async fn delete_document(kb: &KnowledgeBase, filename: &str, owner: &str) -> KbResult<DeleteStatus> {
    validate_owner(owner)?;
    let _owner_guard = kb.locks.lock(owner).await;

    let Some(record) = kb.catalog.find(owner, filename).await? else {
        tracing::info!(owner, filename, "delete requested for unknown file");
        return Ok(DeleteStatus::NotFound {
            filename: filename.to_string(),
        });
    };

    let remaining: Vec<FileRecord> = kb
        .catalog
        .for_owner(owner)
        .await?
        .into_iter()
        .filter(|r| !r.matches(owner, filename))
        .collect();
    let (index, summary) = build_from_records(kb, owner, &remaining).await?;

    kb.catalog.remove(owner, filename).await?;
    if let Err(err) = install(kb, owner, index.as_ref()) {
        tracing::error!(
            owner,
            filename,
            error = %err,
            "catalog updated but index replacement failed; run `kb rebuild`"
        );
        return Err(KbError::Inconsistent {
            owner: owner.to_string(),
            reason: format!("index replacement after deleting '{}' failed: {}", filename, err),
        });
    }
    remove_stored(&record.stored_path);

    tracing::info!(
        owner,
        filename,
        files = summary.files,
        skipped = summary.skipped,
        chunks = summary.chunks,
        "deleted document"
    );
    Ok(match index {
        None => DeleteStatus::DeletedNoneLeft {
            filename: filename.to_string(),
        },
        Some(_) => DeleteStatus::DeletedAndRebuilt {
            filename: filename.to_string(),
            files: summary.files,
            chunks: summary.chunks,
        },
    })
}

/// Rebuild `owner`'s index from scratch using the catalog.
pub async fn rebuild_index(kb: &KnowledgeBase, owner: &str) -> KbResult<RebuildSummary> {
    validate_owner(owner)?;
    let _owner_guard = kb.locks.lock(owner).await;
    let (_, summary) = rebuild_locked(kb, owner).await?;
    Ok(summary)
}

/// Rebuild and install `owner`'s index. Caller must hold the owner lock.
pub(crate) async fn rebuild_locked(
    kb: &KnowledgeBase,
    owner: &str,
) -> KbResult<(Option<VectorIndex>, RebuildSummary)> {
    let records = kb.catalog.for_owner(owner).await?;
    let (index, summary) = build_from_records(kb, owner, &records).await?;
    install(kb, owner, index.as_ref())?;
    Ok((index, summary))
}

/// Persist `index` as the owner's live index, or remove it when `None`.
fn install(kb: &KnowledgeBase, owner: &str, index: Option<&VectorIndex>) -> KbResult<()> {
    match index {
        Some(index) => kb.store.persist(owner, index),
        None => kb.store.remove(owner),
    }
}

async fn build_from_records(
    kb: &KnowledgeBase,
    owner: &str,
    records: &[FileRecord],
) -> KbResult<(Option<VectorIndex>, RebuildSummary)> {
    let batch_size = kb.config.embedding.batch_size;
    let mut index: Option<VectorIndex> = None;
    let mut summary = RebuildSummary::default();

    for record in records {
        let chunks = match record_chunks(kb, record) {
            Ok(chunks) => chunks,
            Err(err) => {
                tracing::warn!(
                    owner,
                    filename = %record.original_filename,
                    error = %err,
                    "skipping file during rebuild"
                );
                summary.skipped += 1;
                continue;
            }
        };
        let count = chunks.len();

        match index.as_mut() {
            Some(existing) => {
                existing
                    .add_vectors(chunks, kb.embedder.as_ref(), batch_size)
                    .await?;
            }
            None => {
                index = Some(
                    VectorIndex::create(
                        chunks,
                        kb.embedder.as_ref(),
                        batch_size,
                        kb.store.metric(),
                    )
                    .await?,
                );
            }
        }
        summary.files += 1;
        summary.chunks += count;
    }

    Ok((index, summary))
}

fn record_chunks(kb: &KnowledgeBase, record: &FileRecord) -> KbResult<Vec<Chunk>> {
    let path = Path::new(&record.stored_path);
    let segments = load_document(path)?;
    let chunks = split_segments(&record.original_filename, &segments, &kb.config.chunking);
    if chunks.is_empty() {
        return Err(KbError::load(&record.stored_path, "document contains no text"));
    }
    Ok(chunks)
}

fn remove_stored(stored_path: &str) {
    match fs::remove_file(stored_path) {
        Ok(()) => tracing::debug!(path = stored_path, "removed stored document"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = stored_path, error = %e, "could not remove stored document"),
    }
}
