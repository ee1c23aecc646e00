//! The [`KnowledgeBase`] facade.
//!
//! Owns every registry (catalog, index store, conversation memory, owner
//! locks) plus the embedding and generation collaborators, and exposes the
//! operations used by the CLI and the HTTP server.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{KbError, KbResult};
use crate::generation::{create_generator, Generator};
use crate::index::IndexStore;
use crate::locks::OwnerLocks;
use crate::memory::MemoryStore;
use crate::models::{
    validate_owner, ClearStatus, DeleteStatus, FileRecord, IngestStatus, RebuildSummary, SearchHit,
};
use crate::{ingest, query, rebuild};

pub struct KnowledgeBase {
    pub(crate) config: Config,
    pub(crate) store: IndexStore,
    pub(crate) catalog: Catalog,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) memory: MemoryStore,
    pub(crate) locks: OwnerLocks,
}

impl KnowledgeBase {
    /// Build a knowledge base with providers created from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let generator: Arc<dyn Generator> = Arc::from(create_generator(&config.generation)?);
        tracing::info!(
            embedder = embedder.model_name(),
            dims = embedder.dims(),
            generator = generator.model_name(),
            "knowledge base ready"
        );
        Ok(Self::with_collaborators(config, embedder, generator))
    }

    /// Build a knowledge base around caller-supplied collaborators.
    pub fn with_collaborators(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let store = IndexStore::new(
            config.storage.vector_store_dir.clone(),
            config.retrieval.metric,
        );
        let catalog = Catalog::in_dir(&config.storage.vector_store_dir);
        Self {
            config,
            store,
            catalog,
            embedder,
            generator,
            memory: MemoryStore::new(),
            locks: OwnerLocks::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index_store(&self) -> &IndexStore {
        &self.store
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Index an already-stored document for `owner`.
    pub async fn ingest(&self, path: &Path, owner: &str) -> KbResult<IngestStatus> {
        ingest::ingest_document(self, path, owner).await
    }

    /// Store `bytes` in the owner's upload directory, then index it.
    pub async fn upload(&self, owner: &str, filename: &str, bytes: &[u8]) -> KbResult<IngestStatus> {
        ingest::upload_document(self, owner, filename, bytes).await
    }

    pub async fn delete(&self, filename: &str, owner: &str) -> KbResult<DeleteStatus> {
        rebuild::delete_document(self, filename, owner).await
    }

    pub async fn rebuild(&self, owner: &str) -> KbResult<RebuildSummary> {
        rebuild::rebuild_index(self, owner).await
    }

    /// Files indexed for `owner`, in ingestion order.
    pub async fn list_files(&self, owner: &str) -> KbResult<Vec<FileRecord>> {
        validate_owner(owner)?;
        self.catalog.for_owner(owner).await
    }

    /// Catalog record for one file; [`KbError::DocumentNotFound`] if absent.
    pub async fn file_record(&self, owner: &str, filename: &str) -> KbResult<FileRecord> {
        validate_owner(owner)?;
        self.catalog
            .find(owner, filename)
            .await?
            .ok_or_else(|| KbError::DocumentNotFound {
                owner: owner.to_string(),
                filename: filename.to_string(),
            })
    }

    pub async fn query(&self, question: &str, owner: &str, session: Option<&str>) -> KbResult<String> {
        query::answer_question(self, question, owner, session).await
    }

    pub async fn retrieve(&self, question: &str, owner: &str) -> KbResult<Vec<SearchHit>> {
        query::retrieve(self, question, owner).await
    }

    pub async fn clear_memory(&self, owner: &str) -> ClearStatus {
        let status = self.memory.clear(owner).await;
        tracing::info!(owner, ?status, "clear memory");
        status
    }

    /// Snapshot of the owner's conversation.
    pub async fn history(&self, owner: &str) -> Vec<crate::models::Turn> {
        self.memory.history(owner).await
    }
}
