//! Per-owner vector index and its on-disk store.
//!
//! A [`VectorIndex`] holds embedding vectors, a parallel list of chunk ids
//! and a docstore mapping each id to its [`Chunk`]. Search is exhaustive
//! (brute force) over all vectors, which is adequate for the per-owner
//! document counts this service targets.
//!
//! # On-disk layout
//!
//! ```text
//! <vector_store_dir>/<owner>/
//!   CURRENT                  # name of the live generation, e.g. "gen-3f2a..."
//!   gen-<uuid>/
//!     vectors.bin            # count × dims little-endian f32
//!     docstore.json          # ids, chunks, dims, count, sha256 of vectors.bin
//! ```
//!
//! [`IndexStore::persist`] writes a fresh generation into a staging
//! directory, renames it into place, then swaps `CURRENT` through a
//! temporary file and rename. A crash at any point leaves either the old
//! or the new generation live, never a mix of the two. Generations that
//! are no longer current are removed afterwards on a best-effort basis.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Metric;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_all, l2_distance, vec_to_blob, Embedder};
use crate::error::{KbError, KbResult};
use crate::models::{validate_owner, Chunk, SearchHit};

const CURRENT_FILE: &str = "CURRENT";
const VECTORS_FILE: &str = "vectors.bin";
const DOCSTORE_FILE: &str = "docstore.json";
const GENERATION_PREFIX: &str = "gen-";
const STAGING_PREFIX: &str = ".staging-";
const FORMAT_VERSION: u32 = 1;

/// Embedding vectors plus the chunks they were computed from.
///
/// `vectors`, `ids` and `docstore` always have the same length, and every
/// id in `ids` has an entry in `docstore`.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    metric: Metric,
    vectors: Vec<Vec<f32>>,
    ids: Vec<String>,
    docstore: HashMap<String, Chunk>,
}

impl VectorIndex {
    /// An index with no entries.
    pub fn empty(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            vectors: Vec::new(),
            ids: Vec::new(),
            docstore: HashMap::new(),
        }
    }

    /// Embed `chunks` and build a new index from them.
    pub async fn create(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
        metric: Metric,
    ) -> KbResult<Self> {
        let mut index = Self::empty(embedder.dims(), metric);
        index.add_vectors(chunks, embedder, batch_size).await?;
        Ok(index)
    }

    /// Embed `chunks` and append them, returning how many were added.
    ///
    /// All chunks are embedded before anything is appended, so a failed
    /// embedding leaves the index untouched.
    pub async fn add_vectors(
        &mut self,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> KbResult<usize> {
        if embedder.dims() != self.dims {
            return Err(KbError::EmbeddingError(format!(
                "embedder produces {}-dimensional vectors but the index holds {}",
                embedder.dims(),
                self.dims
            )));
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_all(embedder, &texts, batch_size).await?;

        let added = chunks.len();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            let id = Uuid::new_v4().to_string();
            self.vectors.push(vector);
            self.ids.push(id.clone());
            self.docstore.insert(id, chunk);
        }
        Ok(added)
    }

    /// The `k` chunks closest to `query`, best match first.
    ///
    /// Ties keep insertion order. Returns fewer than `k` hits when the
    /// index is smaller than `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let score = match self.metric {
                    Metric::Cosine => cosine_similarity(query, v),
                    Metric::L2 => l2_distance(query, v),
                };
                (i, score)
            })
            .collect();

        match self.metric {
            Metric::Cosine => scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            }),
            Metric::L2 => scored.sort_by(|a, b| {
                a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
            }),
        }

        scored
            .into_iter()
            .take(k)
            .filter_map(|(i, score)| {
                self.docstore.get(&self.ids[i]).map(|chunk| SearchHit {
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.ids.iter().filter_map(|id| self.docstore.get(id))
    }

    /// Distinct source files, in order of first appearance.
    pub fn source_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for chunk in self.chunks() {
            if !files.contains(&chunk.source_file) {
                files.push(chunk.source_file.clone());
            }
        }
        files
    }
}

/// The `docstore.json` document of a generation.
#[derive(Debug, Serialize, Deserialize)]
struct DocstoreFile {
    format: u32,
    dims: usize,
    count: usize,
    vectors_sha256: String,
    ids: Vec<String>,
    chunks: HashMap<String, Chunk>,
}

/// Filesystem store for per-owner indexes under one root directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
    metric: Metric,
}

impl IndexStore {
    /// `metric` is applied to every index this store loads.
    pub fn new(root: impl Into<PathBuf>, metric: Metric) -> Self {
        Self {
            root: root.into(),
            metric,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Directory holding `owner`'s index generations.
    pub fn owner_dir(&self, owner: &str) -> KbResult<PathBuf> {
        validate_owner(owner)?;
        Ok(self.root.join(owner))
    }

    /// Whether `owner` has a live index on disk.
    pub fn exists(&self, owner: &str) -> KbResult<bool> {
        Ok(self.owner_dir(owner)?.join(CURRENT_FILE).is_file())
    }

    /// Load `owner`'s live index, or `None` if none was ever persisted.
    ///
    /// Fails with [`KbError::CorruptIndex`] when the stored generation is
    /// missing, truncated, or fails its consistency checks.
    pub fn load(&self, owner: &str) -> KbResult<Option<VectorIndex>> {
        let dir = self.owner_dir(owner)?;
        let generation = match fs::read_to_string(dir.join(CURRENT_FILE)) {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !is_generation_name(&generation) {
            return Err(KbError::corrupt(
                owner,
                format!("CURRENT names an invalid generation '{}'", generation),
            ));
        }

        let gen_dir = dir.join(&generation);
        let docstore_bytes = read_part(owner, &gen_dir.join(DOCSTORE_FILE))?;
        let vector_bytes = read_part(owner, &gen_dir.join(VECTORS_FILE))?;

        let doc: DocstoreFile = serde_json::from_slice(&docstore_bytes)
            .map_err(|e| KbError::corrupt(owner, format!("docstore.json: {}", e)))?;
        let index = decode_generation(owner, doc, &vector_bytes, self.metric)?;

        tracing::debug!(owner, generation = %generation, entries = index.len(), "loaded index");
        Ok(Some(index))
    }

    /// Atomically replace `owner`'s live index with `index`.
    pub fn persist(&self, owner: &str, index: &VectorIndex) -> KbResult<()> {
        let dir = self.owner_dir(owner)?;
        fs::create_dir_all(&dir)?;

        let generation = format!("{}{}", GENERATION_PREFIX, Uuid::new_v4().simple());
        let staging = dir.join(format!("{}{}", STAGING_PREFIX, generation));

        let staged = write_generation(&staging, index)
            .and_then(|()| fs::rename(&staging, dir.join(&generation)));
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }

        let tmp = dir.join(format!("{}.tmp", CURRENT_FILE));
        let swapped = write_synced(&tmp, generation.as_bytes())
            .and_then(|()| fs::rename(&tmp, dir.join(CURRENT_FILE)));
        if let Err(e) = swapped {
            let _ = fs::remove_file(&tmp);
            let _ = fs::remove_dir_all(dir.join(&generation));
            return Err(e.into());
        }

        prune_generations(&dir, &generation);
        tracing::debug!(owner, generation = %generation, entries = index.len(), "persisted index");
        Ok(())
    }

    /// Delete all of `owner`'s persisted index data. Missing data is not an error.
    pub fn remove(&self, owner: &str) -> KbResult<()> {
        let dir = self.owner_dir(owner)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_generation_name(name: &str) -> bool {
    name.starts_with(GENERATION_PREFIX)
        && name.len() > GENERATION_PREFIX.len()
        && name[GENERATION_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn read_part(owner: &str, path: &Path) -> KbResult<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => KbError::corrupt(
            owner,
            format!("missing {}", path.display()),
        ),
        _ => KbError::Io(e),
    })
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn decode_generation(
    owner: &str,
    doc: DocstoreFile,
    vector_bytes: &[u8],
    metric: Metric,
) -> KbResult<VectorIndex> {
    if doc.format != FORMAT_VERSION {
        return Err(KbError::corrupt(
            owner,
            format!("unsupported index format {}", doc.format),
        ));
    }
    if doc.ids.len() != doc.count || doc.chunks.len() != doc.count {
        return Err(KbError::corrupt(
            owner,
            format!(
                "count mismatch: header {}, ids {}, docstore {}",
                doc.count,
                doc.ids.len(),
                doc.chunks.len()
            ),
        ));
    }
    if let Some(missing) = doc.ids.iter().find(|id| !doc.chunks.contains_key(*id)) {
        return Err(KbError::corrupt(
            owner,
            format!("id {} has no docstore entry", missing),
        ));
    }
    let expected_bytes = doc.count * doc.dims * 4;
    if vector_bytes.len() != expected_bytes {
        return Err(KbError::corrupt(
            owner,
            format!(
                "vectors.bin holds {} bytes, expected {} ({} × {})",
                vector_bytes.len(),
                expected_bytes,
                doc.count,
                doc.dims
            ),
        ));
    }
    if checksum(vector_bytes) != doc.vectors_sha256 {
        return Err(KbError::corrupt(owner, "vectors.bin checksum mismatch"));
    }

    let vectors = if doc.dims == 0 {
        vec![Vec::new(); doc.count]
    } else {
        vector_bytes
            .chunks_exact(doc.dims * 4)
            .map(blob_to_vec)
            .collect()
    };

    Ok(VectorIndex {
        dims: doc.dims,
        metric,
        vectors,
        ids: doc.ids,
        docstore: doc.chunks,
    })
}

fn write_generation(dir: &Path, index: &VectorIndex) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;

    let mut payload = Vec::with_capacity(index.len() * index.dims * 4);
    for vector in &index.vectors {
        payload.extend_from_slice(&vec_to_blob(vector));
    }

    let doc = DocstoreFile {
        format: FORMAT_VERSION,
        dims: index.dims,
        count: index.len(),
        vectors_sha256: checksum(&payload),
        ids: index.ids.clone(),
        chunks: index.docstore.clone(),
    };
    let json = serde_json::to_vec(&doc)?;

    write_synced(&dir.join(VECTORS_FILE), &payload)?;
    write_synced(&dir.join(DOCSTORE_FILE), &json)?;
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Remove generations and staging directories other than `keep`.
fn prune_generations(dir: &Path, keep: &str) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "could not list index generations");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let stale = name != keep
            && (name.starts_with(GENERATION_PREFIX) || name.starts_with(STAGING_PREFIX));
        if stale {
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(path = %entry.path().display(), error = %e, "could not remove stale generation");
            }
        }
    }
}
