//! Metadata catalog: which files are indexed for which owner.
//!
//! Stored as `{ "files": [ ... ] }` at `<vector_store_dir>/files.json`.
//! Every mutation loads the whole document, changes it, and writes it back
//! through a temporary file and rename while holding the catalog mutex, so
//! concurrent owners never lose each other's records.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{KbError, KbResult};
use crate::models::FileRecord;

pub const CATALOG_FILE: &str = "files.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    files: Vec<FileRecord>,
}

pub struct Catalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Catalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Catalog stored in `files.json` under `vector_store_dir`.
    pub fn in_dir(vector_store_dir: &Path) -> Self {
        Self::new(vector_store_dir.join(CATALOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in catalog order.
    pub async fn records(&self) -> KbResult<Vec<FileRecord>> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    pub async fn find(&self, owner: &str, filename: &str) -> KbResult<Option<FileRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .find(|r| r.matches(owner, filename)))
    }

    /// `owner`'s records in catalog order.
    pub async fn for_owner(&self, owner: &str) -> KbResult<Vec<FileRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }

    /// Append `record`, rejecting a second record for the same `(owner, filename)`.
    pub async fn append(&self, record: FileRecord) -> KbResult<()> {
        self.update(|files| {
            if files
                .iter()
                .any(|r| r.matches(&record.owner, &record.original_filename))
            {
                return Err(KbError::DuplicateDocument {
                    owner: record.owner.clone(),
                    filename: record.original_filename.clone(),
                });
            }
            files.push(record);
            Ok(())
        })
        .await
    }

    /// Remove and return the record for `(owner, filename)`, if any.
    pub async fn remove(&self, owner: &str, filename: &str) -> KbResult<Option<FileRecord>> {
        self.update(|files| {
            let position = files.iter().position(|r| r.matches(owner, filename));
            Ok(position.map(|i| files.remove(i)))
        })
        .await
    }

    /// Load, apply `f`, and save, all under the catalog mutex.
    ///
    /// Nothing is written when `f` returns an error.
    pub async fn update<T, F>(&self, f: F) -> KbResult<T>
    where
        F: FnOnce(&mut Vec<FileRecord>) -> KbResult<T>,
    {
        let _guard = self.lock.lock().await;
        let mut files = self.load()?;
        let out = f(&mut files)?;
        self.save(files)?;
        Ok(out)
    }

    /// Read the catalog from disk; a missing file is an empty catalog.
    fn load(&self) -> KbResult<Vec<FileRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let catalog: CatalogFile = serde_json::from_str(&content).map_err(|e| {
            KbError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {}", self.path.display(), e),
            ))
        })?;
        Ok(catalog.files)
    }

    fn save(&self, files: Vec<FileRecord>) -> KbResult<()> {
        let json = serde_json::to_vec_pretty(&CatalogFile { files })
            .map_err(|e| KbError::CatalogWriteError(e.to_string()))?;
        self.write_atomic(&json).map_err(|e| {
            KbError::CatalogWriteError(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}
