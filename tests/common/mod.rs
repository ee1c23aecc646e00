//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use kb_index::config::Config;
use kb_index::embedding::Embedder;
use kb_index::generation::Generator;
use kb_index::models::Turn;
use kb_index::{KbError, KbResult, KnowledgeBase};

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one of 64 buckets.
#[derive(Default)]
pub struct HashEmbedder {
    fail: AtomicBool,
    embedded: Mutex<Vec<String>>,
}

impl HashEmbedder {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every text embedded so far, in call order.
    pub fn embedded(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut h: u32 = 2166136261;
            for b in word.to_lowercase().bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            v[(h as usize) % DIMS] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, texts: &[String]) -> KbResult<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KbError::EmbeddingError("quota exceeded".into()));
        }
        self.embedded.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Bag-of-words vectors truncated to a different dimension, as after
/// switching embedding models.
pub struct NarrowEmbedder;

#[async_trait]
impl Embedder for NarrowEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow-narrow"
    }
    fn dims(&self) -> usize {
        DIMS / 4
    }
    async fn embed_batch(&self, texts: &[String]) -> KbResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| HashEmbedder::vector(t)[..DIMS / 4].to_vec())
            .collect())
    }
}

/// Records every call and answers with the history length it was given.
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: Mutex<Vec<(String, Vec<Turn>)>>,
}

pub const STANDALONE: &str = "What sound do dogs make";

impl ScriptedGenerator {
    pub fn calls(&self) -> Vec<(String, Vec<Turn>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn answer(&self, prompt: &str, history: &[Turn]) -> KbResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), history.to_vec()));
        if prompt.starts_with("Rewrite the follow-up") {
            return Ok(STANDALONE.to_string());
        }
        Ok(format!("answer after {} turns", history.len()))
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
    pub kb: Arc<KnowledgeBase>,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(HashEmbedder::default());
        let generator = Arc::new(ScriptedGenerator::default());
        let kb = Arc::new(KnowledgeBase::with_collaborators(
            Self::config(tmp.path()),
            embedder.clone(),
            generator.clone(),
        ));
        Self {
            tmp,
            embedder,
            generator,
            kb,
        }
    }

    pub fn config(dir: &Path) -> Config {
        let mut config = Config::minimal(dir);
        config.chunking.chunk_size = 40;
        config.chunking.overlap = 0;
        config
    }

    /// A second knowledge base over the same directories, as after a restart.
    pub fn reopen(&self) -> KnowledgeBase {
        KnowledgeBase::with_collaborators(
            Self::config(self.tmp.path()),
            self.embedder.clone(),
            self.generator.clone(),
        )
    }

    /// Reopen the same directories with a different embedder.
    pub fn reopen_with(&self, embedder: Arc<dyn Embedder>) -> KnowledgeBase {
        KnowledgeBase::with_collaborators(
            Self::config(self.tmp.path()),
            embedder,
            self.generator.clone(),
        )
    }

    /// Write `content` to `<tmp>/docs/<owner>/<name>` and return the path.
    pub fn write_doc(&self, owner: &str, name: &str, content: &str) -> PathBuf {
        let dir = self.tmp.path().join("docs").join(owner);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn owner_index_dir(&self, owner: &str) -> PathBuf {
        self.tmp.path().join("vector_store").join(owner)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.tmp.path().join("vector_store").join("files.json")
    }
}

pub const NOTES: &str =
    "Alpha paragraph about cats.\n\nBeta paragraph about dogs.\n\nGamma paragraph about birds.";
