//! # kb-index
//!
//! A multi-tenant document index manager for retrieval-augmented chat.
//!
//! Each owner gets a private vector index built from the documents they
//! upload. A shared metadata catalog records which files are indexed for
//! whom, deleting a document rebuilds its owner's index from the files that
//! remain, and questions are answered from the owner's top matching chunks
//! with per-owner conversation memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌──────────────────┐
//! │  Loader  │──▶│ Chunk + Embed  │──▶│ Per-owner index   │
//! │ txt/pdf/ │   │                │   │ gen-*/ + CURRENT  │
//! │  docx    │   └────────────────┘   └────────┬─────────┘
//! └──────────┘          │                      │
//!                       ▼                      ▼
//!                ┌────────────┐         ┌────────────┐
//!                │  Catalog   │         │ Retrieval  │──▶ Generator
//!                │ files.json │         │ + memory   │
//!                └────────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb upload ./notes.txt --owner alice
//! kb ask "What do the notes say about cats?" --owner alice
//! kb delete notes.txt --owner alice
//! kb serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and operation outcomes |
//! | [`error`] | [`KbError`](error::KbError) and error codes |
//! | [`extract`] | Document loading (text, PDF, DOCX) |
//! | [`chunk`] | Recursive text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Answer generation providers |
//! | [`index`] | Vector index and generation-based persistence |
//! | [`catalog`] | File catalog (`files.json`) |
//! | [`memory`] | Per-owner conversation memory |
//! | [`ingest`] | Ingestion pipeline and uploads |
//! | [`rebuild`] | Deletion and index rebuild |
//! | [`query`] | Retrieval and answering |
//! | [`service`] | [`KnowledgeBase`](service::KnowledgeBase) facade |
//! | [`server`] | HTTP server |

mod backoff;
pub mod catalog;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod locks;
pub mod logging;
pub mod memory;
pub mod models;
pub mod query;
pub mod rebuild;
pub mod server;
pub mod service;

pub use error::{KbError, KbResult};
pub use service::KnowledgeBase;
