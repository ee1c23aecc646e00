//! # Knowledge base CLI (`kb`)
//!
//! Manage per-owner document indexes and ask questions against them.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb ingest <path> --owner <id>` | Index a file that is already stored |
//! | `kb upload <path> --owner <id>` | Copy a file into the upload dir, then index it |
//! | `kb delete <filename> --owner <id>` | Remove a file and rebuild the owner's index |
//! | `kb files --owner <id>` | List the owner's indexed files |
//! | `kb ask "<question>" --owner <id>` | Answer a question from the owner's documents |
//! | `kb rebuild --owner <id>` | Rebuild the owner's index from the catalog |
//! | `kb serve` | Start the HTTP server |
//!
//! Results print to stdout; logs go to stderr (`RUST_LOG` to adjust).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use std::sync::Arc;

use kb_index::config;
use kb_index::logging::init_tracing;
use kb_index::server::serve;
use kb_index::service::KnowledgeBase;

/// Multi-tenant document index manager for retrieval-augmented chat.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a stored document for an owner.
    Ingest {
        path: PathBuf,
        #[arg(long)]
        owner: String,
    },

    /// Copy a document into the owner's upload directory and index it.
    Upload {
        path: PathBuf,
        #[arg(long)]
        owner: String,
    },

    /// Remove a document and rebuild the owner's index from what remains.
    Delete {
        filename: String,
        #[arg(long)]
        owner: String,
    },

    /// List an owner's indexed files.
    Files {
        #[arg(long)]
        owner: String,
    },

    /// Ask a question against an owner's documents.
    Ask {
        question: String,
        #[arg(long)]
        owner: String,
        /// Accepted for compatibility; memory is kept per owner.
        #[arg(long)]
        session: Option<String>,
    },

    /// Rebuild an owner's index from the catalog.
    Rebuild {
        #[arg(long)]
        owner: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Warning: could not initialize logging: {}", e);
    }

    let cfg = config::load_config(&cli.config)?;
    let kb = KnowledgeBase::new(cfg)?;
    run_command(kb, cli.command).await
}

async fn run_command(kb: KnowledgeBase, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Ingest { path, owner } => {
            let status = kb.ingest(&path, &owner).await?;
            println!("{}", status.message(&owner));
        }
        Commands::Upload { path, owner } => {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?;
            let bytes = std::fs::read(&path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
            let status = kb.upload(&owner, &filename, &bytes).await?;
            println!("{}", status.message(&owner));
        }
        Commands::Delete { filename, owner } => {
            let status = kb.delete(&filename, &owner).await?;
            println!("{}", status.message(&owner));
        }
        Commands::Files { owner } => {
            let files = kb.list_files(&owner).await?;
            if files.is_empty() {
                println!("No files indexed for owner '{}'.", owner);
            }
            for file in files {
                let chunks = file
                    .chunk_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let when = file
                    .indexed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{}\t{} chunks\t{}", file.original_filename, chunks, when);
            }
        }
        Commands::Ask {
            question,
            owner,
            session,
        } => {
            let answer = kb.query(&question, &owner, session.as_deref()).await?;
            println!("{}", answer);
        }
        Commands::Rebuild { owner } => {
            let summary = kb.rebuild(&owner).await?;
            println!(
                "Rebuilt index for owner '{}': {} files, {} chunks, {} skipped.",
                owner, summary.files, summary.chunks, summary.skipped
            );
        }
        Commands::Serve => serve(Arc::new(kb)).await?,
    }
    Ok(())
}
