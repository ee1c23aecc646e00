//! HTTP server for the knowledge base.
//!
//! Exposes upload, chat, listing, deletion and memory reset over a JSON
//! API. The calling owner is read from the `X-Owner` header, which an
//! authenticating proxy in front of this server is expected to set.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `GET`  | `/health` | – | `{status, version}` |
//! | `POST` | `/upload` | `{filename, content_base64}` | `{success, detail, chunks}` |
//! | `POST` | `/chat` | `{question, user_id}` | `{answer}` |
//! | `GET`  | `/files` | – | `{files}` |
//! | `POST` | `/delete` | `{file_name}` | `{result}` |
//! | `POST` | `/clear` | `{user_id}` | `{result}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing X-Owner header" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `unsupported_format` (415), `embedding_error` (502),
//! `generation_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::KbError;
use crate::models::FileRecord;
use crate::service::KnowledgeBase;

/// Header carrying the authenticated owner identifier.
pub const OWNER_HEADER: &str = "x-owner";

/// Largest accepted request body (base64 uploads included).
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    serve(Arc::new(KnowledgeBase::new(config.clone())?)).await
}

/// Serve `kb` on the address from its configuration.
pub async fn serve(kb: Arc<KnowledgeBase>) -> anyhow::Result<()> {
    let bind_addr = kb.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "HTTP server listening");
    axum::serve(listener, router(kb)).await?;

    Ok(())
}

/// Build the application router around a shared knowledge base.
pub fn router(kb: Arc<KnowledgeBase>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/files", get(handle_files))
        .route("/delete", post(handle_delete))
        .route("/clear", post(handle_clear))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(kb)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<KbError> for AppError {
    fn from(err: KbError) -> Self {
        let (status, code) = match &err {
            KbError::InvalidOwner(_) | KbError::InvalidFilename(_) | KbError::LoadError { .. } => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            KbError::DocumentNotFound { .. } | KbError::IndexMissing(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            KbError::DuplicateDocument { .. } | KbError::FileExists(_) => {
                (StatusCode::CONFLICT, "conflict")
            }
            KbError::UnsupportedFormat(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            KbError::EmbeddingError(_) => (StatusCode::BAD_GATEWAY, "embedding_error"),
            KbError::GenerationError(_) => (StatusCode::BAD_GATEWAY, "generation_error"),
            KbError::CorruptIndex { .. }
            | KbError::CatalogWriteError(_)
            | KbError::Inconsistent { .. }
            | KbError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(code = err.error_code(), error = %err, "request failed");
        } else {
            tracing::debug!(code = err.error_code(), error = %err, "request rejected");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Owner extraction ============

/// The owner named by the `X-Owner` request header.
struct Owner(String);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| bad_request("missing X-Owner header"))?;
        let owner = value
            .to_str()
            .map_err(|_| bad_request("X-Owner header is not valid text"))?
            .trim();
        if owner.is_empty() {
            return Err(bad_request("X-Owner header is empty"));
        }
        Ok(Owner(owner.to_string()))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    detail: String,
    chunks: usize,
}

async fn handle_upload(
    State(kb): State<Arc<KnowledgeBase>>,
    Owner(owner): Owner,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;

    let status = kb.upload(&owner, &req.filename, &bytes).await?;
    Ok(Json(UploadResponse {
        success: true,
        detail: status.message(&owner),
        chunks: status.chunks(),
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
}

async fn handle_chat(
    State(kb): State<Arc<KnowledgeBase>>,
    Owner(owner): Owner,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let answer = kb.query(question, &owner, req.user_id.as_deref()).await?;
    Ok(Json(ChatResponse { answer }))
}

// ============ GET /files ============

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<FileRecord>,
}

async fn handle_files(
    State(kb): State<Arc<KnowledgeBase>>,
    Owner(owner): Owner,
) -> Result<Json<FilesResponse>, AppError> {
    let files = kb.list_files(&owner).await?;
    Ok(Json(FilesResponse { files }))
}

// ============ POST /delete ============

#[derive(Deserialize)]
struct DeleteRequest {
    file_name: String,
}

#[derive(Serialize)]
struct ResultResponse {
    result: String,
}

async fn handle_delete(
    State(kb): State<Arc<KnowledgeBase>>,
    Owner(owner): Owner,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<ResultResponse>, AppError> {
    let status = kb.delete(&req.file_name, &owner).await?;
    Ok(Json(ResultResponse {
        result: status.message(&owner),
    }))
}

// ============ POST /clear ============

#[derive(Deserialize)]
struct ClearRequest {
    #[serde(default)]
    user_id: Option<String>,
}

async fn handle_clear(
    State(kb): State<Arc<KnowledgeBase>>,
    Owner(owner): Owner,
    Json(req): Json<ClearRequest>,
) -> Result<Json<ResultResponse>, AppError> {
    if let Some(session) = req.user_id.as_deref() {
        tracing::debug!(owner = %owner, session, "clear requested");
    }
    let status = kb.clear_memory(&owner).await;
    Ok(Json(ResultResponse {
        result: status.message(&owner),
    }))
}
