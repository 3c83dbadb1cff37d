//! HTTP surface: settings, questions, document listing and uploads.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use ragdoc_core::config::Config;
use ragdoc_core::Error;
use ragdoc_pipeline::{Pipeline, UploadOutcome};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// A pipeline error rendered as `{"error": ...}` with a matching status.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) | Error::Superseded => StatusCode::CONFLICT,
        Error::InvalidConfig(_) | Error::TemplateError(_) => StatusCode::BAD_REQUEST,
        Error::ContextOverflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ProtocolMismatch(_) => StatusCode::BAD_GATEWAY,
        Error::DimensionMismatch { .. } | Error::Io(_) | Error::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(Error::InvalidConfig(message.into()))
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/documents", get(documents))
        .route("/settings", get(get_settings).post(post_settings))
        .route("/ask", post(ask))
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(pipeline)
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    pipeline: Arc<Pipeline>,
    bind: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");
    axum::serve(listener, router(pipeline)).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "endpoints": {
            "GET /health": "readiness and snapshot version",
            "GET /documents": "list ingested document files",
            "GET /settings": "current configuration (credentials redacted)",
            "POST /settings": "replace the configuration",
            "POST /ask": "answer a question: {\"question\": \"...\"}",
            "POST /upload": "multipart upload with `file` and `filename` fields",
        }
    }))
}

async fn health(State(pipeline): State<Arc<Pipeline>>) -> Json<serde_json::Value> {
    let status = pipeline.status();
    Json(json!({
        "status": "ok",
        "version": status.version,
        "ready": status.ready,
        "rebuilding": status.rebuilding,
        "chunks": status.chunks,
    }))
}

async fn documents(State(pipeline): State<Arc<Pipeline>>) -> Result<Json<serde_json::Value>, ApiError> {
    let files = pipeline.list_documents()?;
    Ok(Json(json!({ "files": files })))
}

async fn get_settings(State(pipeline): State<Arc<Pipeline>>) -> Json<Config> {
    Json(pipeline.config().redacted())
}

async fn post_settings(
    State(pipeline): State<Arc<Pipeline>>,
    Json(new): Json<Config>,
) -> Result<Json<Config>, ApiError> {
    let new = new.restore_redacted(&pipeline.config());
    let applied = pipeline.set_config(new).await?;
    Ok(Json(applied.redacted()))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn ask(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let answer = pipeline.ask(&request.question).await?;
    Ok(Json(json!({ "response": answer.response, "truncated": answer.truncated })))
}

async fn upload(
    State(pipeline): State<Arc<Pipeline>>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, ApiError> {
    let mut filename: Option<String> = None;
    let mut data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("filename") => {
                filename = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            Some("file") => {
                let fallback = field.file_name().map(|n| n.to_string());
                data = Some(field.bytes().await.map_err(|e| bad_request(e.to_string()))?);
                if filename.is_none() {
                    filename = fallback;
                }
            }
            _ => {}
        }
    }
    let data = data.ok_or_else(|| bad_request("missing `file` field"))?;
    let filename = filename.ok_or_else(|| bad_request("missing `filename` field"))?;
    let outcome = pipeline.add_document(&filename, &data).await?;
    Ok(Json(outcome))
}
