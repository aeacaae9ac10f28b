//! HTTP boundary.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/compare-image-with-all` | Compare an uploaded image with candidate images |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The compare endpoint takes a multipart form with a `file` part (the query
//! image) and an `imageUrls` part holding a JSON array of candidate
//! locators. It answers `200` with one entry per candidate, in request
//! order, even when some candidates failed; those entries carry a `code` and
//! `message` instead of scores.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "No file uploaded" } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_image` (422), `internal` (500).

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::batch::{BatchComparator, BatchResult, CancelHandle, CompareError};
use crate::core::fetch::CandidateRef;
use crate::core::image::{decode_bytes, ImageError};

#[derive(Clone)]
struct AppState {
    comparator: Arc<BatchComparator>,
    allow_local_candidates: bool,
}

/// Builds the router; split out of [`run_server`] so tests can serve it on
/// an ephemeral port.
pub fn router(comparator: Arc<BatchComparator>, config: &ServerConfig) -> Router {
    let state = AppState {
        comparator,
        allow_local_candidates: config.allow_local_candidates,
    };

    Router::new()
        .route("/api/compare-image-with-all", post(handle_compare))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(state)
}

/// Serves until the process is terminated.
pub async fn run_server(comparator: Arc<BatchComparator>, config: &ServerConfig) -> anyhow::Result<()> {
    let app = router(comparator, config);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<ImageError> for AppError {
    fn from(err: ImageError) -> Self {
        AppError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "invalid_image",
            message: format!("Uploaded image could not be read: {}", err),
        }
    }
}

impl From<CompareError> for AppError {
    fn from(err: CompareError) -> Self {
        match err {
            CompareError::InvalidQuery(e) => e.into(),
        }
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

// ============ POST /api/compare-image-with-all ============

async fn handle_compare(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchResult>, AppError> {
    let mut file = None;
    let mut image_urls = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read file: {}", e)))?;
                file = Some(bytes);
            }
            Some("imageUrls") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read imageUrls: {}", e)))?;
                image_urls = Some(text);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| bad_request("No file uploaded"))?;
    if file.is_empty() {
        return Err(bad_request("No file provided"));
    }
    let image_urls = image_urls.ok_or_else(|| bad_request("No image URLs provided"))?;
    let candidates = parse_candidates(&image_urls, state.allow_local_candidates)?;

    let query = tokio::task::spawn_blocking(move || decode_bytes(&file))
        .await
        .map_err(|e| internal(e.to_string()))??;

    // Dropped with this future if the client disconnects
    let cancel = CancelHandle::new();
    let _guard = cancel.drop_guard();

    log::info!("Comparing upload against {} candidates", candidates.len());
    let batch = state
        .comparator
        .compare_all(Arc::new(query), &candidates, &cancel)
        .await?;

    Ok(Json(batch))
}

fn parse_candidates(raw: &str, allow_local: bool) -> Result<Vec<CandidateRef>, AppError> {
    let locators: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| bad_request(format!("imageUrls must be a JSON array of strings: {}", e)))?;

    let candidates: Vec<CandidateRef> = locators.iter().map(|s| CandidateRef::parse(s)).collect();
    if !allow_local {
        if let Some(local) = candidates.iter().find(|c| !c.is_remote()) {
            return Err(bad_request(format!(
                "Only http(s) candidate URLs are accepted, got: {}",
                local
            )));
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidates_accepts_urls() {
        let candidates = parse_candidates(
            r#"["https://example.com/a.jpg", "http://example.com/b.png"]"#,
            false,
        )
        .unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.is_remote()));
    }

    #[test]
    fn test_parse_candidates_rejects_malformed_json() {
        let err = parse_candidates("https://example.com/a.jpg", false).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = parse_candidates(r#"{"url": "x"}"#, false).unwrap_err();
        assert_eq!(err.code, "bad_request");
    }

    #[test]
    fn test_parse_candidates_local_paths_gated() {
        let raw = r#"["https://example.com/a.jpg", "/etc/passwd"]"#;
        assert!(parse_candidates(raw, false).is_err());
        assert_eq!(parse_candidates(raw, true).unwrap().len(), 2);
    }

    #[test]
    fn test_image_error_maps_to_422() {
        let err: AppError = ImageError::InvalidImage {
            reason: "empty".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "invalid_image");
    }
}
