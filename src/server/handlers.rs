use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::GenerationError,
    generate::{AudioMeta, GeneratedAudio, MultiRequest, SingleRequest},
    manager::ModelStatus,
    server::state::AppState,
};

/// Custom response header names (lowercase, as `HeaderName` requires).
pub mod headers {
    pub const TOTAL_CHUNKS: &str = "x-total-chunks";
    pub const CURRENT_CHUNK: &str = "x-current-chunk";
    pub const SESSION_ID: &str = "x-session-id";
    pub const MODE: &str = "x-mode";
    pub const SEGMENT_COUNT: &str = "x-segment-count";
}

/// nginx's "client closed request".
const CLIENT_CLOSED_REQUEST: u16 = 499;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

pub struct ApiError(GenerationError);

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
            GenerationError::Cancelled => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
            }
            GenerationError::Resource(_) => StatusCode::SERVICE_UNAVAILABLE,
            GenerationError::Unexpected(err) => {
                tracing::error!(error = %format!("{err:#}"), "generation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}

/// Run blocking synthesis off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, GenerationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GenerationError::Unexpected(anyhow::Error::new(e)))?
        .map_err(ApiError)
}

fn audio_response(audio: GeneratedAudio) -> Result<Response, ApiError> {
    let mut map = HeaderMap::new();
    map.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/wav"));
    map.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    let session = HeaderValue::try_from(audio.session_id.as_str())
        .map_err(|e| GenerationError::Unexpected(anyhow::Error::new(e)))?;
    map.insert(HeaderName::from_static(headers::SESSION_ID), session);

    match audio.meta {
        AudioMeta::Single { total_chunks, current_chunk } => {
            map.insert(HeaderName::from_static(headers::TOTAL_CHUNKS), total_chunks.into());
            map.insert(HeaderName::from_static(headers::CURRENT_CHUNK), current_chunk.into());
        }
        AudioMeta::Multi { segment_count } => {
            map.insert(HeaderName::from_static(headers::MODE), HeaderValue::from_static("multi"));
            map.insert(HeaderName::from_static(headers::SEGMENT_COUNT), segment_count.into());
        }
    }
    Ok((StatusCode::OK, map, Body::from(audio.wav)).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<SingleRequest>,
) -> Result<Response, ApiError> {
    let generator = state.generator.clone();
    let audio = blocking(move || generator.generate_single(&req)).await?;
    audio_response(audio)
}

pub async fn generate_multi(
    State(state): State<AppState>,
    Json(req): Json<MultiRequest>,
) -> Result<Response, ApiError> {
    let generator = state.generator.clone();
    let audio = blocking(move || generator.generate_multi(&req)).await?;
    audio_response(audio)
}

#[derive(Deserialize)]
pub struct StopRequest {
    session_id: String,
}

#[derive(Serialize)]
pub struct StopResponse {
    message: &'static str,
    session_id: String,
}

pub async fn stop_generation(
    State(state): State<AppState>,
    Json(req): Json<StopRequest>,
) -> Json<StopResponse> {
    let message = if state.generator.stop(&req.session_id) {
        "Generation stopped successfully"
    } else {
        "No active generation found for this session"
    };
    Json(StopResponse { message, session_id: req.session_id })
}

pub async fn model_status(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(state.generator.models().status())
}

pub async fn model_unload(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let models = state.generator.models().clone();
    blocking(move || {
        models.force_unload();
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "Model unloaded successfully" })))
}

#[derive(Deserialize)]
pub struct TimeoutRequest {
    timeout: u64,
}

pub async fn model_timeout(
    State(state): State<AppState>,
    Json(req): Json<TimeoutRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .generator
        .models()
        .update_timeout(req.timeout)
        .map_err(GenerationError::from)?;
    Ok(Json(json!({
        "message": format!("Timeout updated to {} seconds", req.timeout),
        "timeout": req.timeout,
    })))
}
