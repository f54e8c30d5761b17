use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use base64::Engine as _;
use mien_core::MatchOutcome;

use super::error::{ApiError, ApiResult};
use super::types::*;
use super::AppState;

/// `POST /register_patient` — enroll a new identity.
pub async fn register_patient(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let mrn = request.mrn.trim();
    if mrn.is_empty() {
        return Err(ApiError::BadRequest("mrn is required".into()));
    }

    let image = decode_image(&request.base64_image)?;
    check_liveness(&state, &image).await?;

    let embeddings = state.vision.embeddings(image).await?;
    // Multiple faces: only the first (most confident) is considered.
    let Some(embedding) = embeddings.first() else {
        return Err(ApiError::NoFaceDetected);
    };

    let enrolled = state.engine.enroll(mrn, embedding).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { mrn: enrolled.key })))
}

/// `POST /search_patient` — identify a face.
///
/// In strict mode an unknown face (or a faceless image) is a conflict; in
/// soft mode both are ordinary no-match responses.
pub async fn search_patient(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let image = decode_image(&request.base64_image)?;
    check_liveness(&state, &image).await?;

    let embeddings = state.vision.embeddings(image).await?;
    let Some(embedding) = embeddings.first() else {
        if request.strict {
            return Err(ApiError::NoFaceDetected);
        }
        return Ok(Json(SearchResponse::no_match(NoMatchReason::NoFaceDetected)));
    };

    match state.engine.identify(embedding, request.strict).await? {
        MatchOutcome::Match { key, distance } => {
            tracing::info!(mrn = %key, distance, "patient identified");
            Ok(Json(SearchResponse::matched(key)))
        }
        MatchOutcome::NoMatch => {
            Ok(Json(SearchResponse::no_match(NoMatchReason::NoSimilarFace)))
        }
    }
}

/// `GET /health` — liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "miend",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Decode the base64 image payload, rejecting empty or malformed input
/// before any inference or store work.
fn decode_image(base64_image: &str) -> Result<Vec<u8>, ApiError> {
    let trimmed = base64_image.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("base64 image data is required".into()));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|_| ApiError::BadRequest("invalid base64 image data".into()))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("image payload is empty".into()));
    }
    Ok(bytes)
}

/// Run the anti-spoofing gate when the daemon has it configured.
async fn check_liveness(state: &AppState, image: &[u8]) -> Result<(), ApiError> {
    if !state.vision.liveness_enabled() {
        return Ok(());
    }
    let verdict = state.vision.liveness(image.to_vec()).await?;
    if verdict.is_genuine() {
        Ok(())
    } else {
        tracing::warn!(class = verdict.class, "liveness check failed");
        Err(ApiError::LivenessRejected)
    }
}
