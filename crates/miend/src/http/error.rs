//! Boundary error type and its transport mapping.
//!
//! The engine and extractor report typed failures; this module owns the
//! policy of turning each kind into an HTTP status and a stable error code.
//! Conflict outcomes (duplicate key, face already registered, unknown
//! identity) must stay distinguishable from infrastructure faults, which
//! map to 5xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mien_core::EngineError;
use mien_vision::ExtractError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("no faces detected in the image")]
    NoFaceDetected,
    #[error("liveness check rejected the image")]
    LivenessRejected,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("image processing failed: {0}")]
    Extract(ExtractError),
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::InvalidImage(msg) => ApiError::BadRequest(msg),
            other => ApiError::Extract(other),
        }
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::LivenessRejected => StatusCode::FORBIDDEN,
            ApiError::Engine(e) => match e {
                EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                EngineError::DuplicateIdentityKey(_)
                | EngineError::FaceAlreadyRegistered(_)
                | EngineError::UnknownIdentity => StatusCode::CONFLICT,
                EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Extract(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "INVALID_INPUT",
            ApiError::NoFaceDetected => "NO_FACE_DETECTED",
            ApiError::LivenessRejected => "LIVENESS_REJECTED",
            ApiError::Engine(e) => match e {
                EngineError::InvalidInput(_) => "INVALID_INPUT",
                EngineError::DuplicateIdentityKey(_) => "DUPLICATE_IDENTITY_KEY",
                EngineError::FaceAlreadyRegistered(_) => "FACE_ALREADY_REGISTERED",
                EngineError::UnknownIdentity => "UNKNOWN_IDENTITY",
                EngineError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            },
            ApiError::Extract(_) => "EXTRACTION_FAILED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::StoreError;

    #[test]
    fn test_conflicts_are_distinguishable_from_infrastructure() {
        let dup = ApiError::Engine(EngineError::DuplicateIdentityKey("MRN-1".into()));
        let face = ApiError::Engine(EngineError::FaceAlreadyRegistered("MRN-1".into()));
        let down = ApiError::Engine(EngineError::StoreUnavailable(StoreError::unavailable(
            std::io::Error::new(std::io::ErrorKind::Other, "down"),
        )));

        assert_eq!(dup.status_code(), StatusCode::CONFLICT);
        assert_eq!(face.status_code(), StatusCode::CONFLICT);
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_ne!(dup.error_code(), face.error_code());
    }

    #[test]
    fn test_invalid_image_maps_to_bad_request() {
        let err: ApiError = ExtractError::InvalidImage("not an image".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_liveness_rejection_is_forbidden() {
        let err = ApiError::LivenessRejected;
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), "LIVENESS_REJECTED");
    }

    #[test]
    fn test_unknown_identity_is_conflict_not_server_error() {
        let err = ApiError::Engine(EngineError::UnknownIdentity);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "UNKNOWN_IDENTITY");
    }
}
