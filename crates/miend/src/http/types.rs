use serde::{Deserialize, Serialize};

/// Body of `POST /register_patient`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub mrn: String,
    pub base64_image: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub mrn: String,
}

/// Body of `POST /search_patient`.
///
/// `strict` selects the authentication-style lookup where an unknown face is
/// an error; the legacy `is_search` name is accepted as an alias.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub base64_image: String,
    #[serde(default, alias = "is_search")]
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrn: Option<String>,
    /// Only present on a soft-mode miss.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NoMatchReason>,
}

impl SearchResponse {
    pub fn matched(mrn: String) -> Self {
        Self { matched: true, mrn: Some(mrn), reason: None }
    }

    pub fn no_match(reason: NoMatchReason) -> Self {
        Self { matched: false, mrn: None, reason: Some(reason) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The image contained no detectable face.
    NoFaceDetected,
    /// A face was present but nothing stored is close enough.
    NoSimilarFace,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}
