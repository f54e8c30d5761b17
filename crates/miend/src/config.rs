use mien_core::MatchThresholds;
use std::path::PathBuf;

/// Daemon configuration, loaded once at startup from environment variables
/// and passed by reference into the store and state constructors. No
/// ambient global.
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the detector and embedder ONNX files.
    pub model_dir: PathBuf,
    /// Directory of anti-spoofing classifier models. Unset = liveness off.
    pub liveness_model_dir: Option<PathBuf>,
    /// Pre-filter radius for the similarity store query.
    pub candidate_threshold: f32,
    /// Accept boundary for a nearest-neighbor match.
    pub accept_threshold: f32,
    /// Maximum accepted HTTP request body, in bytes. Image payloads arrive
    /// base64-encoded, so this caps roughly 3/4 of that in pixels.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `MIEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let thresholds = MatchThresholds::default();

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("mien");

        let db_path = std::env::var("MIEN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("identities.db"));

        let model_dir = std::env::var("MIEN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            bind_addr: std::env::var("MIEN_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:7600".to_string()),
            db_path,
            model_dir,
            liveness_model_dir: std::env::var("MIEN_LIVENESS_MODEL_DIR").ok().map(PathBuf::from),
            candidate_threshold: env_f32("MIEN_CANDIDATE_THRESHOLD", thresholds.candidate),
            accept_threshold: env_f32("MIEN_ACCEPT_THRESHOLD", thresholds.accept),
            max_body_bytes: env_usize("MIEN_MAX_BODY_BYTES", 10 * 1024 * 1024),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir.join("face_detector.onnx").to_string_lossy().into_owned()
    }

    /// Path to the 128-d face embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir.join("face_embedder.onnx").to_string_lossy().into_owned()
    }

    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds { candidate: self.candidate_threshold, accept: self.accept_threshold }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
