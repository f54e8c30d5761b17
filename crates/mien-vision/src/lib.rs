//! mien-vision — The embedding extractor behind the matching service.
//!
//! Wraps two ONNX Runtime sessions (a single-stage face detector and a
//! 128-d face embedder) plus the optional anti-spoofing classifier stack.
//! Inference runs on a dedicated OS thread owning the sessions; the rest of
//! the service talks to it through a clone-safe [`VisionHandle`].

pub mod detector;
pub mod embedder;
pub mod extractor;
pub mod liveness;

pub use detector::{BoundingBox, FaceDetector};
pub use embedder::FaceEmbedder;
pub use extractor::{spawn_vision, ExtractError, FaceEncoder, OrtFaceEncoder, VisionHandle};
pub use liveness::{LivenessScorer, LivenessVerdict};
