//! Image-to-embeddings pipeline and the vision thread.
//!
//! The ONNX sessions need `&mut self` and are not shared across threads.
//! A single dedicated OS thread owns them; HTTP handlers send requests over
//! an mpsc channel and await the oneshot reply through [`VisionHandle`].

use crate::detector::FaceDetector;
use crate::embedder::FaceEmbedder;
use crate::liveness::{LivenessScorer, LivenessVerdict};
use image::RgbImage;
use mien_core::Embedding;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Images are downscaled until neither side exceeds this before detection.
pub const MAX_IMAGE_SIDE: u32 = 500;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("invalid image payload: {0}")]
    InvalidImage(String),
    #[error("detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] crate::embedder::EmbedderError),
    #[error("liveness error: {0}")]
    Liveness(#[from] crate::liveness::LivenessError),
    #[error("liveness models are not configured")]
    LivenessUnavailable,
    #[error("vision thread exited")]
    ChannelClosed,
}

/// Turns an encoded image into an ordered sequence of face embeddings.
///
/// Zero faces is a legitimate empty result, not an error — whether that is a
/// failure depends on the caller's mode and is decided at the boundary.
pub trait FaceEncoder: Send {
    fn encode(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError>;
}

/// Production encoder: detector + embedder ONNX sessions.
pub struct OrtFaceEncoder {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OrtFaceEncoder {
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path)?;
        Ok(Self { detector, embedder })
    }
}

impl FaceEncoder for OrtFaceEncoder {
    fn encode(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
        let rgb = decode_rgb(image, MAX_IMAGE_SIDE)?;
        let faces = self.detector.detect(&rgb)?;
        tracing::debug!(faces = faces.len(), "face detection complete");

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            embeddings.push(self.embedder.embed(&rgb, face)?);
        }
        Ok(embeddings)
    }
}

/// Decode an encoded image into RGB, downscaling so neither side exceeds
/// `max_side`. Aspect ratio is preserved; small images are left alone.
pub fn decode_rgb(image: &[u8], max_side: u32) -> Result<RgbImage, ExtractError> {
    let decoded = image::load_from_memory(image)
        .map_err(|e| ExtractError::InvalidImage(e.to_string()))?;

    let decoded = if decoded.width() > max_side || decoded.height() > max_side {
        decoded.resize(max_side, max_side, image::imageops::FilterType::Lanczos3)
    } else {
        decoded
    };

    Ok(decoded.to_rgb8())
}

enum VisionRequest {
    Encode {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Embedding>, ExtractError>>,
    },
    Liveness {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<LivenessVerdict, ExtractError>>,
    },
}

/// Clone-safe handle to the vision thread.
#[derive(Clone)]
pub struct VisionHandle {
    tx: mpsc::Sender<VisionRequest>,
    liveness_enabled: bool,
}

impl VisionHandle {
    /// Extract the ordered face embeddings from an encoded image.
    pub async fn embeddings(&self, image: Vec<u8>) -> Result<Vec<Embedding>, ExtractError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::Encode { image, reply: reply_tx })
            .await
            .map_err(|_| ExtractError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ExtractError::ChannelClosed)?
    }

    /// Run the anti-spoofing stack on an encoded image.
    ///
    /// Fails with [`ExtractError::LivenessUnavailable`] when the daemon was
    /// started without liveness models.
    pub async fn liveness(&self, image: Vec<u8>) -> Result<LivenessVerdict, ExtractError> {
        if !self.liveness_enabled {
            return Err(ExtractError::LivenessUnavailable);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(VisionRequest::Liveness { image, reply: reply_tx })
            .await
            .map_err(|_| ExtractError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ExtractError::ChannelClosed)?
    }

    pub fn liveness_enabled(&self) -> bool {
        self.liveness_enabled
    }
}

/// Spawn the vision thread and hand back its request handle.
///
/// The encoder (and optional liveness scorer) must already be loaded —
/// model loading fails fast at startup, not on the first request.
pub fn spawn_vision(
    mut encoder: impl FaceEncoder + 'static,
    mut scorer: Option<LivenessScorer>,
) -> VisionHandle {
    let (tx, mut rx) = mpsc::channel::<VisionRequest>(8);
    let liveness_enabled = scorer.is_some();

    std::thread::Builder::new()
        .name("mien-vision".into())
        .spawn(move || {
            tracing::info!(liveness = liveness_enabled, "vision thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    VisionRequest::Encode { image, reply } => {
                        let _ = reply.send(encoder.encode(&image));
                    }
                    VisionRequest::Liveness { image, reply } => {
                        let result = match scorer.as_mut() {
                            Some(scorer) => decode_rgb(&image, MAX_IMAGE_SIDE)
                                .and_then(|rgb| scorer.verdict(&rgb).map_err(Into::into)),
                            None => Err(ExtractError::LivenessUnavailable),
                        };
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("vision thread exiting");
        })
        .expect("failed to spawn vision thread");

    VisionHandle { tx, liveness_enabled }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::EMBEDDING_DIM;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([10, 120, 240]),
        ));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    struct StubEncoder;

    impl FaceEncoder for StubEncoder {
        fn encode(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
            if image.is_empty() {
                return Err(ExtractError::InvalidImage("empty payload".into()));
            }
            Ok(vec![Embedding::new(vec![1.0; EMBEDDING_DIM])])
        }
    }

    #[test]
    fn test_decode_rgb_small_image_untouched() {
        let bytes = png_bytes(100, 60);
        let rgb = decode_rgb(&bytes, MAX_IMAGE_SIDE).unwrap();
        assert_eq!((rgb.width(), rgb.height()), (100, 60));
    }

    #[test]
    fn test_decode_rgb_downscales_large_image() {
        let bytes = png_bytes(1000, 500);
        let rgb = decode_rgb(&bytes, MAX_IMAGE_SIDE).unwrap();
        assert!(rgb.width() <= MAX_IMAGE_SIDE && rgb.height() <= MAX_IMAGE_SIDE);
        // Aspect ratio preserved: 2:1.
        assert_eq!(rgb.width(), 500);
        assert_eq!(rgb.height(), 250);
    }

    #[test]
    fn test_decode_rgb_rejects_garbage() {
        let err = decode_rgb(b"definitely not an image", MAX_IMAGE_SIDE).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_handle_round_trip_with_stub() {
        let handle = spawn_vision(StubEncoder, None);
        let embeddings = handle.embeddings(png_bytes(10, 10)).await.unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn test_handle_propagates_encoder_error() {
        let handle = spawn_vision(StubEncoder, None);
        let err = handle.embeddings(Vec::new()).await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_liveness_unavailable_without_models() {
        let handle = spawn_vision(StubEncoder, None);
        assert!(!handle.liveness_enabled());
        let err = handle.liveness(png_bytes(10, 10)).await.unwrap_err();
        assert!(matches!(err, ExtractError::LivenessUnavailable));
    }
}
