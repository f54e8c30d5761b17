//! 128-d face embedder via ONNX Runtime.
//!
//! Takes a detected face region, crops it with margin, resizes to the fixed
//! 150×150 network input and runs the embedding model. The raw embedding is
//! returned unnormalized — L2 normalization is the matching engine's
//! invariant, enforced there.

use crate::detector::BoundingBox;
use image::RgbImage;
use mien_core::{Embedding, EMBEDDING_DIM};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBEDDER_INPUT_SIZE: u32 = 150;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;
/// Context kept around the detection box, as a fraction of box size per side.
const CROP_MARGIN: f32 = 0.25;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedder model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded face embedder");

        Ok(Self { session })
    }

    /// Extract a raw 128-d embedding for one detected face.
    pub fn embed(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let crop = crop_with_margin(frame, face);
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if data.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                data.len()
            )));
        }

        Ok(Embedding::new(data.to_vec()))
    }
}

/// Crop the face region expanded by [`CROP_MARGIN`] on each side, clamped to
/// the frame, and resize to the network input size.
fn crop_with_margin(frame: &RgbImage, face: &BoundingBox) -> RgbImage {
    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;

    let x1 = (face.x - margin_x).clamp(0.0, frame.width() as f32 - 1.0) as u32;
    let y1 = (face.y - margin_y).clamp(0.0, frame.height() as f32 - 1.0) as u32;
    let x2 = (face.x + face.width + margin_x).min(frame.width() as f32) as u32;
    let y2 = (face.y + face.height + margin_y).min(frame.height() as f32) as u32;

    let w = (x2 - x1).max(1);
    let h = (y2 - y1).max(1);

    let crop = image::imageops::crop_imm(frame, x1, y1, w, h).to_image();
    image::imageops::resize(
        &crop,
        EMBEDDER_INPUT_SIZE,
        EMBEDDER_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    )
}

/// Normalize a 150×150 RGB crop into an NCHW float tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = EMBEDDER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
        }
    }
    tensor
}
