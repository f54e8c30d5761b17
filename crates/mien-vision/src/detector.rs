//! Single-stage face detector via ONNX Runtime.
//!
//! Expects an UltraFace-style model: fixed 320×240 RGB input, two output
//! tensors — per-anchor class scores `[1, N, 2]` and corner-form boxes
//! `[1, N, 4]` normalized to [0, 1]. Post-processing is a confidence filter
//! followed by IoU NMS.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_WIDTH: u32 = 320;
const DETECTOR_INPUT_HEIGHT: u32 = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Bounding box for a detected face, in original-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// A box covering the whole frame, used when a caller needs a crop
    /// region but no face was located.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self { x: 0.0, y: 0.0, width: width as f32, height: height as f32, confidence: 0.0 }
    }
}

pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the detector ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detector"
        );

        Ok(Self { session })
    }

    /// Detect faces in an RGB image, returning boxes ordered by confidence.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = preprocess(frame);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let detections = decode_detections(
            scores,
            boxes,
            DETECTOR_CONFIDENCE_THRESHOLD,
            frame.width() as f32,
            frame.height() as f32,
        );

        Ok(nms(detections, DETECTOR_NMS_THRESHOLD))
    }
}

/// Resize to the fixed network input and normalize into an NCHW tensor.
fn preprocess(frame: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        frame,
        DETECTOR_INPUT_WIDTH,
        DETECTOR_INPUT_HEIGHT,
        image::imageops::FilterType::Triangle,
    );

    let mut tensor =
        Array4::<f32>::zeros((1, 3, DETECTOR_INPUT_HEIGHT as usize, DETECTOR_INPUT_WIDTH as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
        }
    }
    tensor
}

/// Decode raw network output into pixel-space boxes above the confidence
/// threshold. `scores` is flattened `[N, 2]` (background, face); `boxes` is
/// flattened `[N, 4]` corner form normalized to [0, 1].
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    threshold: f32,
    frame_width: f32,
    frame_height: f32,
) -> Vec<BoundingBox> {
    let anchors = scores.len() / 2;
    let mut detections = Vec::new();

    for i in 0..anchors {
        let confidence = scores[i * 2 + 1];
        if confidence <= threshold {
            continue;
        }
        let off = i * 4;
        if off + 3 >= boxes.len() {
            break;
        }
        let x1 = (boxes[off] * frame_width).clamp(0.0, frame_width);
        let y1 = (boxes[off + 1] * frame_height).clamp(0.0, frame_height);
        let x2 = (boxes[off + 2] * frame_width).clamp(0.0, frame_width);
        let y2 = (boxes[off + 3] * frame_height).clamp(0.0, frame_height);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    detections
}

/// Non-maximum suppression, highest confidence first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    'candidates: for det in detections {
        for kept in &keep {
            if iou(kept, &det) > iou_threshold {
                continue 'candidates;
            }
        }
        keep.push(det);
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}
