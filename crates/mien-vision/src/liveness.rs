//! Anti-spoofing (liveness) scoring.
//!
//! A directory of small 3-class classifier models is run over crops of the
//! detected face region; per-model softmax scores are summed and the arg-max
//! class is the verdict, with class 1 meaning a genuine face. The capability
//! is optional — the daemon only loads it when a model directory is
//! configured — and it never reaches the matching engine.
//!
//! Model files encode their input geometry in the file name:
//! `<scale>_<W>x<H>_<name>.onnx`, where `<scale>` is the crop expansion
//! factor around the detection box, or `org` for a whole-frame input.

use crate::detector::{BoundingBox, FaceDetector};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LIVENESS_CLASSES: usize = 3;
/// Class index reported for a genuine (live) face.
const GENUINE_CLASS: usize = 1;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("liveness model directory not found: {0}")]
    ModelDirNotFound(String),
    #[error("no .onnx models in liveness directory: {0}")]
    NoModels(String),
    #[error("unrecognized liveness model name: {0} (expected <scale>_<W>x<H>_<name>.onnx)")]
    UnrecognizedModelName(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Verdict of the summed classifier stack.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessVerdict {
    /// Arg-max class over the summed score vectors.
    pub class: usize,
    /// Summed softmax scores across all models.
    pub scores: [f32; LIVENESS_CLASSES],
}

impl LivenessVerdict {
    pub fn is_genuine(&self) -> bool {
        self.class == GENUINE_CLASS
    }
}

/// Input geometry parsed from a model file name.
#[derive(Debug, Clone, PartialEq)]
struct ModelSpec {
    /// Crop expansion factor around the detection box; `None` = whole frame.
    scale: Option<f32>,
    width: u32,
    height: u32,
}

struct LivenessModel {
    spec: ModelSpec,
    session: Session,
    name: String,
}

/// The anti-spoofing classifier stack.
///
/// Owns its own face detector instance so the capability stays
/// self-contained; the crop region comes from the most confident detection,
/// falling back to the whole frame when no face is found.
pub struct LivenessScorer {
    detector: FaceDetector,
    models: Vec<LivenessModel>,
}

impl LivenessScorer {
    /// Load every `.onnx` classifier in `model_dir`. Fails fast on an
    /// unreadable directory, an unrecognized model name, or an empty set.
    pub fn load(detector_path: &str, model_dir: &Path) -> Result<Self, LivenessError> {
        if !model_dir.is_dir() {
            return Err(LivenessError::ModelDirNotFound(model_dir.display().to_string()));
        }

        let detector = FaceDetector::load(detector_path)?;

        let mut models = Vec::new();
        let mut entries: Vec<_> =
            std::fs::read_dir(model_dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
                continue;
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let spec = parse_model_name(&name)
                .ok_or_else(|| LivenessError::UnrecognizedModelName(name.clone()))?;

            let session = Session::builder()?
                .with_intra_threads(1)?
                .commit_from_file(&path)?;

            tracing::info!(model = %name, ?spec, "loaded liveness model");
            models.push(LivenessModel { spec, session, name });
        }

        if models.is_empty() {
            return Err(LivenessError::NoModels(model_dir.display().to_string()));
        }

        Ok(Self { detector, models })
    }

    /// Score an RGB frame: sum per-model softmax outputs, arg-max the total.
    pub fn verdict(&mut self, frame: &RgbImage) -> Result<LivenessVerdict, LivenessError> {
        let faces = self.detector.detect(frame)?;
        let face = faces
            .first()
            .cloned()
            .unwrap_or_else(|| BoundingBox::full_frame(frame.width(), frame.height()));

        let mut total = [0.0f32; LIVENESS_CLASSES];
        for model in &mut self.models {
            let crop = scaled_crop(frame, &face, &model.spec);
            let input = preprocess(&crop);

            let outputs =
                model.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, logits) = outputs[0].try_extract_tensor::<f32>().map_err(|e| {
                LivenessError::InferenceFailed(format!("{}: {e}", model.name))
            })?;
            if logits.len() != LIVENESS_CLASSES {
                return Err(LivenessError::InferenceFailed(format!(
                    "{}: expected {LIVENESS_CLASSES} classes, got {}",
                    model.name,
                    logits.len()
                )));
            }

            let scores = softmax3([logits[0], logits[1], logits[2]]);
            for (t, s) in total.iter_mut().zip(scores) {
                *t += s;
            }
        }

        let class = argmax3(&total);
        tracing::debug!(?total, class, "liveness verdict");
        Ok(LivenessVerdict { class, scores: total })
    }
}

/// Parse `<scale>_<W>x<H>_<name>.onnx`; `org` scale means whole-frame input.
fn parse_model_name(name: &str) -> Option<ModelSpec> {
    let stem = name.strip_suffix(".onnx")?;
    let mut parts = stem.splitn(3, '_');

    let scale_part = parts.next()?;
    let dims_part = parts.next()?;
    parts.next()?; // model name, unused

    let scale = if scale_part == "org" { None } else { Some(scale_part.parse::<f32>().ok()?) };

    let (w, h) = dims_part.split_once('x')?;
    Some(ModelSpec { scale, width: w.parse().ok()?, height: h.parse().ok()? })
}

/// Crop the detection box expanded by `spec.scale` around its center,
/// clamped to the frame, resized to the model input. A `None` scale takes
/// the whole frame.
fn scaled_crop(frame: &RgbImage, face: &BoundingBox, spec: &ModelSpec) -> RgbImage {
    let region = match spec.scale {
        None => BoundingBox::full_frame(frame.width(), frame.height()),
        Some(scale) => {
            let cx = face.x + face.width / 2.0;
            let cy = face.y + face.height / 2.0;
            let w = (face.width * scale).min(frame.width() as f32);
            let h = (face.height * scale).min(frame.height() as f32);
            let x = (cx - w / 2.0).clamp(0.0, frame.width() as f32 - w);
            let y = (cy - h / 2.0).clamp(0.0, frame.height() as f32 - h);
            BoundingBox { x, y, width: w, height: h, confidence: face.confidence }
        }
    };

    let crop = image::imageops::crop_imm(
        frame,
        region.x as u32,
        region.y as u32,
        (region.width as u32).max(1),
        (region.height as u32).max(1),
    )
    .to_image();
    image::imageops::resize(&crop, spec.width, spec.height, image::imageops::FilterType::Triangle)
}

/// Scale pixels to [0, 1] in an NCHW float tensor.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

fn softmax3(logits: [f32; LIVENESS_CLASSES]) -> [f32; LIVENESS_CLASSES] {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    [exp[0] / sum, exp[1] / sum, exp[2] / sum]
}

fn argmax3(scores: &[f32; LIVENESS_CLASSES]) -> usize {
    let mut best = 0;
    for i in 1..LIVENESS_CLASSES {
        if scores[i] > scores[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_name_scaled() {
        let spec = parse_model_name("2.7_80x80_MiniFASNetV2.onnx").unwrap();
        assert_eq!(spec, ModelSpec { scale: Some(2.7), width: 80, height: 80 });
    }

    #[test]
    fn test_parse_model_name_whole_frame() {
        let spec = parse_model_name("org_128x96_MiniFASNetV1SE.onnx").unwrap();
        assert_eq!(spec, ModelSpec { scale: None, width: 128, height: 96 });
    }

    #[test]
    fn test_parse_model_name_rejects_garbage() {
        assert!(parse_model_name("model.onnx").is_none());
        assert!(parse_model_name("2.7_80x80_MiniFASNetV2.bin").is_none());
        assert!(parse_model_name("abc_80x80_Net.onnx").is_none());
        assert!(parse_model_name("2.7_eightyx80_Net.onnx").is_none());
    }

    #[test]
    fn test_softmax_sums_to_one_and_preserves_order() {
        let s = softmax3([1.0, 3.0, 2.0]);
        let sum: f32 = s.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(s[1] > s[2] && s[2] > s[0]);
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let s = softmax3([1000.0, 1001.0, 999.0]);
        assert!(s.iter().all(|v| v.is_finite()));
        assert!((s.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax3(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax3(&[0.9, 0.05, 0.05]), 0);
        assert_eq!(argmax3(&[0.1, 0.2, 0.7]), 2);
    }

    #[test]
    fn test_verdict_genuine_class() {
        let genuine = LivenessVerdict { class: 1, scores: [0.1, 2.5, 0.4] };
        assert!(genuine.is_genuine());
        let spoof = LivenessVerdict { class: 0, scores: [2.0, 0.5, 0.5] };
        assert!(!spoof.is_genuine());
    }

    #[test]
    fn test_scaled_crop_respects_model_input_size() {
        let frame = RgbImage::new(320, 240);
        let face = BoundingBox { x: 100.0, y: 80.0, width: 60.0, height: 60.0, confidence: 0.9 };
        let spec = ModelSpec { scale: Some(2.7), width: 80, height: 80 };
        let crop = scaled_crop(&frame, &face, &spec);
        assert_eq!((crop.width(), crop.height()), (80, 80));
    }

    #[test]
    fn test_scaled_crop_clamps_near_edges() {
        let frame = RgbImage::new(100, 100);
        let face = BoundingBox { x: 0.0, y: 0.0, width: 90.0, height: 90.0, confidence: 0.9 };
        // Scale pushes the region past the frame; it must clamp, not panic.
        let spec = ModelSpec { scale: Some(4.0), width: 64, height: 64 };
        let crop = scaled_crop(&frame, &face, &spec);
        assert_eq!((crop.width(), crop.height()), (64, 64));
    }

    #[test]
    fn test_scaled_crop_whole_frame() {
        let frame = RgbImage::new(50, 40);
        let face = BoundingBox { x: 10.0, y: 10.0, width: 5.0, height: 5.0, confidence: 0.9 };
        let spec = ModelSpec { scale: None, width: 32, height: 32 };
        let crop = scaled_crop(&frame, &face, &spec);
        assert_eq!((crop.width(), crop.height()), (32, 32));
    }
}
