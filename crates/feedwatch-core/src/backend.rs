//! Face backend seam: detection plus embedding behind one trait.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding, DEFAULT_SIMILARITY_THRESHOLD};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects faces and computes identity embeddings.
///
/// Images are always 3-channel RGB.
pub trait FaceBackend {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FaceError>;

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, FaceError>;

    /// Similarity at or above which two embeddings are the same identity.
    fn threshold(&self) -> f32 {
        DEFAULT_SIMILARITY_THRESHOLD
    }

    /// Detect every face, then embed each one, preserving detection order.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, FaceError> {
        let faces = self.detect(image)?;
        let mut encoded = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = self.embed(image, &face)?;
            encoded.push((face, embedding));
        }
        Ok(encoded)
    }
}

/// Locations of the SCRFD and ArcFace model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(model_dir: &Path) -> Self {
        Self {
            detector: model_dir.join(DETECTOR_MODEL_FILE),
            recognizer: model_dir.join(RECOGNIZER_MODEL_FILE),
        }
    }
}

/// Default model directory: `$FEEDWATCH_MODEL_DIR`, else
/// `$XDG_DATA_HOME/feedwatch/models`, else `~/.local/share/feedwatch/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FEEDWATCH_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("feedwatch")
        .join("models")
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxBackend {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    threshold: f32,
}

impl OnnxBackend {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(paths: &ModelPaths, threshold: f32) -> Result<Self, FaceError> {
        let detector = FaceDetector::load(&paths.detector)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer)?;
        tracing::info!(threshold, "face backend ready");
        Ok(Self { detector, recognizer, threshold })
    }
}

impl FaceBackend for OnnxBackend {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FaceError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, FaceError> {
        Ok(self.recognizer.extract(image, face)?)
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }
}
