//! feedwatch-core — Face detection, recognition and gallery matching.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference. Images are handled
//! as 3-channel RGB buffers; alpha is dropped at decode time.

pub mod alignment;
pub mod annotate;
pub mod backend;
pub mod detector;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use backend::{default_model_dir, FaceBackend, FaceError, ModelPaths, OnnxBackend};
pub use detector::FaceDetector;
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use recognizer::FaceRecognizer;
pub use types::{
    BoundingBox, CosineMatcher, Embedding, FaceMatch, Identity, Matcher,
    DEFAULT_SIMILARITY_THRESHOLD,
};

/// Decode encoded image bytes into an RGB buffer, dropping any alpha channel.
///
/// The detector and recognizer expect exactly three channels.
pub fn decode_rgb(bytes: &[u8]) -> Result<image::RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
