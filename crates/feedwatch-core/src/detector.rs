//! SCRFD face detector via ONNX Runtime.
//!
//! Implements SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) with 3-stride anchor-free decoding and NMS post-processing.
//! Input images are letterboxed into a 640×640 RGB tensor.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("SCRFD model missing at {0}; place det_10g.onnx in the model directory")]
    ModelNotFound(PathBuf),
    #[error("detection inference failed: {0}")]
    InferenceFailed(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when letterboxing, used to map detections back.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Positions of the (score, bbox, kps) outputs of one stride.
type StrideOutputs = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    input_size: usize,
    stride_indices: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.is_file() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 3 * SCRFD_STRIDES.len() {
            return Err(DetectorError::InferenceFailed(format!(
                "{} has {} outputs, want score/bbox/kps for each of 3 strides",
                model_path.display(),
                names.len()
            )));
        }

        let stride_indices = discover_output_indices(&names);
        tracing::info!(path = %model_path.display(), ?stride_indices, "loaded SCRFD model");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in an RGB image, returning boxes sorted by confidence.
    ///
    /// Box and landmark coordinates are in the source image's pixel space.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let (input, letterbox) = preprocess(image, self.input_size);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let level = StrideLevel {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(level.decode(self.input_size, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB image into a normalized NCHW tensor.
///
/// Padding uses the mean value so it normalizes to 0.0.
fn preprocess(image: &RgbImage, input_size: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), input_size);
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).max(1);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x;
        let ty = y as usize + pad_y;
        if tx >= input_size || ty >= input_size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map outputs named `score_8`, `bbox_16`, `kps_32`, ... to their positions.
///
/// Exports with other names are assumed to list scores, then bboxes, then
/// keypoints, each for strides 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named.and_then(|v| <[StrideOutputs; 3]>::try_from(v).ok()) {
        Some(indices) => indices,
        None => {
            tracing::debug!(?names, "unnamed SCRFD outputs, assuming positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw outputs of one stride level.
struct StrideLevel<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

impl StrideLevel<'_> {
    fn decode(&self, input_size: usize, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
        let grid = input_size / self.stride;
        let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let step = self.stride as f32;

        let mut detections = Vec::new();
        for idx in 0..num_anchors {
            let score = self.scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                continue;
            }

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * step;
            let anchor_y = (cell / grid) as f32 * step;

            let Some(d) = self.bboxes.get(idx * 4..idx * 4 + 4) else {
                continue;
            };
            let (x1, y1) = letterbox.to_source(anchor_x - d[0] * step, anchor_y - d[1] * step);
            let (x2, y2) = letterbox.to_source(anchor_x + d[2] * step, anchor_y + d[3] * step);

            let landmarks = self.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_source(anchor_x + k[i * 2] * step, anchor_y + k[i * 2 + 1] * step)
                })
            });

            detections.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            });
        }

        detections
    }
}

/// Greedy suppression of overlapping boxes, highest confidence first.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.iou(&det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}
