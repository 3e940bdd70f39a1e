use serde::{Deserialize, Serialize};
use std::fmt;

use crate::gallery::GalleryEntry;

/// Cosine similarity at or above which a query counts as the same person.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let inter_h = ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.width * self.height + other.width * other.height - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle `(x0, y0, x1, y1)` clamped to a `width`×`height` image.
    ///
    /// Returns `None` when the box lies entirely outside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let max_x = (width - 1) as f32;
        let max_y = (height - 1) as f32;
        let x0 = self.x.round().clamp(0.0, max_x);
        let y0 = self.y.round().clamp(0.0, max_y);
        let x1 = (self.x + self.width).round().clamp(0.0, max_x);
        let y1 = (self.y + self.height).round().clamp(0.0, max_y);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

/// Face embedding vector (typically 512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Identity assigned to a detected face.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// Matched the gallery entry with this label.
    Known(String),
    /// Matched no gallery entry.
    Unknown,
}

impl Identity {
    pub const UNKNOWN_LABEL: &'static str = "unknown";

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn label(&self) -> &str {
        match self {
            Identity::Known(label) => label,
            Identity::Unknown => Self::UNKNOWN_LABEL,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One identity decision for a query face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub identity: Identity,
    /// Cosine similarity to the matched entry, or the best similarity seen
    /// for an `Unknown` result (0.0 against an empty gallery).
    pub similarity: f32,
}

/// Strategy for comparing a query embedding against a gallery of reference faces.
pub trait Matcher {
    /// Returns one `FaceMatch` per gallery entry at or above `threshold`, in
    /// gallery order, or a single `Unknown` when nothing matches.
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> Vec<FaceMatch>;
}

/// Cosine similarity matcher that reports every matching gallery entry.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> Vec<FaceMatch> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut matches = Vec::new();

        for entry in gallery {
            let sim = query.similarity(&entry.embedding);
            best_sim = best_sim.max(sim);
            if sim >= threshold {
                matches.push(FaceMatch {
                    identity: Identity::Known(entry.label.clone()),
                    similarity: sim,
                });
            }
        }

        if matches.is_empty() {
            matches.push(FaceMatch {
                identity: Identity::Unknown,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
            });
        }

        matches
    }
}
