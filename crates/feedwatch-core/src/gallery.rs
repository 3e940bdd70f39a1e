//! Reference gallery: one labelled face embedding per template image.
//!
//! A gallery is loaded from a single image file or from every image file in
//! a directory. Each template must contain exactly one face; the label is
//! the file stem (`alice.jpg` → `alice`).

use crate::backend::{FaceBackend, FaceError};
use crate::types::{CosineMatcher, Embedding, FaceMatch, Matcher};
use image::{ImageError, ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery path not found: {0}")]
    NotFound(PathBuf),
    #[error("template {path} must contain exactly one face, found {count}")]
    FaceCount { path: PathBuf, count: usize },
    #[error("no usable template images in {0}")]
    Empty(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Face(#[from] FaceError),
}

/// A labelled reference face.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Immutable set of reference faces for a run.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Load templates from `path` (a file or a directory).
    ///
    /// Directory entries that are not decodable images are skipped.
    pub fn load<B: FaceBackend + ?Sized>(path: &Path, backend: &mut B) -> Result<Self, GalleryError> {
        let files = template_files(path)?;
        let mut entries = Vec::new();

        for file in files {
            let Some(image) = open_rgb(&file)? else {
                tracing::debug!(path = %file.display(), "skipping non-image gallery file");
                continue;
            };

            let mut encoded = backend.encode(&image)?;
            if encoded.len() != 1 {
                return Err(GalleryError::FaceCount { path: file, count: encoded.len() });
            }
            let (_, embedding) = encoded.remove(0);

            let label = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::info!(label = %label, path = %file.display(), "loaded gallery template");
            entries.push(GalleryEntry { label, embedding });
        }

        if entries.is_empty() {
            return Err(GalleryError::Empty(path.to_path_buf()));
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every gallery identity matching `query`, or a single `Unknown`.
    pub fn identify(&self, query: &Embedding, threshold: f32) -> Vec<FaceMatch> {
        CosineMatcher.compare(query, &self.entries, threshold)
    }
}

fn template_files(path: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(GalleryError::NotFound(path.to_path_buf()));
    }

    let io_err = |source| GalleryError::Io { path: path.to_path_buf(), source };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(io_err)? {
        // Follows symlinks; dangling links are skipped like directories.
        let file = entry.map_err(io_err)?.path();
        if file.is_file() {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Decode an image file as RGB. `Ok(None)` means the file is not an image.
fn open_rgb(path: &Path) -> Result<Option<RgbImage>, GalleryError> {
    let io_err = |source| GalleryError::Io { path: path.to_path_buf(), source };
    let reader = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;

    match reader.decode() {
        Ok(image) => Ok(Some(image.to_rgb8())),
        Err(ImageError::Unsupported(_) | ImageError::Decoding(_)) => Ok(None),
        Err(ImageError::IoError(source)) => Err(io_err(source)),
        Err(other) => {
            tracing::debug!(path = %path.display(), error = %other, "undecodable gallery file");
            Ok(None)
        }
    }
}
