//! Match engine: per-post keyword and face matching, and the aggregate run.
//!
//! Posts are processed strictly in order. Any fetch, decode or inference
//! error aborts the run.

use crate::keywords::Keywords;
use feedwatch_core::{annotate, decode_rgb, BoundingBox, FaceBackend, FaceError, Gallery, Identity};
use feedwatch_feed::{media_file_name, FeedError, MediaFetcher, Post};
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FeedError,
    },
    #[error("failed to decode image {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },
    #[error("face backend error: {0}")]
    Face(#[from] FaceError),
    #[error("failed to write annotated image {path}: {source}")]
    Annotate {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identifies the post a finding came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PostRef {
    pub id: String,
    pub url: String,
}

impl From<&Post> for PostRef {
    fn from(post: &Post) -> Self {
        Self { id: post.id_str.clone(), url: post.url() }
    }
}

/// One match result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// `keyword` (number `index` in the keyword list) occurs in the post text.
    Keyword {
        post: PostRef,
        keyword: String,
        index: usize,
    },
    /// Face `face_index` of media `media_index` was identified.
    Face {
        post: PostRef,
        identity: Identity,
        media_index: usize,
        face_index: usize,
        similarity: f32,
        bbox: BoundingBox,
    },
}

impl Finding {
    pub fn post(&self) -> &PostRef {
        match self {
            Finding::Keyword { post, .. } | Finding::Face { post, .. } => post,
        }
    }

    /// Keyword findings and known faces. Unknown faces are not hits.
    pub fn is_hit(&self) -> bool {
        match self {
            Finding::Keyword { .. } => true,
            Finding::Face { identity, .. } => identity.is_known(),
        }
    }
}

/// Face matching state: backend, reference gallery, optional annotation output.
pub struct PhotoSearch<B> {
    backend: B,
    gallery: Gallery,
    annotate_dir: Option<PathBuf>,
}

impl<B: FaceBackend> PhotoSearch<B> {
    pub fn new(backend: B, gallery: Gallery) -> Self {
        Self { backend, gallery, annotate_dir: None }
    }

    /// Write annotated copies of images with known faces into `dir`.
    pub fn with_annotate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.annotate_dir = Some(dir.into());
        self
    }
}

pub struct MatchEngine<B, F> {
    fetcher: F,
    keywords: Keywords,
    photo: Option<PhotoSearch<B>>,
}

impl<B: FaceBackend, F: MediaFetcher> MatchEngine<B, F> {
    /// Text-only engine. Media is never fetched until a gallery is attached.
    pub fn new(fetcher: F, keywords: Keywords) -> Self {
        Self { fetcher, keywords, photo: None }
    }

    pub fn with_photo_search(mut self, photo: PhotoSearch<B>) -> Self {
        self.photo = Some(photo);
        self
    }

    /// Photo findings followed by keyword findings for one post.
    pub async fn match_post(&mut self, post: &Post) -> Result<Vec<Finding>, EngineError> {
        let post_ref = PostRef::from(post);
        let mut findings = self.match_photos(post, &post_ref).await?;
        findings.extend(self.match_text(post, &post_ref));
        Ok(findings)
    }

    fn match_text(&self, post: &Post, post_ref: &PostRef) -> Vec<Finding> {
        self.keywords
            .matches(post.text())
            .into_iter()
            .map(|(index, keyword)| Finding::Keyword {
                post: post_ref.clone(),
                keyword: keyword.to_string(),
                index,
            })
            .collect()
    }

    async fn match_photos(&mut self, post: &Post, post_ref: &PostRef) -> Result<Vec<Finding>, EngineError> {
        let Some(photo) = self.photo.as_mut() else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for (media_index, media) in post.media().iter().enumerate() {
            let Some(url) = media.url() else {
                tracing::debug!(post = %post.id_str, media_index, "media entry without URL");
                continue;
            };

            let bytes = self
                .fetcher
                .fetch(url)
                .await
                .map_err(|source| EngineError::Fetch { url: url.to_string(), source })?;
            let image = decode_rgb(&bytes).map_err(|source| EngineError::Decode { url: url.to_string(), source })?;

            let threshold = photo.backend.threshold();
            let faces = photo.backend.encode(&image)?;
            let mut known_boxes = Vec::new();

            for (face_index, (bbox, embedding)) in faces.iter().enumerate() {
                let matches = photo.gallery.identify(embedding, threshold);
                if matches.iter().any(|m| m.identity.is_known()) {
                    known_boxes.push(bbox);
                }
                for m in matches {
                    tracing::debug!(
                        post = %post.id_str,
                        media_index,
                        face_index,
                        identity = %m.identity,
                        similarity = m.similarity,
                        "face compared"
                    );
                    findings.push(Finding::Face {
                        post: post_ref.clone(),
                        identity: m.identity,
                        media_index,
                        face_index,
                        similarity: m.similarity,
                        bbox: bbox.clone(),
                    });
                }
            }

            if let Some(dir) = &photo.annotate_dir {
                if let Some(annotated) = annotate::annotate(&image, known_boxes) {
                    let path = dir.join(annotated_file_name(&post.id_str, media_index, url));
                    save_annotated(&annotated, &path)?;
                }
            }
        }

        Ok(findings)
    }
}

/// Media file name with an extension the image encoder understands.
fn annotated_file_name(post_id: &str, media_index: usize, url: &str) -> String {
    let name = media_file_name(post_id, media_index, url);
    let lower = name.to_ascii_lowercase();
    if [".jpg", ".jpeg", ".png"].iter().any(|ext| lower.ends_with(ext)) {
        name
    } else {
        format!("tweet_{post_id}_{media_index:03}.png")
    }
}

fn save_annotated(image: &image::RgbImage, path: &Path) -> Result<(), EngineError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| EngineError::Io { path: dir.to_path_buf(), source })?;
    }
    image
        .save(path)
        .map_err(|source| EngineError::Annotate { path: path.to_path_buf(), source })?;
    tracing::info!(path = %path.display(), "wrote annotated image");
    Ok(())
}

/// Number of posts a run processes: all of them, or at most `max_count`.
pub fn run_total(available: usize, max_count: Option<usize>) -> usize {
    max_count.map_or(available, |max| available.min(max))
}

/// Match every post in order and accumulate the findings.
///
/// With `max_count`, at most that many posts are processed; every finding of
/// a processed post is kept. `progress` advances once per processed post.
pub async fn run<B: FaceBackend, F: MediaFetcher>(
    engine: &mut MatchEngine<B, F>,
    posts: &[Post],
    max_count: Option<usize>,
    progress: &ProgressBar,
) -> Result<Vec<Finding>, EngineError> {
    let total = run_total(posts.len(), max_count);
    progress.set_length(total as u64);
    tracing::info!(available = posts.len(), total, "matching posts");

    let mut findings = Vec::new();
    for post in posts.iter().take(total) {
        findings.extend(engine.match_post(post).await?);
        progress.inc(1);
    }
    progress.finish();

    tracing::info!(
        findings = findings.len(),
        hits = findings.iter().filter(|f| f.is_hit()).count(),
        "matching complete"
    );
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use feedwatch_core::{Embedding, GalleryEntry};
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Pixel (0, 0) red = face count; pixel (i + 1, 0) green/blue = embedding of face i.
    struct PixelBackend;

    impl FaceBackend for PixelBackend {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FaceError> {
            let count = image.get_pixel(0, 0)[0] as usize;
            Ok((0..count)
                .map(|i| BoundingBox {
                    x: 4.0 + i as f32 * 12.0,
                    y: 4.0,
                    width: 10.0,
                    height: 10.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, FaceError> {
            let i = ((face.x - 4.0) / 12.0).round() as u32;
            let p = image.get_pixel(i + 1, 0);
            Ok(Embedding { values: vec![p[1] as f32, p[2] as f32], model_version: None })
        }
    }

    #[derive(Default)]
    struct MapFetcher {
        media: HashMap<String, Vec<u8>>,
        fetched: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
            self.media.insert(url.to_string(), bytes);
            self
        }
    }

    #[async_trait]
    impl MediaFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> feedwatch_feed::Result<Vec<u8>> {
            self.fetched.lock().unwrap().push(url.to_string());
            self.media.get(url).cloned().ok_or(FeedError::Api {
                status: 404,
                message: "not found".into(),
            })
        }
    }

    /// PNG with one face per entry of `faces`, each embedding `[g, b]`.
    fn face_png(faces: &[[u8; 2]]) -> Vec<u8> {
        let mut image = RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]));
        image.put_pixel(0, 0, Rgb([faces.len() as u8, 0, 0]));
        for (i, [g, b]) in faces.iter().enumerate() {
            image.put_pixel(i as u32 + 1, 0, Rgb([0, *g, *b]));
        }
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn gallery() -> Gallery {
        let entry = |label: &str, values: [f32; 2]| GalleryEntry {
            label: label.into(),
            embedding: Embedding { values: values.to_vec(), model_version: None },
        };
        Gallery::from_entries(vec![
            entry("ada", [1.0, 0.0]),
            entry("grace", [0.0, 1.0]),
            entry("ada_hat", [1.0, 0.2]),
        ])
    }

    fn engine(fetcher: MapFetcher, phrase: &str) -> MatchEngine<PixelBackend, MapFetcher> {
        MatchEngine::new(fetcher, Keywords::parse(phrase))
            .with_photo_search(PhotoSearch::new(PixelBackend, gallery()))
    }

    fn face_labels(findings: &[Finding]) -> Vec<&str> {
        findings
            .iter()
            .filter_map(|f| match f {
                Finding::Face { identity, .. } => Some(identity.label()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_keyword_findings_without_media() {
        let mut engine = engine(MapFetcher::default(), "apollo moon mars");
        let post = Post::new(1, "Apollo landed on the MOON").with_author("nasa");

        let findings = engine.match_post(&post).await.unwrap();
        assert_eq!(
            findings,
            vec![
                Finding::Keyword {
                    post: PostRef { id: "1".into(), url: "https://twitter.com/nasa/status/1".into() },
                    keyword: "apollo".into(),
                    index: 0,
                },
                Finding::Keyword {
                    post: PostRef { id: "1".into(), url: "https://twitter.com/nasa/status/1".into() },
                    keyword: "moon".into(),
                    index: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_text_only_engine_never_fetches() {
        let mut engine: MatchEngine<PixelBackend, MapFetcher> =
            MatchEngine::new(MapFetcher::default(), Keywords::parse("moon"));
        let post = Post::new(2, "moon shot").with_photos(["https://img/a.png"]);

        let findings = engine.match_post(&post).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert!(engine.fetcher.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_known_and_unknown_faces() {
        // Face 0 is grace, face 1 matches nobody.
        let fetcher = MapFetcher::default().with("https://img/a.png", face_png(&[[0, 200], [0, 0]]));
        let mut engine = engine(fetcher, "");
        let post = Post::new(3, "").with_photos(["https://img/a.png"]);

        let findings = engine.match_post(&post).await.unwrap();
        assert_eq!(face_labels(&findings), vec!["grace", "unknown"]);
        assert!(findings[0].is_hit());
        assert!(!findings[1].is_hit());
    }

    #[tokio::test]
    async fn test_every_matching_label_reported() {
        // Embedding [200, 20] is close to both "ada" and "ada_hat".
        let fetcher = MapFetcher::default().with("https://img/a.png", face_png(&[[200, 20]]));
        let mut engine = engine(fetcher, "");
        let post = Post::new(4, "").with_photos(["https://img/a.png"]);

        let findings = engine.match_post(&post).await.unwrap();
        assert_eq!(face_labels(&findings), vec!["ada", "ada_hat"]);
        assert!(findings.iter().all(|f| matches!(f, Finding::Face { face_index: 0, .. })));
    }

    #[tokio::test]
    async fn test_photo_findings_precede_keywords() {
        let fetcher = MapFetcher::default()
            .with("https://img/a.png", face_png(&[]))
            .with("https://img/b.png", face_png(&[[0, 50]]));
        let mut engine = engine(fetcher, "launch");
        let post = Post::new(5, "Launch!").with_photos(["https://img/a.png", "https://img/b.png"]);

        let findings = engine.match_post(&post).await.unwrap();
        assert_eq!(findings.len(), 2);
        assert!(matches!(&findings[0], Finding::Face { media_index: 1, identity: Identity::Known(l), .. } if l == "grace"));
        assert!(matches!(&findings[1], Finding::Keyword { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_alpha_channel_dropped() {
        let mut rgba = RgbaImage::from_pixel(64, 32, Rgba([0, 0, 0, 10]));
        rgba.put_pixel(0, 0, Rgba([1, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([0, 255, 0, 0]));
        let mut bytes = Cursor::new(Vec::new());
        rgba.write_to(&mut bytes, image::ImageFormat::Png).unwrap();

        let fetcher = MapFetcher::default().with("https://img/a.png", bytes.into_inner());
        let mut engine = engine(fetcher, "");
        let post = Post::new(6, "").with_photos(["https://img/a.png"]);

        let findings = engine.match_post(&post).await.unwrap();
        assert_eq!(face_labels(&findings), vec!["ada", "ada_hat"]);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let mut engine = engine(MapFetcher::default(), "");
        let post = Post::new(7, "").with_photos(["https://img/missing.png"]);

        let err = engine.match_post(&post).await.unwrap_err();
        assert!(matches!(err, EngineError::Fetch { ref url, .. } if url == "https://img/missing.png"));
    }

    #[tokio::test]
    async fn test_decode_error_propagates() {
        let fetcher = MapFetcher::default().with("https://img/a.png", b"<html>".to_vec());
        let mut engine = engine(fetcher, "");
        let post = Post::new(8, "").with_photos(["https://img/a.png"]);

        assert!(matches!(engine.match_post(&post).await, Err(EngineError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_annotation_written_only_for_known_faces() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("annotated");
        let fetcher = MapFetcher::default()
            .with("https://img/known.png", face_png(&[[255, 0]]))
            .with("https://img/stranger.png", face_png(&[[0, 0]]))
            .with("https://img/empty.png", face_png(&[]));
        let mut engine = MatchEngine::new(fetcher, Keywords::default())
            .with_photo_search(PhotoSearch::new(PixelBackend, gallery()).with_annotate_dir(&out));

        let post = Post::new(9, "").with_photos([
            "https://img/known.png",
            "https://img/stranger.png",
            "https://img/empty.png",
        ]);
        engine.match_post(&post).await.unwrap();

        let known = out.join("tweet_9_000.png");
        assert!(known.exists());
        assert!(!out.join("tweet_9_001.png").exists());
        assert!(!out.join("tweet_9_002.png").exists());

        let annotated = image::open(&known).unwrap().to_rgb8();
        let edge = annotated.get_pixel(4, 9);
        assert!(edge[0] > 200 && edge[1] < 60, "expected red box edge, got {edge:?}");
    }

    #[test]
    fn test_annotated_file_name() {
        assert_eq!(annotated_file_name("1", 0, "https://x/a.JPG"), "tweet_1_000.JPG");
        assert_eq!(annotated_file_name("1", 2, "https://x/a.webp"), "tweet_1_002.png");
        assert_eq!(annotated_file_name("1", 3, "https://x/a"), "tweet_1_003.png");
    }

    #[test]
    fn test_run_total() {
        assert_eq!(run_total(10, None), 10);
        assert_eq!(run_total(10, Some(3)), 3);
        assert_eq!(run_total(2, Some(5)), 2);
    }

    #[tokio::test]
    async fn test_run_accumulates_in_order() {
        let mut engine = engine(MapFetcher::default(), "moon");
        let posts = vec![
            Post::new(1, "moon"),
            Post::new(2, "sun"),
            Post::new(3, "MOON again"),
        ];
        let bar = ProgressBar::hidden();

        let findings = run(&mut engine, &posts, None, &bar).await.unwrap();
        let ids: Vec<&str> = findings.iter().map(|f| f.post().id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(bar.position(), 3);
        assert_eq!(bar.length(), Some(3));
    }

    #[tokio::test]
    async fn test_run_max_count_caps_posts_only() {
        let mut engine = engine(MapFetcher::default(), "a b c");
        let posts: Vec<Post> = (1..=5).map(|id| Post::new(id, "a b c")).collect();
        let bar = ProgressBar::hidden();

        let findings = run(&mut engine, &posts, Some(2), &bar).await.unwrap();
        let ids: Vec<&str> = findings.iter().map(|f| f.post().id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1", "1", "2", "2", "2"]);
        assert_eq!(bar.position(), 2);
        assert_eq!(bar.length(), Some(2));
    }

    #[tokio::test]
    async fn test_run_max_count_keeps_all_findings_when_posts_fit() {
        let mut engine = engine(MapFetcher::default(), "a b c");
        let posts: Vec<Post> = (1..=2).map(|id| Post::new(id, "a b c")).collect();

        let capped = run(&mut engine, &posts, Some(5), &ProgressBar::hidden()).await.unwrap();
        let unbounded = run(&mut engine, &posts, None, &ProgressBar::hidden()).await.unwrap();
        assert_eq!(capped.len(), 6);
        assert_eq!(capped, unbounded);
    }

    #[tokio::test]
    async fn test_run_max_count_above_available_returns_all() {
        let mut engine = engine(MapFetcher::default(), "moon");
        let posts: Vec<Post> = (1..=3).map(|id| Post::new(id, "moon")).collect();

        let findings = run(&mut engine, &posts, Some(10), &ProgressBar::hidden()).await.unwrap();
        assert_eq!(findings.len(), 3);
    }
}
