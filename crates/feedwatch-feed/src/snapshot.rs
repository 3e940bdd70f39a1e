//! Whole-file JSON snapshots of fetched feeds.
//!
//! A snapshot lets a run be replayed without hitting the API again.

use crate::error::{FeedError, Result};
use crate::post::FeedTimeline;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub fn save(path: &Path, feeds: &[FeedTimeline]) -> Result<()> {
    let io_err = |source| FeedError::Snapshot { path: path.to_path_buf(), source };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer(&mut writer, feeds)?;
    writer.flush().map_err(io_err)?;

    tracing::info!(path = %path.display(), feeds = feeds.len(), "saved feed snapshot");
    Ok(())
}

pub fn load(path: &Path) -> Result<Vec<FeedTimeline>> {
    let file = File::open(path).map_err(|source| FeedError::Snapshot { path: path.to_path_buf(), source })?;
    let feeds: Vec<FeedTimeline> = serde_json::from_reader(BufReader::new(file))?;

    tracing::info!(
        path = %path.display(),
        feeds = feeds.len(),
        posts = feeds.iter().map(|f| f.posts.len()).sum::<usize>(),
        "loaded feed snapshot"
    );
    Ok(feeds)
}
