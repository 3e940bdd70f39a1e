use crate::engine::run_total;
use crate::output::write_post_json;
use anyhow::{Context, Result};
use feedwatch_feed::{media_file_name, MediaFetcher, Post};
use indicatif::ProgressBar;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub posts: usize,
    pub media: usize,
}

/// Save posts and their media into `dest`.
///
/// Each post becomes `tweet_<id>.json`; media number `j` of a post becomes
/// `tweet_<id>_<jjj><ext>`.
pub async fn download<F: MediaFetcher + ?Sized>(
    fetcher: &F,
    posts: &[Post],
    dest: &Path,
    max_count: Option<usize>,
    progress: &ProgressBar,
) -> Result<DownloadSummary> {
    std::fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    let total = run_total(posts.len(), max_count);
    progress.set_length(total as u64);

    let mut summary = DownloadSummary::default();
    for post in posts.iter().take(total) {
        write_post_json(dest, post)?;
        summary.posts += 1;

        for (index, media) in post.media().iter().enumerate() {
            let Some(url) = media.url() else {
                continue;
            };
            let bytes = fetcher
                .fetch(url)
                .await
                .with_context(|| format!("failed to download {url}"))?;
            let path = dest.join(media_file_name(&post.id_str, index, url));
            std::fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
            summary.media += 1;
        }
        progress.inc(1);
    }
    progress.finish();

    tracing::info!(
        dest = %dest.display(),
        posts = summary.posts,
        media = summary.media,
        "download complete"
    );
    Ok(summary)
}
