//! Files written by a search run.

use crate::engine::Finding;
use anyhow::{Context, Result};
use feedwatch_feed::Post;
use std::collections::HashSet;
use std::path::Path;

/// Write `tweet_<id>.json` for each post with a hit into `dest`, plus
/// `tweet_<id>.txt` holding the post text for each post with a keyword hit.
///
/// Returns the number of files written.
pub fn write_hit_posts(dest: &Path, posts: &[Post], findings: &[Finding]) -> Result<usize> {
    let mut hit_ids = HashSet::new();
    let mut keyword_ids = HashSet::new();
    for finding in findings.iter().filter(|f| f.is_hit()) {
        hit_ids.insert(finding.post().id.as_str());
        if matches!(finding, Finding::Keyword { .. }) {
            keyword_ids.insert(finding.post().id.as_str());
        }
    }
    if hit_ids.is_empty() {
        return Ok(0);
    }

    std::fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;

    let mut written = 0;
    for post in posts.iter().filter(|p| hit_ids.contains(p.id_str.as_str())) {
        write_post_json(dest, post)?;
        written += 1;
        if keyword_ids.contains(post.id_str.as_str()) {
            let path = dest.join(format!("tweet_{}.txt", post.id_str));
            std::fs::write(&path, post.text()).with_context(|| format!("failed to write {}", path.display()))?;
            written += 1;
        }
    }
    tracing::info!(dest = %dest.display(), files = written, "wrote matching posts");
    Ok(written)
}

/// Raw post object as `tweet_<id>.json`.
pub fn write_post_json(dest: &Path, post: &Post) -> Result<()> {
    let path = dest.join(format!("tweet_{}.json", post.id_str));
    let json = serde_json::to_string_pretty(post)?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// All findings of a run as a JSON array.
pub fn write_results(path: &Path, findings: &[Finding]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(findings)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), findings = findings.len(), "wrote results");
    Ok(())
}
