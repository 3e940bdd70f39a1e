//! Media download.

use crate::error::{FeedError, Result};
use async_trait::async_trait;
use reqwest::Url;

/// Fetches the raw bytes behind a media URL.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let bytes = resp.bytes().await?;
        tracing::debug!(url, bytes = bytes.len(), "downloaded media");
        Ok(bytes.to_vec())
    }
}

/// Extension of the URL's last path segment including the dot, or "" when
/// there is none or the URL does not parse.
pub fn url_extension(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();
    match segment.rfind('.') {
        Some(dot) if dot > 0 => segment[dot..].to_string(),
        _ => String::new(),
    }
}

/// `tweet_<id>_<NNN><ext>` for media number `index` of a post.
pub fn media_file_name(post_id: &str, index: usize, url: &str) -> String {
    format!("tweet_{post_id}_{index:03}{}", url_extension(url))
}
