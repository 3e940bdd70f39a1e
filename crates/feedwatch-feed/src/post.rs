//! Post schema for Twitter v1.1 timeline objects.
//!
//! Only the fields the matcher reads are typed. Everything else is kept in
//! `extra` maps so a post serializes back to the raw object it came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One post as returned by `statuses/user_timeline` with `tweet_mode=extended`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub id_str: String,
    /// Untruncated text (extended mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    /// Legacy 140-character text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, with = "twitter_time", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<PostAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Entities>,
    /// Present when a post carries multiple photos, a video or a GIF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_entities: Option<Entities>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAuthor {
    pub screen_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<Media>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url_https: Option<String>,
    /// "photo", "video" or "animated_gif".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Media {
    pub fn photo(url: impl Into<String>) -> Self {
        Self {
            media_url: None,
            media_url_https: Some(url.into()),
            kind: Some("photo".to_string()),
            extra: Map::new(),
        }
    }

    /// Image URL, preferring HTTPS.
    pub fn url(&self) -> Option<&str> {
        self.media_url_https
            .as_deref()
            .or(self.media_url.as_deref())
    }
}

impl Post {
    /// Minimal post with the given id and text, mainly for tests and fixtures.
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            id_str: id.to_string(),
            full_text: Some(text.into()),
            text: None,
            created_at: None,
            user: None,
            entities: None,
            extended_entities: None,
            extra: Map::new(),
        }
    }

    /// Attach photos as `extended_entities.media`.
    pub fn with_photos<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extended_entities = Some(Entities {
            media: Some(urls.into_iter().map(Media::photo).collect()),
            extra: Map::new(),
        });
        self
    }

    pub fn with_author(mut self, screen_name: impl Into<String>) -> Self {
        self.user = Some(PostAuthor { screen_name: screen_name.into(), extra: Map::new() });
        self
    }

    /// Extended text if present, else the short text, else empty.
    pub fn text(&self) -> &str {
        self.full_text
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
    }

    /// Media of `extended_entities` if that field exists, else of `entities`.
    pub fn media(&self) -> &[Media] {
        self.extended_entities
            .as_ref()
            .or(self.entities.as_ref())
            .and_then(|e| e.media.as_deref())
            .unwrap_or_default()
    }

    pub fn screen_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.screen_name.as_str())
    }

    /// Public permalink for the post.
    pub fn url(&self) -> String {
        match self.screen_name() {
            Some(name) => format!("https://twitter.com/{name}/status/{}", self.id_str),
            None => format!("https://twitter.com/i/web/status/{}", self.id_str),
        }
    }
}

/// Posts fetched from one followed account, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTimeline {
    pub screen_name: String,
    pub posts: Vec<Post>,
}

/// Flatten per-feed timelines into one sequence, preserving feed order.
pub fn flatten(feeds: Vec<FeedTimeline>) -> Vec<Post> {
    feeds.into_iter().flat_map(|f| f.posts).collect()
}

/// Twitter's `created_at` format: `Wed Oct 10 20:19:24 +0000 2018`.
mod twitter_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => s.serialize_str(&dt.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        DateTime::parse_from_str(&raw, FORMAT)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}
