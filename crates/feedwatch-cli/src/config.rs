use feedwatch_core::{default_model_dir, ModelPaths, DEFAULT_SIMILARITY_THRESHOLD};
use feedwatch_feed::TwitterCredentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::keywords::Keywords;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config has no [{0}] section")]
    MissingSection(&'static str),
    #[error("[{section}] requires `{key}`")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
    #[error("[search] must set `text`, `photo`, or both")]
    NothingToSearch,
    #[error("failed to read Gmail credentials: {0}")]
    Credentials(#[from] feedwatch_mail::MailError),
}

/// Run configuration, loaded from a sectioned TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub twitter: Option<TwitterSection>,
    pub search: Option<SearchSection>,
    pub gmail: Option<GmailSection>,
}

/// Feed credentials and the accounts to follow.
#[derive(Debug, Clone, Deserialize)]
pub struct TwitterSection {
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Whitespace-separated screen names.
    #[serde(default)]
    pub follow: String,
    /// Maximum posts per followed account (default: unbounded).
    #[serde(default)]
    pub max_per_feed: Option<usize>,
}

/// What to look for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchSection {
    /// Keyword phrase; split on whitespace, matched case-insensitively.
    #[serde(default)]
    pub text: Option<String>,
    /// Gallery template image, or a directory of them.
    #[serde(default)]
    pub photo: Option<PathBuf>,
    /// Where annotated copies of matched images are written.
    #[serde(default)]
    pub annotate_dir: Option<PathBuf>,
    /// JSON file receiving every finding of a run.
    #[serde(default)]
    pub results_file: Option<PathBuf>,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

/// Notification mail settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GmailSection {
    pub to: String,
    pub from: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Stored OAuth2 credentials (JSON with `access_token`).
    #[serde(default)]
    pub credential_file: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            path = %path.display(),
            twitter = config.twitter.is_some(),
            search = config.search.is_some(),
            gmail = config.gmail.is_some(),
            "loaded config"
        );
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn twitter(&self) -> Result<&TwitterSection, ConfigError> {
        let section = self
            .twitter
            .as_ref()
            .ok_or(ConfigError::MissingSection("twitter"))?;
        if section.follow.trim().is_empty() {
            return Err(ConfigError::MissingKey { section: "twitter", key: "follow" });
        }
        if section.bearer_token.is_none() {
            if section.consumer_key.is_empty() {
                return Err(ConfigError::MissingKey { section: "twitter", key: "consumer_key" });
            }
            if section.consumer_secret.is_empty() {
                return Err(ConfigError::MissingKey { section: "twitter", key: "consumer_secret" });
            }
        }
        Ok(section)
    }

    pub fn search(&self) -> Result<&SearchSection, ConfigError> {
        let section = self
            .search
            .as_ref()
            .ok_or(ConfigError::MissingSection("search"))?;
        if section.text.is_none() && section.photo.is_none() {
            return Err(ConfigError::NothingToSearch);
        }
        Ok(section)
    }
}

impl TwitterSection {
    pub fn follow_list(&self) -> Vec<String> {
        self.follow.split_whitespace().map(str::to_string).collect()
    }

    pub fn max_per_feed(&self) -> usize {
        self.max_per_feed.unwrap_or(usize::MAX)
    }

    pub fn credentials(&self) -> TwitterCredentials {
        TwitterCredentials {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            bearer_token: self.bearer_token.clone(),
        }
    }
}

impl SearchSection {
    pub fn keywords(&self) -> Keywords {
        Keywords::parse(self.text.as_deref().unwrap_or_default())
    }

    /// Threshold from the file, else `FEEDWATCH_SIMILARITY_THRESHOLD`, else the default.
    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
            .unwrap_or_else(|| env_f32("FEEDWATCH_SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD))
    }

    pub fn model_paths(&self) -> ModelPaths {
        let dir = self.model_dir.clone().unwrap_or_else(default_model_dir);
        ModelPaths::in_dir(&dir)
    }
}

impl GmailSection {
    pub fn access_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }
        let path = self
            .credential_file
            .as_ref()
            .ok_or(ConfigError::MissingKey { section: "gmail", key: "access_token" })?;
        Ok(feedwatch_mail::load_access_token(path)?)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
