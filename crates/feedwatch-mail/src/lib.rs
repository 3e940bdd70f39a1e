//! feedwatch-mail — Send plain-text notices through the Gmail REST API.
//!
//! Authenticates with an OAuth2 access token, either given directly or read
//! from a stored credential file (a JSON object with an `access_token` field).

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Gmail API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("credential file {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },
}

/// A plain-text message ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl Message {
    /// RFC 5322 text with CRLF line endings.
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("To: {}\r\n", self.to));
        out.push_str(&format!("From: {}\r\n", self.from));
        out.push_str(&format!("Subject: {}\r\n", encode_header(&self.subject)));
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
        out.push_str("Content-Transfer-Encoding: 8bit\r\n");
        out.push_str("\r\n");
        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }

    /// base64url of the RFC 5322 text, as the `raw` field of a send request.
    pub fn to_raw(&self) -> String {
        URL_SAFE.encode(self.to_rfc5322().as_bytes())
    }
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

#[derive(Debug, Deserialize)]
struct StoredCredentials {
    access_token: String,
}

/// Read the access token from a stored OAuth2 credential file.
pub fn load_access_token(path: &Path) -> Result<String, MailError> {
    let cred_err = |reason: String| MailError::Credentials { path: path.to_path_buf(), reason };
    let raw = std::fs::read_to_string(path).map_err(|e| cred_err(e.to_string()))?;
    let stored: StoredCredentials = serde_json::from_str(&raw).map_err(|e| cred_err(e.to_string()))?;
    Ok(stored.access_token)
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

pub struct GmailClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GmailClient {
    pub fn new(client: reqwest::Client, access_token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: BASE_URL.to_string(),
            access_token: access_token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send `message` as the authenticated user. Returns the Gmail message id.
    pub async fn send(&self, message: &Message) -> Result<String, MailError> {
        let url = format!("{}/users/me/messages/send", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "raw": message.to_raw() }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let sent: SendResponse = resp.json().await?;
        tracing::info!(id = %sent.id, to = %message.to, "notification sent");
        Ok(sent.id)
    }
}

#[cfg(test)]
mod test_server;
