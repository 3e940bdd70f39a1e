//! Twitter v1.1 timeline client with app-only (OAuth2 bearer) auth.

use crate::error::{FeedError, Result};
use crate::post::{FeedTimeline, Post};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

const BASE_URL: &str = "https://api.twitter.com";

/// Maximum posts the timeline endpoint returns per request.
const PAGE_SIZE: usize = 200;

/// App credentials. A bearer token, when present, skips the token exchange.
#[derive(Debug, Clone)]
pub struct TwitterCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub bearer_token: Option<String>,
}

/// Inclusive time bounds on `created_at`. Unbounded by default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl FeedWindow {
    /// Posts from the last `days` days up to `now`.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            since: Some(now - Duration::days(i64::from(days))),
            until: Some(now),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }

    /// Whether `post` falls inside the window. Posts without a timestamp
    /// only pass an unbounded window.
    pub fn contains(&self, post: &Post) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(created) = post.created_at else {
            return false;
        };
        self.since.map_or(true, |s| created >= s) && self.until.map_or(true, |u| created <= u)
    }
}

/// One page of an account's timeline, newest first.
#[async_trait]
pub trait TimelineApi: Send + Sync {
    /// Up to `count` posts with id ≤ `max_id` (or the newest when `None`).
    async fn user_timeline(&self, screen_name: &str, count: usize, max_id: Option<u64>) -> Result<Vec<Post>>;
}

/// Page backwards through one account's timeline.
///
/// Stops once `limit` posts were received, when a page comes back empty,
/// or when no post of a page falls inside `window`.
pub async fn fetch_feed<A: TimelineApi + ?Sized>(
    api: &A,
    screen_name: &str,
    limit: usize,
    window: &FeedWindow,
) -> Result<Vec<Post>> {
    let mut posts = Vec::new();
    let mut received = 0usize;
    let mut max_id = None;

    while received < limit {
        let count = PAGE_SIZE.min(limit - received);
        let page = api.user_timeline(screen_name, count, max_id).await?;
        tracing::debug!(screen_name, requested = count, got = page.len(), "timeline page");

        let Some(oldest) = page.last().map(|p| p.id) else {
            break;
        };
        received += page.len();

        let before = posts.len();
        posts.extend(page.into_iter().filter(|p| window.contains(p)));
        if posts.len() == before || oldest == 0 {
            break;
        }
        max_id = Some(oldest - 1);
    }

    tracing::info!(screen_name, count = posts.len(), "fetched feed");
    Ok(posts)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
}

pub struct TwitterClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl TwitterClient {
    /// Unauthenticated client against the public API host.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            client: http,
            base_url: BASE_URL.to_string(),
            bearer_token: String::new(),
        }
    }

    /// Point the client at another API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use the configured bearer token, or exchange the consumer key/secret
    /// for one.
    pub async fn authenticate(mut self, credentials: &TwitterCredentials) -> Result<Self> {
        self.bearer_token = match &credentials.bearer_token {
            Some(token) => token.clone(),
            None => self.obtain_bearer_token(credentials).await?,
        };
        Ok(self)
    }

    async fn obtain_bearer_token(&self, credentials: &TwitterCredentials) -> Result<String> {
        let url = format!("{}/oauth2/token", self.base_url);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&credentials.consumer_key, Some(&credentials.consumer_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Auth(format!("token exchange returned {status}: {body}")));
        }

        let token: TokenResponse = resp.json().await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            return Err(FeedError::Auth(format!("unexpected token type {}", token.token_type)));
        }
        tracing::debug!("obtained app-only bearer token");
        Ok(token.access_token)
    }

    /// Fetch every followed account in order, `max_per_feed` posts at most each.
    pub async fn fetch_all(
        &self,
        follow: &[String],
        max_per_feed: usize,
        window: &FeedWindow,
    ) -> Result<Vec<FeedTimeline>> {
        if !window.is_unbounded() {
            tracing::info!(since = ?window.since, until = ?window.until, "restricting feeds to time window");
        }

        let mut feeds = Vec::with_capacity(follow.len());
        for screen_name in follow {
            let posts = fetch_feed(self, screen_name, max_per_feed, window).await?;
            feeds.push(FeedTimeline { screen_name: screen_name.clone(), posts });
        }
        Ok(feeds)
    }
}

#[async_trait]
impl TimelineApi for TwitterClient {
    async fn user_timeline(&self, screen_name: &str, count: usize, max_id: Option<u64>) -> Result<Vec<Post>> {
        let url = format!("{}/1.1/statuses/user_timeline.json", self.base_url);
        let mut query = vec![
            ("screen_name", screen_name.to_string()),
            ("count", count.to_string()),
            ("include_rts", "true".to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if let Some(max_id) = max_id {
            query.push(("max_id", max_id.to_string()));
        }

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{direct_client, split_request, CannedServer};
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Serves a fixed newest-first timeline and records each request.
    struct FakeTimeline {
        posts: Vec<Post>,
        requests: Mutex<Vec<(usize, Option<u64>)>>,
    }

    impl FakeTimeline {
        fn with_ids(ids: impl Iterator<Item = u64>) -> Self {
            Self {
                posts: ids.map(|id| Post::new(id, "")).collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(usize, Option<u64>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TimelineApi for FakeTimeline {
        async fn user_timeline(&self, _screen_name: &str, count: usize, max_id: Option<u64>) -> Result<Vec<Post>> {
            self.requests.lock().unwrap().push((count, max_id));
            Ok(self
                .posts
                .iter()
                .filter(|p| max_id.map_or(true, |m| p.id <= m))
                .take(count)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_pages_until_limit() {
        let api = FakeTimeline::with_ids((1..=1000).rev());
        let posts = fetch_feed(&api, "nasa", 450, &FeedWindow::default()).await.unwrap();

        assert_eq!(posts.len(), 450);
        assert_eq!(posts[0].id, 1000);
        assert_eq!(posts[449].id, 551);
        assert_eq!(api.requests(), vec![(200, None), (200, Some(800)), (50, Some(600))]);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let api = FakeTimeline::with_ids((1..=150).rev());
        let posts = fetch_feed(&api, "nasa", usize::MAX, &FeedWindow::default()).await.unwrap();

        assert_eq!(posts.len(), 150);
        assert_eq!(api.requests(), vec![(200, None), (200, Some(0))]);
    }

    #[tokio::test]
    async fn test_small_limit_single_request() {
        let api = FakeTimeline::with_ids((1..=1000).rev());
        let posts = fetch_feed(&api, "nasa", 5, &FeedWindow::default()).await.unwrap();
        assert_eq!(posts.len(), 5);
        assert_eq!(api.requests(), vec![(5, None)]);
    }

    #[tokio::test]
    async fn test_window_stops_paging() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        // One post per day going back 600 days, newest first.
        let mut api = FakeTimeline::with_ids((1..=600).rev());
        for (age, post) in api.posts.iter_mut().enumerate() {
            post.created_at = Some(now - Duration::days(age as i64));
        }

        let window = FeedWindow::last_days(250, now);
        let posts = fetch_feed(&api, "nasa", usize::MAX, &window).await.unwrap();

        assert_eq!(posts.len(), 251);
        assert!(posts.iter().all(|p| window.contains(p)));
        // Third page lies entirely outside the window.
        assert_eq!(api.requests().len(), 3);
    }

    fn credentials(bearer_token: Option<&str>) -> TwitterCredentials {
        TwitterCredentials {
            consumer_key: "ck".into(),
            consumer_secret: "cs".into(),
            bearer_token: bearer_token.map(str::to_string),
        }
    }

    async fn client_for(server: &CannedServer, bearer_token: Option<&str>) -> TwitterClient {
        TwitterClient::new(direct_client())
            .with_base_url(format!("{}/", server.base_url))
            .authenticate(&credentials(bearer_token))
            .await
            .unwrap()
    }

    const TIMELINE: &str = r#"[
        {"id": 1050118621198921728, "id_str": "1050118621198921728",
         "full_text": "Apollo at dawn", "created_at": "Wed Oct 10 20:19:24 +0000 2018",
         "user": {"screen_name": "nasa"}, "retweet_count": 3},
        {"id": 1050118621198921700, "id_str": "1050118621198921700", "text": "short"}
    ]"#;

    #[tokio::test]
    async fn test_user_timeline_request() {
        let server = CannedServer::start(vec![(200, TIMELINE)]).await;
        let client = client_for(&server, Some("tok")).await;

        let posts = client.user_timeline("nasa", 50, Some(99)).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].text(), "Apollo at dawn");
        assert_eq!(posts[0].screen_name(), Some("nasa"));
        assert_eq!(posts[0].extra["retweet_count"], 3);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let (head, _) = split_request(&requests[0]);
        let request_line = head.lines().next().unwrap();
        assert!(request_line.starts_with("GET /1.1/statuses/user_timeline.json?"), "{request_line}");
        for param in ["screen_name=nasa", "count=50", "include_rts=true", "tweet_mode=extended", "max_id=99"] {
            assert!(request_line.contains(param), "missing {param} in {request_line}");
        }
        assert!(head.to_ascii_lowercase().contains("authorization: bearer tok"), "{head}");
    }

    #[tokio::test]
    async fn test_first_page_has_no_max_id() {
        let server = CannedServer::start(vec![(200, "[]")]).await;
        let client = client_for(&server, Some("tok")).await;

        assert!(client.user_timeline("esa", 200, None).await.unwrap().is_empty());
        assert!(!server.requests()[0].contains("max_id"));
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let server = CannedServer::start(vec![(429, r#"{"errors":[{"message":"Rate limit exceeded"}]}"#)]).await;
        let client = client_for(&server, Some("tok")).await;

        match client.user_timeline("nasa", 10, None).await {
            Err(FeedError::Api { status, message }) => {
                assert_eq!(status, 429);
                assert!(message.contains("Rate limit exceeded"), "{message}");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_exchange() {
        let server = CannedServer::start(vec![
            (200, r#"{"token_type": "bearer", "access_token": "AAAA%2Fexchanged"}"#),
            (200, "[]"),
        ])
        .await;
        let client = client_for(&server, None).await;
        client.user_timeline("nasa", 1, None).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        let (head, body) = split_request(&requests[0]);
        assert!(head.starts_with("POST /oauth2/token "), "{head}");
        // base64("ck:cs")
        assert!(head.to_ascii_lowercase().contains("authorization: basic y2s6y3m="), "{head}");
        assert_eq!(body, "grant_type=client_credentials");

        let (head, _) = split_request(&requests[1]);
        assert!(head.contains("Bearer AAAA%2Fexchanged"), "{head}");
    }

    #[tokio::test]
    async fn test_token_exchange_rejected() {
        let server = CannedServer::start(vec![(403, r#"{"errors":[{"code":99}]}"#)]).await;
        let result = TwitterClient::new(direct_client())
            .with_base_url(&server.base_url)
            .authenticate(&credentials(None))
            .await;
        assert!(matches!(result, Err(FeedError::Auth(ref msg)) if msg.contains("403")));
    }

    #[tokio::test]
    async fn test_wrong_token_type_rejected() {
        let server = CannedServer::start(vec![(200, r#"{"token_type": "mac", "access_token": "x"}"#)]).await;
        let result = TwitterClient::new(direct_client())
            .with_base_url(&server.base_url)
            .authenticate(&credentials(None))
            .await;
        assert!(matches!(result, Err(FeedError::Auth(_))));
    }

    #[tokio::test]
    async fn test_configured_bearer_skips_exchange() {
        let server = CannedServer::start(vec![]).await;
        let client = client_for(&server, Some("preset")).await;
        assert_eq!(client.bearer_token, "preset");
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_follow_order() {
        let server = CannedServer::start(vec![(200, TIMELINE), (200, "[]"), (200, "[]")]).await;
        let client = client_for(&server, Some("tok")).await;

        let follow = vec!["nasa".to_string(), "esa".to_string()];
        let feeds = client.fetch_all(&follow, 500, &FeedWindow::default()).await.unwrap();
        assert_eq!(feeds.iter().map(|f| f.screen_name.as_str()).collect::<Vec<_>>(), vec!["nasa", "esa"]);
        assert_eq!(feeds[0].posts.len(), 2);
        assert!(feeds[1].posts.is_empty());

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].contains("max_id=1050118621198921699"));
        assert!(requests[2].contains("screen_name=esa"));
    }

    #[test]
    fn test_window_contains() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        let window = FeedWindow::last_days(7, now);

        let mut recent = Post::new(1, "");
        recent.created_at = Some(now - Duration::days(2));
        let mut old = Post::new(2, "");
        old.created_at = Some(now - Duration::days(8));
        let undated = Post::new(3, "");

        assert!(window.contains(&recent));
        assert!(!window.contains(&old));
        assert!(!window.contains(&undated));
        assert!(FeedWindow::default().contains(&undated));
    }
}
