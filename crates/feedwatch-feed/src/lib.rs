//! feedwatch-feed — Social feed access.
//!
//! Twitter v1.1 timeline pagination with app-only auth, the post schema it
//! returns, media download, and whole-file JSON snapshots of fetched feeds.

pub mod error;
pub mod media;
pub mod post;
pub mod snapshot;
pub mod twitter;

#[cfg(test)]
mod test_server;

pub use error::{FeedError, Result};
pub use media::{media_file_name, HttpMediaFetcher, MediaFetcher};
pub use post::{Entities, FeedTimeline, Media, Post, PostAuthor};
pub use twitter::{fetch_feed, FeedWindow, TimelineApi, TwitterClient, TwitterCredentials};
