use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use feedwatch_core::{Gallery, OnnxBackend};
use feedwatch_feed::{post, snapshot, FeedTimeline, FeedWindow, HttpMediaFetcher, TwitterClient};
use feedwatch_mail::GmailClient;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod download;
mod engine;
mod keywords;
mod output;
mod progress;
mod report;

use config::{Config, SearchSection};
use engine::{MatchEngine, PhotoSearch};
use report::Report;

#[derive(Parser)]
#[command(name = "feedwatch", version, about = "Watch social feeds for known faces and keywords")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that fetch feeds.
#[derive(Args, Debug, Clone)]
struct FetchArgs {
    /// Process at most this many posts
    #[arg(long)]
    max: Option<usize>,
    /// Only fetch posts from the last DAYS days
    #[arg(long, value_name = "DAYS")]
    since: Option<u32>,
    /// Do not display the progress bar
    #[arg(long)]
    no_progress_bar: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search followed feeds for gallery faces and keywords, then notify
    Search {
        /// Configuration file
        config: PathBuf,
        #[command(flatten)]
        fetch: FetchArgs,
        /// Write matching posts into this directory
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
        /// Save fetched feeds to a snapshot file
        #[arg(long, value_name = "PATH", conflicts_with = "load_snapshot")]
        save_snapshot: Option<PathBuf>,
        /// Search a saved snapshot instead of fetching
        #[arg(long, value_name = "PATH")]
        load_snapshot: Option<PathBuf>,
    },
    /// Save posts and their media into a directory
    Download {
        /// Configuration file
        config: PathBuf,
        /// Destination directory
        destination: PathBuf,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Load the reference gallery and list its labels
    Gallery {
        /// Configuration file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            config,
            fetch,
            dest,
            save_snapshot,
            load_snapshot,
        } => {
            let config = Config::load(&config)?;
            config.search()?;
            let http = http_client()?;
            let feeds = match load_snapshot {
                Some(path) => snapshot::load(&path).context("failed to load snapshot")?,
                None => fetch_feeds(&http, &config, &fetch).await?,
            };
            if let Some(path) = save_snapshot {
                snapshot::save(&path, &feeds).context("failed to save snapshot")?;
            }
            search(&http, &config, post::flatten(feeds), &fetch, dest.as_deref()).await?;
        }
        Commands::Download {
            config,
            destination,
            fetch,
        } => {
            let config = Config::load(&config)?;
            let http = http_client()?;
            let posts = post::flatten(fetch_feeds(&http, &config, &fetch).await?);
            let bar = progress::post_progress("downloading", !fetch.no_progress_bar);
            let fetcher = HttpMediaFetcher::new(http);
            let summary = download::download(&fetcher, &posts, &destination, fetch.max, &bar).await?;
            println!(
                "Saved {} posts and {} media files to {}",
                summary.posts,
                summary.media,
                destination.display()
            );
        }
        Commands::Gallery { config } => {
            let config = Config::load(&config)?;
            let search = config.search()?;
            let Some(photo) = &search.photo else {
                bail!("[search] has no `photo` gallery configured");
            };
            let (_, gallery) = load_gallery(search, photo)?;
            println!("{} reference faces in {}:", gallery.len(), photo.display());
            for label in gallery.labels() {
                println!("  {label}");
            }
        }
    }

    Ok(())
}

/// One HTTP client shared by the feed, media and mail requests of a run.
fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .build()
        .context("failed to build HTTP client")
}

async fn fetch_feeds(http: &reqwest::Client, config: &Config, fetch: &FetchArgs) -> Result<Vec<FeedTimeline>> {
    let twitter = config.twitter()?;
    let client = TwitterClient::new(http.clone())
        .authenticate(&twitter.credentials())
        .await
        .context("failed to authenticate with Twitter")?;

    let window = fetch
        .since
        .map(|days| FeedWindow::last_days(days, chrono::Utc::now()))
        .unwrap_or_default();
    let follow = twitter.follow_list();
    tracing::info!(feeds = follow.len(), since_days = ?fetch.since, "fetching feeds");

    let feeds = client
        .fetch_all(&follow, twitter.max_per_feed(), &window)
        .await
        .context("failed to fetch feeds")?;
    tracing::info!(
        posts = feeds.iter().map(|f| f.posts.len()).sum::<usize>(),
        "fetched feeds"
    );
    Ok(feeds)
}

fn load_gallery(search: &SearchSection, photo: &Path) -> Result<(OnnxBackend, Gallery)> {
    let paths = search.model_paths();
    let mut backend = OnnxBackend::load(&paths, search.similarity_threshold())
        .with_context(|| format!("failed to load face models from {}", paths.detector.display()))?;
    let gallery = Gallery::load(photo, &mut backend)
        .with_context(|| format!("failed to load reference gallery {}", photo.display()))?;
    tracing::info!(entries = gallery.len(), path = %photo.display(), "loaded reference gallery");
    Ok((backend, gallery))
}

async fn search(
    http: &reqwest::Client,
    config: &Config,
    posts: Vec<post::Post>,
    fetch: &FetchArgs,
    dest: Option<&Path>,
) -> Result<()> {
    let search = config.search()?;
    let keywords = search.keywords();
    if !keywords.is_empty() {
        tracing::info!(keywords = ?keywords.as_slice(), "keyword search enabled");
    }

    let mut engine: MatchEngine<OnnxBackend, HttpMediaFetcher> =
        MatchEngine::new(HttpMediaFetcher::new(http.clone()), keywords);
    if let Some(photo) = &search.photo {
        let (backend, gallery) = load_gallery(search, photo)?;
        let mut photo_search = PhotoSearch::new(backend, gallery);
        if let Some(dir) = &search.annotate_dir {
            photo_search = photo_search.with_annotate_dir(dir);
        }
        engine = engine.with_photo_search(photo_search);
    }

    let bar = progress::post_progress("searching", !fetch.no_progress_bar);
    let findings = engine::run(&mut engine, &posts, fetch.max, &bar).await?;
    let searched = engine::run_total(posts.len(), fetch.max);

    if let Some(dest) = dest {
        output::write_hit_posts(dest, &posts, &findings)?;
    }
    if let Some(path) = &search.results_file {
        output::write_results(path, &findings)?;
    }

    let report = Report::from_findings(&findings, searched);
    tracing::info!(posts = searched, hit_posts = report.hit_posts, "search complete");
    if !report.has_hits() {
        tracing::info!("no matches found, sending no-results notice");
    }

    match &config.gmail {
        Some(gmail) => {
            let client = GmailClient::new(http.clone(), gmail.access_token()?);
            let message = report.into_message(&gmail.to, &gmail.from);
            client.send(&message).await.context("failed to send notification")?;
        }
        None => {
            println!("Subject: {}\n\n{}", report.subject, report.body);
        }
    }
    Ok(())
}
