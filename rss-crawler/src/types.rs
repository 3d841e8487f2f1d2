use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::CrawlStats;

pub use interfaces::defs::{
    Article, ArticleRepository, ContentFetcher, CreateOutcome, EmbeddingHook, FeedItem,
    FeedRetriever, NewArticle, NotifyService, Source, SourceRepository, SourceType,
    SummarizeError, Summarizer,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub success: bool,
    pub error: Option<String>,
    pub fetch_time: DateTime<Utc>,
    pub response_time_ms: u64,
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content: Option<String>, // raw feed or page body
}

impl FetchResult {
    pub(crate) fn failed(fetch_time: DateTime<Utc>, response_time_ms: u64, http_status: Option<u16>, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            fetch_time,
            response_time_ms,
            http_status,
            etag: None,
            last_modified: None,
            content: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    /// Body size limit for feeds and article pages.
    pub max_feed_size_mb: usize,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Minimum spacing between two requests to the same host.
    pub per_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "RSS-Crawler/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            follow_redirects: true,
            max_redirects: 5,
            per_host_interval_ms: 250,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Source not found: {id}")]
    SourceNotFound { id: i64 },

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Failed to load active sources: {0}")]
    SourceLoad(anyhow::Error),

    #[error("Crawl cancelled ({partial})")]
    Cancelled { partial: CrawlStats },

    #[error("Response body exceeds size limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, CrawlerError>;
