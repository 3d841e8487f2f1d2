use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rss,
    Wsj,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Rss => "rss",
            SourceType::Wsj => "wsj",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss" => Ok(SourceType::Rss),
            "wsj" => Ok(SourceType::Wsj),
            other => Err(anyhow::anyhow!("unknown source type: {}", other)),
        }
    }
}

/// A registered feed origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub feed_url: String,
    pub source_type: SourceType,
    pub is_active: bool,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Checks the registration invariants: non-empty name and an absolute
    /// http(s) feed URL.
    pub fn validate(&self) -> Result<()> {
        validate_source_fields(&self.name, &self.feed_url)
    }
}

pub fn validate_source_fields(name: &str, feed_url: &str) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("source name must not be empty");
    }
    if feed_url.trim().is_empty() {
        anyhow::bail!("source feed URL must not be empty");
    }
    let parsed = url::Url::parse(feed_url)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host().is_none() {
        anyhow::bail!("source feed URL must be an http(s) URL: {}", feed_url);
    }
    Ok(())
}

/// One normalized entry of a source's feed, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for an article; the repository assigns id and created_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Inserted(Article),
    /// Another writer stored the same (source_id, url) first.
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    /// The provider is being short-circuited (e.g. an open circuit breaker).
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("summarization failed: {0}")]
    Transient(#[from] anyhow::Error),
}

impl SummarizeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SummarizeError::Unavailable(_))
    }
}

// Collaborator contracts.
// The crawl pipeline treats every implementation as an independently
// thread-safe black box: it calls them from many tasks at once and never
// holds a lock of its own across the call.

#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Source>>;
    async fn touch_crawled_at(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait ArticleRepository: Send + Sync {
    async fn exists_by_url(&self, source_id: i64, url: &str) -> Result<bool>;
    async fn create(&self, article: NewArticle) -> Result<CreateOutcome>;
}

#[async_trait]
pub trait FeedRetriever: Send + Sync {
    /// Fetch and parse the feed of `source`. The returned sequence is finite.
    async fn retrieve(&self, source: &Source) -> Result<Vec<FeedItem>>;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Best-effort article text extracted from the page at `url`.
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> std::result::Result<String, SummarizeError>;
}

/// Side effect fired after an article is inserted. Implementations log their
/// own failures; nothing is reported back to the pipeline.
#[async_trait]
pub trait NotifyService: Send + Sync {
    async fn notify(&self, article: &Article);
}

/// Hands a freshly inserted article to an indexing backend.
#[async_trait]
pub trait EmbeddingHook: Send + Sync {
    async fn index(&self, article: &Article);
}
