pub mod types;
pub mod config;
pub mod stats;
pub mod fetcher;
pub mod parser;
pub mod content;
pub mod sources;
pub mod enhance;
pub mod summarize;
pub mod persist;
pub mod crawler;
pub mod db;
pub mod feed_manager;
pub mod article_store;
pub mod llm_adapter;
pub mod hooks;
pub mod memory;

pub use types::*;
pub use config::{ContentFetchConfig, CrawlConfig, LlmConfig, SummarizeConfig};
pub use stats::{CrawlStats, RunAggregator};
pub use fetcher::Fetcher;
pub use parser::FeedParser;
pub use content::HttpContentFetcher;
pub use sources::SourceFeedRetriever;
pub use crawler::{Crawler, CrawlerBuilder};
pub use feed_manager::FeedManager;
pub use article_store::ArticleStore;
pub use llm_adapter::{LlmSummarizer, MockSummarizer};
pub use hooks::{HttpEmbeddingHook, WebhookNotifier};
