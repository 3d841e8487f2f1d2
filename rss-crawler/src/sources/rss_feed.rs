use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use crate::types::{CrawlerError, FeedItem, FeedRetriever, Source};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct CacheValidators {
    etag: Option<String>,
    last_modified: Option<String>,
}

/// Generic RSS / Atom retriever.
///
/// Remembers the `ETag` / `Last-Modified` validators of every source it has
/// fetched, so an unchanged feed costs a 304 and yields no items.
pub struct RssFeedRetriever {
    fetcher: Arc<Fetcher>,
    validators: Mutex<HashMap<i64, CacheValidators>>,
}

impl RssFeedRetriever {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self {
            fetcher,
            validators: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pull(&self, source: &Source) -> crate::types::Result<Vec<FeedItem>> {
        info!("Pulling feed of {}: {}", source.name, source.feed_url);

        let cached = self.validators.lock().await.get(&source.id).cloned().unwrap_or_default();

        let fetch_result = self
            .fetcher
            .fetch_feed(&source.feed_url, cached.etag.as_deref(), cached.last_modified.as_deref())
            .await?;

        if !fetch_result.success {
            let error_msg = fetch_result.error.unwrap_or_else(|| "Fetch failed".to_string());
            return Err(CrawlerError::General(error_msg));
        }

        let content = match fetch_result.content {
            Some(content) => content,
            None => {
                debug!("Feed {} not modified since last crawl", source.feed_url);
                return Ok(Vec::new());
            }
        };

        if !FeedParser::is_valid_feed_content(&content) {
            warn!("{} does not look like a feed document", source.feed_url);
        }
        let parsed = FeedParser::parse_feed(&content)?;

        self.validators.lock().await.insert(
            source.id,
            CacheValidators {
                etag: fetch_result.etag,
                last_modified: fetch_result.last_modified,
            },
        );

        info!(
            "Pulled {} items from {} ({})",
            parsed.items.len(),
            source.feed_url,
            parsed.title.as_deref().unwrap_or("untitled feed")
        );
        Ok(parsed.items)
    }
}

#[async_trait]
impl FeedRetriever for RssFeedRetriever {
    async fn retrieve(&self, source: &Source) -> anyhow::Result<Vec<FeedItem>> {
        Ok(self.pull(source).await?)
    }
}
