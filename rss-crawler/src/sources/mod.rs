pub mod rss_feed;
pub mod wsj_feed;

pub use rss_feed::RssFeedRetriever;
pub use wsj_feed::WsjFeedRetriever;

use crate::fetcher::Fetcher;
use crate::types::{FeedItem, FeedRetriever, Source, SourceType};
use async_trait::async_trait;
use std::sync::Arc;

/// Routes each source to the retriever of its `SourceType`.
pub struct SourceFeedRetriever {
    rss: RssFeedRetriever,
    wsj: WsjFeedRetriever,
}

impl SourceFeedRetriever {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self {
            rss: RssFeedRetriever::new(fetcher.clone()),
            wsj: WsjFeedRetriever::new(RssFeedRetriever::new(fetcher)),
        }
    }
}

#[async_trait]
impl FeedRetriever for SourceFeedRetriever {
    async fn retrieve(&self, source: &Source) -> anyhow::Result<Vec<FeedItem>> {
        match source.source_type {
            SourceType::Rss => self.rss.retrieve(source).await,
            SourceType::Wsj => self.wsj.retrieve(source).await,
        }
    }
}
