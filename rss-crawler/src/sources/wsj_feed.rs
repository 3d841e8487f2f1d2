use crate::sources::RssFeedRetriever;
use crate::types::{FeedItem, FeedRetriever, Source};
use async_trait::async_trait;
use url::Url;

// Appended to teasers of paywalled stories.
const TEASER_SUFFIXES: &[&str] = &[
    "Continue reading your article with a WSJ subscription",
    "Subscribe to WSJ",
    "Already a subscriber? Sign In",
];

/// Wall Street Journal feeds: plain RSS whose links carry tracking
/// parameters (`mod=rss_...`) that change between feeds for the same story.
pub struct WsjFeedRetriever {
    inner: RssFeedRetriever,
}

impl WsjFeedRetriever {
    pub fn new(inner: RssFeedRetriever) -> Self {
        Self { inner }
    }

    pub fn normalize_item(mut item: FeedItem) -> FeedItem {
        item.url = canonical_url(&item.url);
        item.title = item.title.trim().to_string();
        item.content = strip_teaser(&item.content);
        item
    }
}

#[async_trait]
impl FeedRetriever for WsjFeedRetriever {
    async fn retrieve(&self, source: &Source) -> anyhow::Result<Vec<FeedItem>> {
        let items = self.inner.pull(source).await?;
        Ok(items.into_iter().map(Self::normalize_item).collect())
    }
}

fn strip_teaser(content: &str) -> String {
    let mut text = content.trim_end();
    loop {
        let before = text.len();
        for suffix in TEASER_SUFFIXES {
            if let Some(rest) = text.strip_suffix(suffix) {
                text = rest.trim_end();
            }
        }
        if text.len() == before {
            return text.to_string();
        }
    }
}

/// Drops query string and fragment. Unparseable URLs are returned unchanged.
pub fn canonical_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
