use crate::types::{Article, EmbeddingHook, NotifyService, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ArticlePayload<'a> {
    event: &'static str,
    article: &'a Article,
}

/// Posts every newly stored article to a webhook as JSON.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotifyService for WebhookNotifier {
    async fn notify(&self, article: &Article) {
        let payload = ArticlePayload {
            event: "article.created",
            article,
        };

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Notified {} about article {}", self.url, article.id);
            }
            Ok(response) => {
                warn!("Webhook {} answered HTTP {} for article {}", self.url, response.status(), article.id);
            }
            Err(e) => warn!("Webhook {} failed for article {}: {}", self.url, article.id, e),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    id: i64,
    source_id: i64,
    url: String,
    text: String,
}

/// Queues articles for embedding at an external indexing service.
///
/// The request runs in a detached task; the crawl does not wait for it.
pub struct HttpEmbeddingHook {
    client: Client,
    url: String,
}

impl HttpEmbeddingHook {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl EmbeddingHook for HttpEmbeddingHook {
    async fn index(&self, article: &Article) {
        let text = if article.summary.is_empty() {
            format!("{}\n\n{}", article.title, article.content)
        } else {
            format!("{}\n\n{}", article.title, article.summary)
        };
        let request = EmbeddingRequest {
            id: article.id,
            source_id: article.source_id,
            url: article.url.clone(),
            text,
        };
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&request).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Queued article {} for embedding", request.id);
                }
                Ok(response) => {
                    warn!("Embedding service answered HTTP {} for article {}", response.status(), request.id)
                }
                Err(e) => warn!("Embedding request for article {} failed: {}", request.id, e),
            }
        });
    }
}
