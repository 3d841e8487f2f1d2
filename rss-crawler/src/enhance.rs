use crate::config::ContentFetchConfig;
use crate::stats::RunAggregator;
use crate::types::{ContentFetcher, FeedItem};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// First pipeline stage: replaces thin feed content with the full page text.
#[derive(Clone)]
pub struct ContentEnhancer {
    fetcher: Arc<dyn ContentFetcher>,
    config: ContentFetchConfig,
    stats: Arc<RunAggregator>,
}

impl ContentEnhancer {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, config: ContentFetchConfig, stats: Arc<RunAggregator>) -> Self {
        Self { fetcher, config, stats }
    }

    pub fn needs_enhancement(&self, item: &FeedItem) -> bool {
        item.content.chars().count() < self.config.threshold
    }

    /// Resolves every item of `items` and forwards it to `output`.
    ///
    /// Items with enough content are forwarded immediately. The others are
    /// fetched by workers holding one of `parallelism` permits, so no more
    /// than that many fetches are ever in flight. Returns once every spawned
    /// worker finished; dropping the last sender then closes `output`.
    pub async fn run(
        self,
        items: Vec<FeedItem>,
        output: mpsc::UnboundedSender<FeedItem>,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut workers = JoinSet::new();

        for item in items {
            if cancel.is_cancelled() {
                break;
            }

            if !self.needs_enhancement(&item) {
                debug!("Content of {} is sufficient, skipping page fetch", item.url);
                if output.send(item).is_err() {
                    break;
                }
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let enhancer = self.clone();
            let output = output.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let resolved = {
                    let _permit = permit;
                    enhancer.enhance(item, &cancel).await
                };
                if let Some(item) = resolved {
                    // The receiver only goes away when the run is cancelled.
                    let _ = output.send(item);
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Content enhancement worker failed: {}", e);
            }
        }
    }

    /// Fetches the full page for `item`. On failure the original content is
    /// kept and the failure is counted. Returns `None` only when cancelled.
    pub async fn enhance(&self, mut item: FeedItem, cancel: &CancellationToken) -> Option<FeedItem> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            fetched = self.fetcher.fetch(&item.url) => fetched,
        };

        match fetched {
            Ok(text) if !text.trim().is_empty() => {
                debug!(
                    "Enhanced {} from {} to {} characters",
                    item.url,
                    item.content.chars().count(),
                    text.chars().count()
                );
                item.content = text;
            }
            Ok(_) => {
                warn!("Page fetch for {} returned no text, keeping feed content", item.url);
                self.stats.record_enhance_error();
            }
            Err(e) => {
                warn!("Page fetch for {} failed, keeping feed content: {:#}", item.url, e);
                self.stats.record_enhance_error();
            }
        }

        Some(item)
    }
}
