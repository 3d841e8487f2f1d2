use crate::config::SummarizeConfig;
use crate::persist::Persister;
use crate::stats::RunAggregator;
use crate::types::{FeedItem, SummarizeError, Summarizer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Second pipeline stage: attaches an AI summary to each enhanced item and
/// hands it to the persister.
#[derive(Clone)]
pub struct SummarizationStage {
    summarizer: Arc<dyn Summarizer>,
    config: SummarizeConfig,
    stats: Arc<RunAggregator>,
    consecutive_unavailable: Arc<AtomicUsize>,
}

impl SummarizationStage {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: SummarizeConfig, stats: Arc<RunAggregator>) -> Self {
        Self {
            summarizer,
            config,
            stats,
            consecutive_unavailable: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Consumes `input` until every sender is gone. Each item is summarized
    /// under one of `parallelism` permits; the permit is released before the
    /// item is persisted.
    pub async fn run(
        self,
        source_id: i64,
        mut input: mpsc::UnboundedReceiver<FeedItem>,
        persister: Persister,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut workers = JoinSet::new();

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = input.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let stage = self.clone();
            let persister = persister.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let summary = {
                    let _permit = permit;
                    stage.summarize(&item, &cancel).await
                };
                let Some(summary) = summary else {
                    return;
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = persister.persist(source_id, item, summary) => {}
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Summarization worker failed: {}", e);
            }
        }
    }

    /// Returns the summary for `item`, an empty string when the summarizer
    /// failed or was skipped, and `None` when cancelled.
    pub async fn summarize(&self, item: &FeedItem, cancel: &CancellationToken) -> Option<String> {
        if item.content.trim().is_empty() {
            debug!("Nothing to summarize for {}", item.url);
            return Some(String::new());
        }

        if self.is_short_circuited() {
            debug!("Summarizer unavailable, skipping {}", item.url);
            self.stats.record_summarize_error();
            return Some(String::new());
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.summarizer.summarize(&item.content) => result,
        };

        match result {
            Ok(summary) => {
                self.consecutive_unavailable.store(0, Ordering::Relaxed);
                Some(summary)
            }
            Err(e) => {
                match &e {
                    SummarizeError::Unavailable(_) => {
                        self.consecutive_unavailable.fetch_add(1, Ordering::Relaxed);
                    }
                    SummarizeError::Transient(_) => {
                        self.consecutive_unavailable.store(0, Ordering::Relaxed);
                    }
                }
                warn!("Summarization of {} failed: {}", item.url, e);
                self.stats.record_summarize_error();
                Some(String::new())
            }
        }
    }

    fn is_short_circuited(&self) -> bool {
        self.config.unavailable_limit > 0
            && self.consecutive_unavailable.load(Ordering::Relaxed) >= self.config.unavailable_limit
    }
}
