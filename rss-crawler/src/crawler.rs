use crate::config::{ContentFetchConfig, CrawlConfig, SummarizeConfig};
use crate::enhance::ContentEnhancer;
use crate::persist::Persister;
use crate::stats::{CrawlStats, RunAggregator};
use crate::summarize::SummarizationStage;
use crate::types::{
    ArticleRepository, ContentFetcher, CrawlerError, EmbeddingHook, FeedItem, FeedRetriever, NotifyService, Result,
    Source, SourceRepository, Summarizer,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use interfaces::{NoopEmbeddingHook, NoopNotifier};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STORED_CHECK_CONCURRENCY: usize = 16;

/// Runs one crawl over every active source.
pub struct Crawler {
    sources: Arc<dyn SourceRepository>,
    articles: Arc<dyn ArticleRepository>,
    retriever: Arc<dyn FeedRetriever>,
    fetcher: Arc<dyn ContentFetcher>,
    summarizer: Arc<dyn Summarizer>,
    notifier: Arc<dyn NotifyService>,
    embedder: Arc<dyn EmbeddingHook>,
    content_fetch: ContentFetchConfig,
    summarize: SummarizeConfig,
    source_concurrency: usize,
}

// Per-run state shared by every source of the run.
struct RunContext {
    stats: Arc<RunAggregator>,
    enhancer: ContentEnhancer,
    summarization: SummarizationStage,
    persister: Persister,
}

impl Crawler {
    pub fn builder(
        sources: Arc<dyn SourceRepository>,
        articles: Arc<dyn ArticleRepository>,
        retriever: Arc<dyn FeedRetriever>,
        fetcher: Arc<dyn ContentFetcher>,
        summarizer: Arc<dyn Summarizer>,
    ) -> CrawlerBuilder {
        CrawlerBuilder {
            crawler: Crawler {
                sources,
                articles,
                retriever,
                fetcher,
                summarizer,
                notifier: Arc::new(NoopNotifier),
                embedder: Arc::new(NoopEmbeddingHook),
                content_fetch: ContentFetchConfig::default(),
                summarize: SummarizeConfig::default(),
                source_concurrency: 1,
            },
        }
    }

    /// Crawls every active source once.
    ///
    /// Fails only when the source list itself cannot be loaded, or with
    /// `CrawlerError::Cancelled` (carrying the partial statistics) when
    /// `cancel` fires before the run completes. Every other failure is
    /// counted in the returned statistics.
    pub async fn crawl_all_sources(&self, cancel: &CancellationToken) -> Result<CrawlStats> {
        let stats = Arc::new(RunAggregator::new());

        let sources = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CrawlerError::Cancelled { partial: stats.snapshot() });
            }
            loaded = self.sources.list_active() => loaded.map_err(CrawlerError::SourceLoad)?,
        };

        info!("Crawling {} active sources", sources.len());
        stats.add_sources(sources.len());

        let run = RunContext {
            stats: stats.clone(),
            enhancer: ContentEnhancer::new(self.fetcher.clone(), self.content_fetch, stats.clone()),
            summarization: SummarizationStage::new(self.summarizer.clone(), self.summarize, stats.clone()),
            persister: Persister::new(
                self.articles.clone(),
                self.notifier.clone(),
                self.embedder.clone(),
                stats.clone(),
            ),
        };

        stream::iter(sources)
            .for_each_concurrent(self.source_concurrency.max(1), |source| {
                self.crawl_source(source, &run, cancel)
            })
            .await;

        run.persister.drain_hooks(cancel).await;

        let final_stats = stats.snapshot();
        if cancel.is_cancelled() {
            warn!("Crawl cancelled: {}", final_stats);
            return Err(CrawlerError::Cancelled { partial: final_stats });
        }

        info!("Crawl finished: {}", final_stats);
        Ok(final_stats)
    }

    async fn crawl_source(&self, source: Source, run: &RunContext, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }

        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            retrieved = self.retriever.retrieve(&source) => retrieved,
        };

        let items = match retrieved {
            Ok(items) => items,
            Err(e) => {
                error!("Failed to retrieve feed for source {} ({}): {:#}", source.id, source.feed_url, e);
                run.stats.record_source_error();
                return;
            }
        };

        info!("Source {} ({}): {} feed items", source.id, source.name, items.len());
        run.stats.add_feed_items(items.len());

        let Some(items) = self.drop_stored(source.id, items, run, cancel).await else {
            return;
        };

        let (enhanced_tx, enhanced_rx) = mpsc::unbounded_channel();
        let enhancing = tokio::spawn(run.enhancer.clone().run(items, enhanced_tx, cancel.clone()));

        run.summarization
            .clone()
            .run(source.id, enhanced_rx, run.persister.clone(), cancel.clone())
            .await;

        if let Err(e) = enhancing.await {
            warn!("Content enhancement for source {} ended abnormally: {}", source.id, e);
        }

        if cancel.is_cancelled() {
            debug!("Not touching source {}: run cancelled", source.id);
            return;
        }

        if let Err(e) = self.sources.touch_crawled_at(source.id, Utc::now()).await {
            warn!("Failed to update last crawl time of source {}: {:#}", source.id, e);
        }
    }

    // Items stored by an earlier run are counted as duplicates up front so
    // they cost neither a page fetch nor a summarizer call. `None` when
    // cancelled.
    async fn drop_stored(
        &self,
        source_id: i64,
        items: Vec<FeedItem>,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Option<Vec<FeedItem>> {
        let checks = stream::iter(items)
            .map(|item| async move {
                let stored = run.persister.is_stored(source_id, &item.url).await;
                (item, stored)
            })
            .buffered(STORED_CHECK_CONCURRENCY)
            .collect::<Vec<_>>();

        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            checked = checks => checked,
        };

        let mut fresh = Vec::with_capacity(checked.len());
        for (item, stored) in checked {
            if stored {
                debug!("Already stored: {} (source {})", item.url, source_id);
                run.stats.record_duplicate();
            } else {
                fresh.push(item);
            }
        }
        Some(fresh)
    }
}

/// Builder for wiring optional hooks and tuning the pools.
pub struct CrawlerBuilder {
    crawler: Crawler,
}

impl CrawlerBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn NotifyService>) -> Self {
        self.crawler.notifier = notifier;
        self
    }

    pub fn embedding_hook(mut self, embedder: Arc<dyn EmbeddingHook>) -> Self {
        self.crawler.embedder = embedder;
        self
    }

    pub fn content_fetch(mut self, config: ContentFetchConfig) -> Self {
        self.crawler.content_fetch = config;
        self
    }

    pub fn summarize(mut self, config: SummarizeConfig) -> Self {
        self.crawler.summarize = config;
        self
    }

    pub fn source_concurrency(mut self, n: usize) -> Self {
        self.crawler.source_concurrency = n.max(1);
        self
    }

    /// Applies the pool settings of `config`.
    pub fn config(self, config: &CrawlConfig) -> Self {
        self.content_fetch(config.content_fetch)
            .summarize(config.summarize)
            .source_concurrency(config.source_concurrency)
    }

    pub fn build(self) -> Crawler {
        self.crawler
    }
}
