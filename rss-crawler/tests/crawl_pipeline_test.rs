use async_trait::async_trait;
use chrono::Utc;
use rss_crawler::memory::{MemoryArticleRepository, MemorySourceRepository};
use rss_crawler::{
    Article, ContentFetchConfig, ContentFetcher, CrawlerBuilder, Crawler, CrawlerError, EmbeddingHook, FeedItem,
    FeedRetriever, NewArticle, NotifyService, Source, SourceType, SummarizeConfig, SummarizeError, Summarizer,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn source(id: i64) -> Source {
    let now = Utc::now();
    Source {
        id,
        name: format!("Source {}", id),
        feed_url: format!("https://news{}.example.com/feed.xml", id),
        source_type: SourceType::Rss,
        is_active: true,
        last_crawled_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn short_item(url: &str) -> FeedItem {
    FeedItem {
        title: format!("Headline for {}", url),
        url: url.to_string(),
        content: "A short teaser from the feed.".to_string(),
        published_at: Some(Utc::now()),
    }
}

fn long_item(url: &str) -> FeedItem {
    FeedItem {
        content: "The full story is already part of the feed entry. ".repeat(40),
        ..short_item(url)
    }
}

/// Tracks how many calls are running at once.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct StaticRetriever {
    feeds: HashMap<i64, Vec<FeedItem>>,
    failing: HashSet<i64>,
    calls: Mutex<Vec<i64>>,
}

impl StaticRetriever {
    fn with_feed(mut self, source_id: i64, items: Vec<FeedItem>) -> Self {
        self.feeds.insert(source_id, items);
        self
    }

    fn failing_for(mut self, source_id: i64) -> Self {
        self.failing.insert(source_id);
        self
    }

    fn calls(&self) -> Vec<i64> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedRetriever for StaticRetriever {
    async fn retrieve(&self, source: &Source) -> anyhow::Result<Vec<FeedItem>> {
        self.calls.lock().unwrap().push(source.id);
        if self.failing.contains(&source.id) {
            anyhow::bail!("feed of source {} answered HTTP 503", source.id);
        }
        Ok(self.feeds.get(&source.id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct CountingFetcher {
    gauge: Gauge,
    delay: Duration,
    fetched: Mutex<Vec<String>>,
}

impl CountingFetcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn fetched(&self) -> HashSet<String> {
        self.fetched.lock().unwrap().iter().cloned().collect()
    }

    fn calls(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        self.gauge.enter();
        self.fetched.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.exit();
        Ok(format!("Full article text fetched from {}. It has several sentences.", url))
    }
}

struct FailingFetcher;

#[async_trait]
impl ContentFetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        anyhow::bail!("connection reset while fetching {}", url)
    }
}

struct HangingFetcher;

#[async_trait]
impl ContentFetcher for HangingFetcher {
    async fn fetch(&self, _url: &str) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(String::new())
    }
}

struct BlankPageFetcher;

#[async_trait]
impl ContentFetcher for BlankPageFetcher {
    async fn fetch(&self, _url: &str) -> anyhow::Result<String> {
        Ok("  \n\t  ".to_string())
    }
}

#[derive(Default)]
struct CountingSummarizer {
    gauge: Gauge,
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        self.gauge.enter();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.exit();
        Ok(format!("Summary of {} characters.", text.chars().count()))
    }
}

struct FailingSummarizer {
    unavailable: bool,
    calls: AtomicUsize,
}

impl FailingSummarizer {
    fn transient() -> Self {
        Self {
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn unavailable() -> Self {
        Self {
            unavailable: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            Err(SummarizeError::Unavailable("circuit open".to_string()))
        } else {
            Err(SummarizeError::Transient(anyhow::anyhow!("model returned garbage")))
        }
    }
}

#[derive(Clone, Copy)]
enum Reply {
    Unavailable,
    Transient,
}

/// Answers with the scripted failures in call order, then succeeds.
struct ScriptedSummarizer {
    script: Vec<Reply>,
    calls: AtomicUsize,
}

impl ScriptedSummarizer {
    fn new(script: Vec<Reply>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String, SummarizeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.get(call) {
            Some(Reply::Unavailable) => Err(SummarizeError::Unavailable("overloaded".to_string())),
            Some(Reply::Transient) => Err(SummarizeError::Transient(anyhow::anyhow!("bad output"))),
            None => Ok("Scripted summary.".to_string()),
        }
    }
}

struct HangingNotifier;

#[async_trait]
impl NotifyService for HangingNotifier {
    async fn notify(&self, _article: &Article) {
        tokio::time::sleep(Duration::from_secs(600)).await;
    }
}

#[derive(Default)]
struct RecordingHook {
    notified: Mutex<Vec<i64>>,
    indexed: Mutex<Vec<i64>>,
}

#[async_trait]
impl NotifyService for RecordingHook {
    async fn notify(&self, article: &Article) {
        self.notified.lock().unwrap().push(article.id);
    }
}

#[async_trait]
impl EmbeddingHook for RecordingHook {
    async fn index(&self, article: &Article) {
        self.indexed.lock().unwrap().push(article.id);
    }
}

struct Harness {
    sources: Arc<MemorySourceRepository>,
    articles: Arc<MemoryArticleRepository>,
}

impl Harness {
    fn new(sources: Vec<Source>) -> Self {
        Self {
            sources: Arc::new(MemorySourceRepository::new(sources)),
            articles: Arc::new(MemoryArticleRepository::new()),
        }
    }

    fn crawler(
        &self,
        retriever: Arc<dyn FeedRetriever>,
        fetcher: Arc<dyn ContentFetcher>,
        summarizer: Arc<dyn Summarizer>,
    ) -> CrawlerBuilder {
        Crawler::builder(self.sources.clone(), self.articles.clone(), retriever, fetcher, summarizer)
    }
}

#[tokio::test]
async fn test_end_to_end_mixed_content() -> anyhow::Result<()> {
    init_tracing();

    let items = vec![
        long_item("https://news1.example.com/long-1"),
        short_item("https://news1.example.com/short-1"),
        long_item("https://news1.example.com/long-2"),
        short_item("https://news1.example.com/short-2"),
        short_item("https://news1.example.com/short-3"),
    ];
    let harness = Harness::new(vec![source(1)]);
    let fetcher = Arc::new(CountingFetcher::default());
    let summarizer = Arc::new(CountingSummarizer::default());
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            fetcher.clone(),
            summarizer.clone(),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;
    info!("Run finished: {}", stats);

    assert_eq!(stats.sources, 1);
    assert_eq!(stats.feed_items, 5);
    assert_eq!(stats.inserted, 5);
    assert_eq!(stats.duplicated, 0);
    assert_eq!(stats.summarize_errors, 0);
    assert_eq!(stats.enhance_errors, 0);
    assert_eq!(stats.unaccounted(), 0);

    let expected: HashSet<String> = [
        "https://news1.example.com/short-1",
        "https://news1.example.com/short-2",
        "https://news1.example.com/short-3",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(fetcher.fetched(), expected);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 5);

    for article in harness.articles.articles().await {
        assert!(article.summary.starts_with("Summary of"));
        if article.url.contains("short") {
            assert!(article.content.starts_with("Full article text fetched from"));
        } else {
            assert!(article.content.starts_with("The full story"));
        }
    }

    let touches = harness.sources.touches().await;
    assert_eq!(touches.len(), 1);
    assert_eq!(touches[0].0, 1);
    Ok(())
}

#[tokio::test]
async fn test_content_fetch_parallelism_is_bounded() -> anyhow::Result<()> {
    init_tracing();

    let items: Vec<FeedItem> = (0..24)
        .map(|i| short_item(&format!("https://news1.example.com/story-{}", i)))
        .collect();
    let harness = Harness::new(vec![source(1)]);
    let fetcher = Arc::new(CountingFetcher::with_delay(Duration::from_millis(20)));
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            fetcher.clone(),
            Arc::new(CountingSummarizer::default()),
        )
        .content_fetch(ContentFetchConfig {
            parallelism: 3,
            threshold: 1500,
        })
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(fetcher.calls(), 24);
    assert!(fetcher.gauge.peak() <= 3, "peak was {}", fetcher.gauge.peak());
    assert!(fetcher.gauge.peak() >= 1);
    assert_eq!(stats.inserted, 24);
    Ok(())
}

#[tokio::test]
async fn test_summarize_parallelism_is_bounded() -> anyhow::Result<()> {
    init_tracing();

    let items: Vec<FeedItem> = (0..15)
        .map(|i| long_item(&format!("https://news1.example.com/story-{}", i)))
        .collect();
    let harness = Harness::new(vec![source(1)]);
    let summarizer = Arc::new(CountingSummarizer {
        delay: Duration::from_millis(15),
        ..CountingSummarizer::default()
    });
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            Arc::new(CountingFetcher::default()),
            summarizer.clone(),
        )
        .summarize(SummarizeConfig {
            parallelism: 2,
            unavailable_limit: 3,
        })
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.inserted, 15);
    assert!(summarizer.gauge.peak() <= 2, "peak was {}", summarizer.gauge.peak());
    Ok(())
}

#[tokio::test]
async fn test_content_at_threshold_skips_fetch() -> anyhow::Result<()> {
    init_tracing();

    let mut exact = short_item("https://news1.example.com/exact");
    exact.content = "a".repeat(100);
    let mut below = short_item("https://news1.example.com/below");
    below.content = "b".repeat(99);

    let harness = Harness::new(vec![source(1)]);
    let fetcher = Arc::new(CountingFetcher::default());
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![exact, below])),
            fetcher.clone(),
            Arc::new(CountingSummarizer::default()),
        )
        .content_fetch(ContentFetchConfig {
            parallelism: 4,
            threshold: 100,
        })
        .build();

    crawler.crawl_all_sources(&CancellationToken::new()).await?;

    let fetched = fetcher.fetched();
    assert!(!fetched.contains("https://news1.example.com/exact"));
    assert!(fetched.contains("https://news1.example.com/below"));
    Ok(())
}

#[tokio::test]
async fn test_failed_fetch_keeps_feed_content() -> anyhow::Result<()> {
    init_tracing();

    let item = short_item("https://news1.example.com/paywalled");
    let original = item.content.clone();
    let harness = Harness::new(vec![source(1)]);
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![item])),
            Arc::new(FailingFetcher),
            Arc::new(CountingSummarizer::default()),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.enhance_errors, 1);
    assert_eq!(stats.inserted, 1);
    let articles = harness.articles.articles().await;
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].content, original);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_urls_in_one_feed_insert_once() -> anyhow::Result<()> {
    init_tracing();

    let url = "https://news1.example.com/same-story";
    let harness = Harness::new(vec![source(1)]);
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![short_item(url), long_item(url)])),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.feed_items, 2);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.duplicated, 1);
    assert_eq!(harness.articles.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_previously_stored_url_counts_as_duplicate() -> anyhow::Result<()> {
    init_tracing();

    let url = "https://news1.example.com/yesterday";
    let harness = Harness::new(vec![source(1)]);
    harness
        .articles
        .seed(NewArticle {
            source_id: 1,
            title: "Yesterday".to_string(),
            url: url.to_string(),
            content: "Old body".to_string(),
            summary: "Old summary".to_string(),
            published_at: None,
        })
        .await;

    let hooks = Arc::new(RecordingHook::default());
    let fetcher = Arc::new(CountingFetcher::default());
    let summarizer = Arc::new(CountingSummarizer::default());
    let crawler = harness
        .crawler(
            Arc::new(
                StaticRetriever::default()
                    .with_feed(1, vec![short_item(url), long_item("https://news1.example.com/today")]),
            ),
            fetcher.clone(),
            summarizer.clone(),
        )
        .notifier(hooks.clone())
        .embedding_hook(hooks.clone())
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.duplicated, 1);
    assert_eq!(harness.articles.create_calls(), 1);
    assert_eq!(stats.unaccounted(), 0);

    // The stored item is dropped before it costs a page fetch or a summary.
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

    // Hooks fire for the inserted article only.
    let articles = harness.articles.articles().await;
    let today = articles
        .iter()
        .find(|a| a.url.ends_with("/today"))
        .ok_or_else(|| anyhow::anyhow!("new article missing"))?;
    assert_eq!(*hooks.notified.lock().unwrap(), vec![today.id]);
    assert_eq!(*hooks.indexed.lock().unwrap(), vec![today.id]);
    Ok(())
}

#[tokio::test]
async fn test_failing_summarizer_still_inserts() -> anyhow::Result<()> {
    init_tracing();

    let items: Vec<FeedItem> = (0..4)
        .map(|i| long_item(&format!("https://news1.example.com/story-{}", i)))
        .collect();
    let harness = Harness::new(vec![source(1)]);
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            Arc::new(CountingFetcher::default()),
            Arc::new(FailingSummarizer::transient()),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.inserted, 4);
    assert_eq!(stats.summarize_errors, 4);
    assert!(harness.articles.articles().await.iter().all(|a| a.summary.is_empty()));
    Ok(())
}

#[tokio::test]
async fn test_unavailable_summarizer_is_skipped_after_limit() -> anyhow::Result<()> {
    init_tracing();

    let items: Vec<FeedItem> = (0..6)
        .map(|i| long_item(&format!("https://news1.example.com/story-{}", i)))
        .collect();
    let harness = Harness::new(vec![source(1)]);
    let summarizer = Arc::new(FailingSummarizer::unavailable());
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            Arc::new(CountingFetcher::default()),
            summarizer.clone(),
        )
        .summarize(SummarizeConfig {
            parallelism: 1,
            unavailable_limit: 2,
        })
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(stats.summarize_errors, 6);
    assert_eq!(stats.inserted, 6);
    Ok(())
}

#[tokio::test]
async fn test_persist_failure_is_counted() -> anyhow::Result<()> {
    init_tracing();

    let harness = Harness::new(vec![source(1)]);
    harness.articles.fail_on("https://news1.example.com/broken").await;
    let hooks = Arc::new(RecordingHook::default());
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(
                1,
                vec![
                    long_item("https://news1.example.com/broken"),
                    long_item("https://news1.example.com/fine"),
                ],
            )),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .notifier(hooks.clone())
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.feed_items, 2);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.persist_errors, 1);
    assert_eq!(stats.unaccounted(), 0);
    assert_eq!(hooks.notified.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retrieval_failure_is_isolated() -> anyhow::Result<()> {
    init_tracing();

    let harness = Harness::new(vec![source(1), source(2)]);
    let retriever = Arc::new(
        StaticRetriever::default()
            .failing_for(1)
            .with_feed(2, vec![long_item("https://news2.example.com/a")]),
    );
    let crawler = harness
        .crawler(
            retriever.clone(),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.sources, 2);
    assert_eq!(stats.source_errors, 1);
    assert_eq!(stats.inserted, 1);
    assert_eq!(retriever.calls(), vec![1, 2]);

    let touched: Vec<i64> = harness.sources.touches().await.into_iter().map(|(id, _)| id).collect();
    assert_eq!(touched, vec![2]);
    Ok(())
}

#[tokio::test]
async fn test_inactive_sources_are_skipped() -> anyhow::Result<()> {
    init_tracing();

    let mut paused = source(2);
    paused.is_active = false;
    let harness = Harness::new(vec![source(1), paused]);
    let retriever = Arc::new(StaticRetriever::default());
    let crawler = harness
        .crawler(
            retriever.clone(),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.sources, 1);
    assert_eq!(retriever.calls(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_sources_crawled_concurrently() -> anyhow::Result<()> {
    init_tracing();

    let sources: Vec<Source> = (1..=4).map(source).collect();
    let mut retriever = StaticRetriever::default();
    for id in 1..=4 {
        let items = (0..3)
            .map(|i| short_item(&format!("https://news{}.example.com/story-{}", id, i)))
            .collect();
        retriever = retriever.with_feed(id, items);
    }
    let harness = Harness::new(sources);
    let crawler = harness
        .crawler(
            Arc::new(retriever),
            Arc::new(CountingFetcher::with_delay(Duration::from_millis(5))),
            Arc::new(CountingSummarizer::default()),
        )
        .source_concurrency(3)
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.feed_items, 12);
    assert_eq!(stats.inserted, 12);
    assert_eq!(harness.sources.touches().await.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_source_load_failure_is_fatal() -> anyhow::Result<()> {
    init_tracing();

    let crawler = Crawler::builder(
        Arc::new(MemorySourceRepository::unavailable()),
        Arc::new(MemoryArticleRepository::new()),
        Arc::new(StaticRetriever::default()),
        Arc::new(CountingFetcher::default()),
        Arc::new(CountingSummarizer::default()),
    )
    .build();

    let result = crawler.crawl_all_sources(&CancellationToken::new()).await;
    assert!(matches!(result, Err(CrawlerError::SourceLoad(_))));
    Ok(())
}

#[tokio::test]
async fn test_cancellation_mid_run_returns_promptly() -> anyhow::Result<()> {
    init_tracing();

    let items: Vec<FeedItem> = (0..10)
        .map(|i| short_item(&format!("https://news1.example.com/story-{}", i)))
        .collect();
    let harness = Harness::new(vec![source(1)]);
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            Arc::new(HangingFetcher),
            Arc::new(CountingSummarizer::default()),
        )
        .content_fetch(ContentFetchConfig {
            parallelism: 2,
            threshold: 1500,
        })
        .build();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let result = tokio::time::timeout(Duration::from_secs(5), crawler.crawl_all_sources(&cancel)).await?;

    match result {
        Err(CrawlerError::Cancelled { partial }) => {
            assert_eq!(partial.feed_items, 10);
            assert_eq!(partial.inserted, 0);
        }
        other => panic!("expected a cancelled run, got {:?}", other),
    }
    assert!(harness.sources.touches().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start() -> anyhow::Result<()> {
    init_tracing();

    let harness = Harness::new(vec![source(1)]);
    let retriever = Arc::new(StaticRetriever::default().with_feed(1, vec![long_item("https://news1.example.com/a")]));
    let crawler = harness
        .crawler(
            retriever.clone(),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .build();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = crawler.crawl_all_sources(&cancel).await;
    assert!(matches!(result, Err(CrawlerError::Cancelled { .. })));
    assert!(retriever.calls().is_empty());
    assert!(harness.articles.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_hanging_hook_does_not_block_cancellation() -> anyhow::Result<()> {
    init_tracing();

    let harness = Harness::new(vec![source(1)]);
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![long_item("https://news1.example.com/a")])),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .notifier(Arc::new(HangingNotifier))
        .build();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let result = tokio::time::timeout(Duration::from_secs(3), crawler.crawl_all_sources(&cancel)).await?;

    match result {
        Err(CrawlerError::Cancelled { partial }) => {
            assert_eq!(partial.inserted, 1);
            assert_eq!(partial.unaccounted(), 0);
        }
        other => panic!("expected a cancelled run, got {:?}", other),
    }
    assert_eq!(harness.articles.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_same_url_in_two_sources_inserts_twice() -> anyhow::Result<()> {
    init_tracing();

    let url = "https://shared.example.com/story";
    let harness = Harness::new(vec![source(1), source(2)]);
    let crawler = harness
        .crawler(
            Arc::new(
                StaticRetriever::default()
                    .with_feed(1, vec![long_item(url)])
                    .with_feed(2, vec![long_item(url)]),
            ),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer::default()),
        )
        .source_concurrency(2)
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.duplicated, 0);
    let mut owners: Vec<i64> = harness.articles.articles().await.iter().map(|a| a.source_id).collect();
    owners.sort();
    assert_eq!(owners, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn test_blank_extraction_keeps_feed_content() -> anyhow::Result<()> {
    init_tracing();

    let item = short_item("https://news1.example.com/video-only");
    let original = item.content.clone();
    let harness = Harness::new(vec![source(1)]);
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![item])),
            Arc::new(BlankPageFetcher),
            Arc::new(CountingSummarizer::default()),
        )
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.enhance_errors, 1);
    assert_eq!(stats.inserted, 1);
    assert_eq!(harness.articles.articles().await[0].content, original);
    Ok(())
}

#[tokio::test]
async fn test_transient_error_resets_unavailable_streak() -> anyhow::Result<()> {
    init_tracing();

    let items: Vec<FeedItem> = (0..6)
        .map(|i| long_item(&format!("https://news1.example.com/story-{}", i)))
        .collect();
    let harness = Harness::new(vec![source(1)]);
    let summarizer = Arc::new(ScriptedSummarizer::new(vec![
        Reply::Unavailable,
        Reply::Transient,
        Reply::Unavailable,
        Reply::Transient,
        Reply::Unavailable,
    ]));
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, items)),
            Arc::new(CountingFetcher::default()),
            summarizer.clone(),
        )
        .summarize(SummarizeConfig {
            parallelism: 1,
            unavailable_limit: 2,
        })
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    // Never two Unavailable in a row, so every item reaches the summarizer.
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 6);
    assert_eq!(stats.summarize_errors, 5);
    assert_eq!(stats.inserted, 6);
    Ok(())
}

#[tokio::test]
async fn test_failed_insert_frees_url_for_later_copy() -> anyhow::Result<()> {
    init_tracing();

    let url = "https://news1.example.com/flaky";
    let harness = Harness::new(vec![source(1)]);
    harness.articles.fail_times(url, 1).await;
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![long_item(url), long_item(url)])),
            Arc::new(CountingFetcher::default()),
            Arc::new(CountingSummarizer {
                delay: Duration::from_millis(20),
                ..CountingSummarizer::default()
            }),
        )
        .summarize(SummarizeConfig {
            parallelism: 1,
            unavailable_limit: 3,
        })
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(stats.persist_errors, 1);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.duplicated, 0);
    assert_eq!(harness.articles.create_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_content_skips_summarizer() -> anyhow::Result<()> {
    init_tracing();

    let mut item = short_item("https://news1.example.com/photo-gallery");
    item.content = String::new();
    let harness = Harness::new(vec![source(1)]);
    let summarizer = Arc::new(CountingSummarizer::default());
    let crawler = harness
        .crawler(
            Arc::new(StaticRetriever::default().with_feed(1, vec![item])),
            Arc::new(CountingFetcher::default()),
            summarizer.clone(),
        )
        .content_fetch(ContentFetchConfig {
            parallelism: 1,
            threshold: 0,
        })
        .build();

    let stats = crawler.crawl_all_sources(&CancellationToken::new()).await?;

    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(stats.summarize_errors, 0);
    assert_eq!(stats.inserted, 1);
    assert!(harness.articles.articles().await[0].summary.is_empty());
    Ok(())
}
