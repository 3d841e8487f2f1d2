use crate::stats::RunAggregator;
use crate::types::{Article, ArticleRepository, CreateOutcome, EmbeddingHook, FeedItem, NewArticle, NotifyService};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum PersistOutcome {
    Inserted(Article),
    Duplicate,
    Failed,
}

/// Deduplicates and stores finished items, then fires the post-insert hooks.
///
/// One persister is shared by every worker of a run. It keeps the
/// `(source_id, url)` keys it has claimed so two workers holding the same
/// URL never both reach the repository.
#[derive(Clone)]
pub struct Persister {
    articles: Arc<dyn ArticleRepository>,
    notifier: Arc<dyn NotifyService>,
    embedder: Arc<dyn EmbeddingHook>,
    stats: Arc<RunAggregator>,
    claimed: Arc<Mutex<HashSet<(i64, String)>>>,
    hooks: TaskTracker,
}

impl Persister {
    pub fn new(
        articles: Arc<dyn ArticleRepository>,
        notifier: Arc<dyn NotifyService>,
        embedder: Arc<dyn EmbeddingHook>,
        stats: Arc<RunAggregator>,
    ) -> Self {
        Self {
            articles,
            notifier,
            embedder,
            stats,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            hooks: TaskTracker::new(),
        }
    }

    /// True when a previous run already stored `url` for the source. Lookup
    /// errors answer `false`; the item is then checked again before insert.
    pub async fn is_stored(&self, source_id: i64, url: &str) -> bool {
        match self.articles.exists_by_url(source_id, url).await {
            Ok(found) => found,
            Err(e) => {
                debug!("Pre-check for {} failed: {:#}", url, e);
                false
            }
        }
    }

    /// Records exactly one of inserted, duplicated or persist error for `item`.
    pub async fn persist(&self, source_id: i64, item: FeedItem, summary: String) -> PersistOutcome {
        let key = (source_id, item.url.clone());
        if !self.claim(&key) {
            debug!("Duplicate within run: {} (source {})", item.url, source_id);
            self.stats.record_duplicate();
            return PersistOutcome::Duplicate;
        }

        match self.articles.exists_by_url(source_id, &item.url).await {
            Ok(true) => {
                debug!("Already stored: {} (source {})", item.url, source_id);
                self.stats.record_duplicate();
                return PersistOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Duplicate check for {} failed: {:#}", item.url, e);
                self.release(&key);
                self.stats.record_persist_error();
                return PersistOutcome::Failed;
            }
        }

        let new_article = NewArticle {
            source_id,
            title: item.title,
            url: item.url,
            content: item.content,
            summary,
            published_at: item.published_at,
        };

        match self.articles.create(new_article).await {
            Ok(CreateOutcome::Inserted(article)) => {
                info!("Stored article {} ({})", article.id, article.url);
                self.stats.record_inserted();
                self.fire_hooks(article.clone());
                PersistOutcome::Inserted(article)
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!("Lost insert race for {} (source {})", key.1, source_id);
                self.stats.record_duplicate();
                PersistOutcome::Duplicate
            }
            Err(e) => {
                error!("Failed to store article {}: {:#}", key.1, e);
                self.release(&key);
                self.stats.record_persist_error();
                PersistOutcome::Failed
            }
        }
    }

    /// Waits for the hooks fired so far, or until `cancel` fires. Hooks still
    /// running on cancellation are left to finish in the background.
    pub async fn drain_hooks(&self, cancel: &CancellationToken) {
        self.hooks.close();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if !self.hooks.is_empty() {
                    warn!("Leaving {} post-insert hooks running", self.hooks.len());
                }
            }
            _ = self.hooks.wait() => {}
        }
    }

    // Hooks run off the pipeline so a slow subscriber never holds a worker.
    fn fire_hooks(&self, article: Article) {
        let notifier = self.notifier.clone();
        let embedder = self.embedder.clone();
        self.hooks.spawn(async move {
            notifier.notify(&article).await;
            embedder.index(&article).await;
        });
    }

    fn claim(&self, key: &(i64, String)) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.insert(key.clone())
    }

    // A failed item gives its key back so a later copy of the URL can retry.
    fn release(&self, key: &(i64, String)) {
        let mut claimed = self.claimed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.remove(key);
    }
}
