//! In-process repositories for development runs and tests.

use crate::types::{Article, ArticleRepository, CreateOutcome, NewArticle, Source, SourceRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemorySourceRepository {
    sources: RwLock<Vec<Source>>,
    touches: RwLock<Vec<(i64, DateTime<Utc>)>>,
    unavailable: bool,
}

impl MemorySourceRepository {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources: RwLock::new(sources),
            ..Self::default()
        }
    }

    /// A repository whose `list_active` always fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Every `touch_crawled_at` call seen so far, in call order.
    pub async fn touches(&self) -> Vec<(i64, DateTime<Utc>)> {
        self.touches.read().await.clone()
    }

    pub async fn get(&self, id: i64) -> Option<Source> {
        self.sources.read().await.iter().find(|s| s.id == id).cloned()
    }
}

#[async_trait]
impl SourceRepository for MemorySourceRepository {
    async fn list_active(&self) -> anyhow::Result<Vec<Source>> {
        if self.unavailable {
            anyhow::bail!("source store unavailable");
        }
        Ok(self.sources.read().await.iter().filter(|s| s.is_active).cloned().collect())
    }

    async fn touch_crawled_at(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut sources = self.sources.write().await;
        let source = sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow::anyhow!("source {} not found", id))?;
        source.last_crawled_at = Some(at);
        source.updated_at = at;
        drop(sources);

        self.touches.write().await.push((id, at));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryArticleRepository {
    articles: RwLock<Vec<Article>>,
    // url -> remaining failing `create` calls
    failing_urls: RwLock<HashMap<String, usize>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
}

impl MemoryArticleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `create` for `url` fail.
    pub async fn fail_on(&self, url: impl Into<String>) {
        self.fail_times(url, usize::MAX).await;
    }

    /// Makes the next `times` calls to `create` for `url` fail.
    pub async fn fail_times(&self, url: impl Into<String>, times: usize) {
        self.failing_urls.write().await.insert(url.into(), times);
    }

    /// Stores an article directly, as if a previous run had inserted it.
    pub async fn seed(&self, article: NewArticle) -> Article {
        let stored = self.materialize(article);
        self.articles.write().await.push(stored.clone());
        stored
    }

    pub async fn articles(&self) -> Vec<Article> {
        self.articles.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.articles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.articles.read().await.is_empty()
    }

    /// Number of `create` calls received, failed ones included.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::Relaxed)
    }

    fn materialize(&self, article: NewArticle) -> Article {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as i64 + 1;
        Article {
            id,
            source_id: article.source_id,
            title: article.title,
            url: article.url,
            content: article.content,
            summary: article.summary,
            published_at: article.published_at,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ArticleRepository for MemoryArticleRepository {
    async fn exists_by_url(&self, source_id: i64, url: &str) -> anyhow::Result<bool> {
        Ok(self
            .articles
            .read()
            .await
            .iter()
            .any(|a| a.source_id == source_id && a.url == url))
    }

    async fn create(&self, article: NewArticle) -> anyhow::Result<CreateOutcome> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        {
            let mut failing = self.failing_urls.write().await;
            if let Some(remaining) = failing.get_mut(&article.url) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    anyhow::bail!("write rejected for {}", article.url);
                }
            }
        }

        let mut articles = self.articles.write().await;
        if articles
            .iter()
            .any(|a| a.source_id == article.source_id && a.url == article.url)
        {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let stored = self.materialize(article);
        articles.push(stored.clone());
        Ok(CreateOutcome::Inserted(stored))
    }
}
