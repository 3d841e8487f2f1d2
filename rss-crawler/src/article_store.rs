use crate::types::{Article, ArticleRepository, CreateOutcome, NewArticle, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const ARTICLE_COLUMNS: &str = "id, source_id, title, url, content, summary, published_at, created_at";

/// PostgreSQL-backed article storage. `(source_id, url)` is unique.
pub struct ArticleStore {
    db: PgPool,
}

impl ArticleStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn article_exists(&self, source_id: i64, url: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM articles WHERE source_id = $1 AND url = $2)",
        )
        .bind(source_id)
        .bind(url)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    /// Inserts the article unless the URL is already stored for its source.
    pub async fn insert_article(&self, article: &NewArticle) -> Result<Option<Article>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO articles (source_id, title, url, content, summary, published_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (source_id, url) DO NOTHING
            RETURNING {}
            "#,
            ARTICLE_COLUMNS
        ))
        .bind(article.source_id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.content)
        .bind(&article.summary)
        .bind(article.published_at)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(article_from_row).transpose()
    }

    pub async fn recent_articles(&self, source_id: Option<i64>, limit: usize) -> Result<Vec<Article>> {
        let rows = match source_id {
            Some(source_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM articles WHERE source_id = $1 ORDER BY created_at DESC LIMIT $2",
                    ARTICLE_COLUMNS
                ))
                .bind(source_id)
                .bind(limit as i64)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM articles ORDER BY created_at DESC LIMIT $1",
                    ARTICLE_COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.iter().map(article_from_row).collect()
    }

    pub async fn article_count(&self, source_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE source_id = $1")
            .bind(source_id)
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl ArticleRepository for ArticleStore {
    async fn exists_by_url(&self, source_id: i64, url: &str) -> anyhow::Result<bool> {
        Ok(self.article_exists(source_id, url).await?)
    }

    async fn create(&self, article: NewArticle) -> anyhow::Result<CreateOutcome> {
        Ok(match self.insert_article(&article).await? {
            Some(stored) => CreateOutcome::Inserted(stored),
            None => CreateOutcome::AlreadyExists,
        })
    }
}

fn article_from_row(row: &PgRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
    })
}
