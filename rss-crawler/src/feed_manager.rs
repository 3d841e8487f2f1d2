use crate::types::{CrawlerError, Result, Source, SourceRepository, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, info};

const SOURCE_COLUMNS: &str =
    "id, name, feed_url, source_type, is_active, last_crawled_at, created_at, updated_at";

/// PostgreSQL-backed registry of feed sources.
pub struct FeedManager {
    db: PgPool,
}

impl FeedManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn add_source(&self, name: &str, feed_url: &str, source_type: SourceType) -> Result<Source> {
        interfaces::validate_source_fields(name, feed_url)
            .map_err(|e| CrawlerError::InvalidSource(e.to_string()))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sources (name, feed_url, source_type, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, true, NOW(), NOW())
            RETURNING {}
            "#,
            SOURCE_COLUMNS
        ))
        .bind(name.trim())
        .bind(feed_url.trim())
        .bind(source_type.as_str())
        .fetch_one(&self.db)
        .await?;

        let source = source_from_row(&row)?;
        info!("Added source {} ({}) with ID {}", source.name, source.feed_url, source.id);
        Ok(source)
    }

    pub async fn get_source(&self, id: i64) -> Result<Source> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = $1", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(CrawlerError::SourceNotFound { id }),
        }
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!("SELECT {} FROM sources ORDER BY id", SOURCE_COLUMNS))
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(source_from_row).collect()
    }

    pub async fn list_active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE is_active = true ORDER BY id",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    pub async fn update_last_crawled(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET last_crawled_at = $1, updated_at = NOW() WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CrawlerError::SourceNotFound { id });
        }

        debug!("Source {} crawled at {}", id, at);
        Ok(())
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET is_active = $1, updated_at = NOW() WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CrawlerError::SourceNotFound { id });
        }

        info!("Source {} is now {}", id, if active { "active" } else { "inactive" });
        Ok(())
    }

    pub async fn get_source_stats(&self) -> Result<HashMap<String, i64>> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_sources,
                COUNT(*) FILTER (WHERE is_active) AS active_sources,
                COUNT(*) FILTER (WHERE is_active AND last_crawled_at IS NULL) AS never_crawled
            FROM sources
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        let mut stats = HashMap::new();
        for key in ["total_sources", "active_sources", "never_crawled"] {
            stats.insert(key.to_string(), row.try_get::<i64, _>(key)?);
        }
        Ok(stats)
    }
}

#[async_trait]
impl SourceRepository for FeedManager {
    async fn list_active(&self) -> anyhow::Result<Vec<Source>> {
        Ok(self.list_active_sources().await?)
    }

    async fn touch_crawled_at(&self, id: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        Ok(self.update_last_crawled(id, at).await?)
    }
}

fn source_from_row(row: &PgRow) -> Result<Source> {
    let source_type: String = row.try_get("source_type")?;
    let source_type = source_type
        .parse::<SourceType>()
        .map_err(|e| CrawlerError::InvalidSource(e.to_string()))?;

    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        feed_url: row.try_get("feed_url")?,
        source_type,
        is_active: row.try_get("is_active")?,
        last_crawled_at: row.try_get("last_crawled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
