//! SQLite-backed content store.
//!
//! # Schema
//!
//! - `news`: one row per article, `external_id` unique
//! - `paragraphs`: ordered body, `UNIQUE(article_id, position)`, tokens as a JSON blob
//! - `scheduler_state`: key/value timestamps, currently only `last_run`

use crate::error::StoreError;
use crate::models::{ArticleSummary, NewArticle, Paragraph, StoredArticle, Token};
use crate::store::ContentStore;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, instrument};

const LAST_RUN_KEY: &str = "last_run";

const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS news (
    id           INTEGER PRIMARY KEY,
    external_id  TEXT UNIQUE NOT NULL,
    title        TEXT NOT NULL,
    url          TEXT NOT NULL,
    published_at TEXT,
    fetched_at   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS paragraphs (
    id         INTEGER PRIMARY KEY,
    article_id INTEGER NOT NULL REFERENCES news(id) ON DELETE CASCADE,
    position   INTEGER NOT NULL,
    raw_text   TEXT NOT NULL,
    tokens     TEXT NOT NULL,
    UNIQUE(article_id, position)
);

CREATE TABLE IF NOT EXISTS scheduler_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

type SummaryRow = (i64, String, String, String, Option<DateTime<Utc>>);
type ArticleRow = (
    i64,
    String,
    String,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://news.db`.
    #[instrument(level = "info")]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        info!("Connected to content store");
        Ok(Self { pool })
    }

    /// A private in-memory database; the single connection is never recycled.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION_SQL).execute(&self.pool).await?;
        debug!("Schema migrated");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Most recently ingested articles first; row ids follow insertion order.
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum rows returned
    /// * `offset` - Rows to skip, for paging
    ///
    /// # Returns
    ///
    /// Summaries without paragraphs, newest first.
    pub async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<ArticleSummary>, StoreError> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT id, external_id, title, url, published_at
             FROM news
             ORDER BY id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, external_id, title, url, published_at)| ArticleSummary {
                id,
                external_id,
                title,
                url,
                published_at,
            })
            .collect())
    }

    /// Article with paragraphs in position order, or `None` for an unknown id.
    ///
    /// # Arguments
    ///
    /// * `id` - Row id as returned by `insert` or listed by [`Self::list_recent`]
    ///
    /// # Errors
    ///
    /// [`StoreError::Encoding`] when a stored token blob no longer decodes.
    pub async fn get_article(&self, id: i64) -> Result<Option<StoredArticle>, StoreError> {
        let Some(row) = sqlx::query_as::<_, ArticleRow>(
            "SELECT id, external_id, title, url, published_at, fetched_at, created_at
             FROM news
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let paragraph_rows = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT position, raw_text, tokens
             FROM paragraphs
             WHERE article_id = ?
             ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut paragraphs = Vec::with_capacity(paragraph_rows.len());
        for (position, raw_text, tokens) in paragraph_rows {
            paragraphs.push(Paragraph {
                position: position as u32,
                raw_text,
                tokens: serde_json::from_str::<Vec<Token>>(&tokens)?,
            });
        }

        let (id, external_id, title, url, published_at, fetched_at, created_at) = row;
        Ok(Some(StoredArticle {
            id,
            external_id,
            title,
            url,
            published_at,
            fetched_at,
            created_at,
            paragraphs,
        }))
    }
}

impl ContentStore for SqliteStore {
    async fn exists(&self, external_id: &str) -> Result<bool, StoreError> {
        let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM news WHERE external_id = ?)")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found != 0)
    }

    #[instrument(level = "debug", skip_all, fields(external_id = %article.external_id))]
    async fn insert(&self, article: &NewArticle) -> Result<i64, StoreError> {
        // Encode before opening the transaction so a bad blob never leaves a partial write.
        let encoded = article
            .paragraphs
            .iter()
            .map(|p| serde_json::to_string(&p.tokens))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO news (external_id, title, url, published_at, fetched_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&article.external_id)
        .bind(&article.title)
        .bind(&article.url)
        .bind(article.published_at)
        .bind(article.fetched_at)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;

        let article_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::Duplicate(article.external_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        for (paragraph, tokens) in article.paragraphs.iter().zip(&encoded) {
            sqlx::query(
                "INSERT INTO paragraphs (article_id, position, raw_text, tokens)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(article_id)
            .bind(i64::from(paragraph.position))
            .bind(&paragraph.raw_text)
            .bind(tokens)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(article_id, paragraphs = article.paragraphs.len(), "Inserted article");
        Ok(article_id)
    }

    async fn last_pass_time(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT value FROM scheduler_state WHERE key = ?",
        )
        .bind(LAST_RUN_KEY)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_last_pass_time(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scheduler_state (key, value, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(LAST_RUN_KEY)
        .bind(at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
