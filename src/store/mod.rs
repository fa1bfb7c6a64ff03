//! Durable, deduplicating persistence for articles and pipeline run state.
//!
//! [`ContentStore`] is the contract the orchestrator and scheduler rely on:
//!
//! - `exists` has no false negatives once an insert has committed
//! - `insert` is all-or-nothing for the whole article graph
//! - run state is a single upserted timestamp
//!
//! [`sqlite::SqliteStore`] is the production implementation and also serves
//! the recency listing and fetch-by-id reads.

use crate::error::StoreError;
use crate::models::NewArticle;
use chrono::{DateTime, Utc};
use std::future::Future;

pub mod sqlite;

pub use sqlite::SqliteStore;

pub trait ContentStore: Send + Sync {
    fn exists(&self, external_id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Persist the article with all its paragraphs atomically; returns the row id.
    fn insert(&self, article: &NewArticle) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Time of the last successful pass, `None` before the first one.
    fn last_pass_time(&self) -> impl Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;

    fn set_last_pass_time(&self, at: DateTime<Utc>) -> impl Future<Output = Result<(), StoreError>> + Send;
}
