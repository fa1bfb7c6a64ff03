//! News source readers.
//!
//! A reader follows the same two-phase pattern for every source:
//!
//! 1. **Listing**: discover the identifiers of the articles currently published
//! 2. **Fetching**: extract title, publish date and ordered paragraphs for one identifier
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | NHK News Web Easy | [`nhk`] | HTML scraping | Ruby readings stripped from paragraph text |
//!
//! Readers only extract; deciding what is new and persisting it is the
//! orchestrator's job.

use crate::error::SourceError;
use chrono::{DateTime, Utc};
use std::future::Future;

pub mod nhk;

/// Structured content of one article page.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleBody {
    /// Canonical URL the body was extracted from.
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Non-empty paragraph texts in source order.
    pub paragraphs: Vec<String>,
}

/// Capability that lists and extracts articles from a remote source.
pub trait SourceReader: Send + Sync {
    /// Unique external identifiers in source-listed order.
    fn list_candidates(&self) -> impl Future<Output = Result<Vec<String>, SourceError>> + Send;

    fn fetch_article(&self, id: &str) -> impl Future<Output = Result<ArticleBody, SourceError>> + Send;
}
