//! Data models for ingested articles and their annotations.
//!
//! - [`NewArticle`]: the in-memory graph the orchestrator assembles and hands
//!   to the store in one write
//! - [`Paragraph`] / [`Token`]: ordered body text and its linguistic tokens
//! - [`ArticleSummary`] / [`StoredArticle`]: read-side shapes returned by the store
//!
//! Tokens are never queried on their own; the store keeps them as an
//! ordered JSON blob per paragraph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One linguistic unit produced by the annotator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Token {
    /// Surface form as it appears in the text (conjugated).
    pub surface: String,
    /// Phonetic reading in kana.
    pub reading: String,
    /// Dictionary form.
    pub base_form: String,
    /// Short English gloss.
    pub gloss: String,
}

/// A paragraph of an article, positioned densely from 0 in source order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Paragraph {
    pub position: u32,
    pub raw_text: String,
    pub tokens: Vec<Token>,
}

/// An article ready to be persisted.
///
/// Built with [`NewArticle::new`] and [`NewArticle::push_paragraph`] so the
/// paragraph positions stay contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub paragraphs: Vec<Paragraph>,
}

impl NewArticle {
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            url: url.into(),
            published_at,
            fetched_at: Utc::now(),
            paragraphs: Vec::new(),
        }
    }

    /// Append a paragraph at the next free position.
    pub fn push_paragraph(&mut self, raw_text: impl Into<String>, tokens: Vec<Token>) {
        let position = self.paragraphs.len() as u32;
        self.paragraphs.push(Paragraph {
            position,
            raw_text: raw_text.into(),
            tokens,
        });
    }
}

/// Listing row for recency-ordered browsing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArticleSummary {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A persisted article with its full paragraph list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoredArticle {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub paragraphs: Vec<Paragraph>,
}
