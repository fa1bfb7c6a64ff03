//! In-memory fakes for the source, annotator and store capabilities.

use crate::api::Annotator;
use crate::error::{AnnotateError, SourceError, StoreError};
use crate::models::{NewArticle, Token};
use crate::scrapers::{ArticleBody, SourceReader};
use crate::store::ContentStore;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

impl<T: SourceReader> SourceReader for Arc<T> {
    async fn list_candidates(&self) -> Result<Vec<String>, SourceError> {
        (**self).list_candidates().await
    }

    async fn fetch_article(&self, id: &str) -> Result<ArticleBody, SourceError> {
        (**self).fetch_article(id).await
    }
}

impl<T: Annotator> Annotator for Arc<T> {
    async fn annotate(&self, text: &str) -> Result<Vec<Token>, AnnotateError> {
        (**self).annotate(text).await
    }
}

/// Paragraph texts used by [`FakeSource::article`] for an id.
pub fn paragraphs_for(id: &str) -> Vec<String> {
    vec![format!("{id}-p0"), format!("{id}-p1")]
}

#[derive(Default)]
pub struct FakeSource {
    ids: Mutex<Vec<String>>,
    list_fails: Mutex<bool>,
    broken: Mutex<HashSet<String>>,
    pub list_calls: AtomicUsize,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with_ids(ids: &[&str]) -> Self {
        let source = Self::default();
        source.set_ids(ids);
        source
    }

    pub fn set_ids(&self, ids: &[&str]) {
        *self.ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn fail_listing(&self) {
        *self.list_fails.lock().unwrap() = true;
    }

    pub fn break_article(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn article(id: &str) -> ArticleBody {
        ArticleBody {
            url: format!("https://example.com/{id}/{id}.html"),
            title: format!("title {id}"),
            published_at: None,
            paragraphs: paragraphs_for(id),
        }
    }
}

impl SourceReader for FakeSource {
    async fn list_candidates(&self) -> Result<Vec<String>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.list_fails.lock().unwrap() {
            return Err(SourceError::Status {
                status: 503,
                url: "https://example.com/".to_string(),
            });
        }
        Ok(self.ids.lock().unwrap().clone())
    }

    async fn fetch_article(&self, id: &str) -> Result<ArticleBody, SourceError> {
        self.fetched.lock().unwrap().push(id.to_string());
        if self.broken.lock().unwrap().contains(id) {
            return Err(SourceError::MissingElement("article-body"));
        }
        Ok(Self::article(id))
    }
}

#[derive(Default)]
pub struct FakeAnnotator {
    rate_limited: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeAnnotator {
    pub fn rate_limit_on(&self, text: &str) {
        self.rate_limited.lock().unwrap().insert(text.to_string());
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    /// Fire `token` while annotating `text`, as a shutdown signal would.
    pub fn cancel_on(&self, text: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((text.to_string(), token));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Annotator for FakeAnnotator {
    async fn annotate(&self, text: &str) -> Result<Vec<Token>, AnnotateError> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some((trigger, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if trigger == text {
                token.cancel();
            }
        }
        if self.rate_limited.lock().unwrap().contains(text) {
            return Err(AnnotateError::from_status(
                429,
                "RESOURCE_EXHAUSTED: quota exceeded".to_string(),
            ));
        }
        if self.failing.lock().unwrap().contains(text) {
            return Err(AnnotateError::from_status(400, "bad request".to_string()));
        }
        Ok(vec![Token {
            surface: text.to_string(),
            reading: text.to_string(),
            base_form: text.to_string(),
            gloss: "gloss".to_string(),
        }])
    }
}

#[derive(Default)]
struct MemoryState {
    articles: HashMap<String, NewArticle>,
    order: Vec<String>,
    last_pass: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing_inserts: Mutex<HashSet<String>>,
    exists_fails: Mutex<bool>,
    run_state_fails: Mutex<bool>,
}

impl MemoryStore {
    pub fn fail_insert_for(&self, id: &str) {
        self.failing_inserts.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_exists(&self) {
        *self.exists_fails.lock().unwrap() = true;
    }

    pub fn fail_run_state(&self) {
        *self.run_state_fails.lock().unwrap() = true;
    }

    pub fn seed_last_pass(&self, at: DateTime<Utc>) {
        self.state.lock().unwrap().last_pass = Some(at);
    }

    pub fn last_pass(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_pass
    }

    /// External ids in insertion order.
    pub fn stored_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().order.clone()
    }

    pub fn article(&self, id: &str) -> Option<NewArticle> {
        self.state.lock().unwrap().articles.get(id).cloned()
    }

    fn unavailable() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }
}

impl ContentStore for MemoryStore {
    async fn exists(&self, external_id: &str) -> Result<bool, StoreError> {
        if *self.exists_fails.lock().unwrap() {
            return Err(Self::unavailable());
        }
        Ok(self.state.lock().unwrap().articles.contains_key(external_id))
    }

    async fn insert(&self, article: &NewArticle) -> Result<i64, StoreError> {
        if self.failing_inserts.lock().unwrap().contains(&article.external_id) {
            return Err(Self::unavailable());
        }
        let mut state = self.state.lock().unwrap();
        if state.articles.contains_key(&article.external_id) {
            return Err(StoreError::Duplicate(article.external_id.clone()));
        }
        state.order.push(article.external_id.clone());
        state.articles.insert(article.external_id.clone(), article.clone());
        Ok(state.order.len() as i64)
    }

    async fn last_pass_time(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        if *self.run_state_fails.lock().unwrap() {
            return Err(Self::unavailable());
        }
        Ok(self.state.lock().unwrap().last_pass)
    }

    async fn set_last_pass_time(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        if *self.run_state_fails.lock().unwrap() {
            return Err(Self::unavailable());
        }
        self.state.lock().unwrap().last_pass = Some(at);
        Ok(())
    }
}
