//! One ingestion pass: list, filter by existence, scrape, annotate, persist.
//!
//! Every candidate produces an [`ItemOutcome`], which makes the three failure
//! granularities explicit:
//!
//! - `Stored`: the article graph was written
//! - `Skipped`: this item failed (or already exists); the pass continues
//! - `StopPass`: the annotator is rate limited or shutdown was requested;
//!   remaining candidates wait for the next pass
//!
//! Candidates are processed strictly one at a time with pacing delays, since
//! the source and the annotator are shared, rate-limited remote services.

use crate::api::Annotator;
use crate::config::PipelineConfig;
use crate::error::{AnnotateError, PassError, SourceError, StoreError};
use crate::models::NewArticle;
use crate::scrapers::SourceReader;
use crate::store::ContentStore;
use crate::utils::{pause, until_cancelled};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a single candidate was not stored.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("already stored")]
    AlreadyStored,

    #[error("existence check failed: {0}")]
    ExistenceCheck(#[source] StoreError),

    #[error("fetch failed: {0}")]
    Fetch(#[source] SourceError),

    #[error("annotation of paragraph {position} failed: {error}")]
    Annotation {
        position: u32,
        #[source]
        error: AnnotateError,
    },

    #[error("write failed: {0}")]
    Write(#[source] StoreError),
}

/// Why a pass ended before its candidate list was exhausted.
#[derive(Debug, Error)]
pub enum StopReason {
    #[error("annotator rate limited: {0}")]
    RateLimited(#[source] AnnotateError),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub enum ItemOutcome {
    Stored { paragraphs: usize },
    Skipped(SkipReason),
    StopPass(StopReason),
}

impl ItemOutcome {
    /// Whether processing reached the remote source and should be paced.
    fn reached_source(&self) -> bool {
        !matches!(
            self,
            ItemOutcome::Skipped(SkipReason::AlreadyStored | SkipReason::ExistenceCheck(_))
        )
    }
}

/// Counters for one completed pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub candidates: usize,
    pub stored: usize,
    pub already_stored: usize,
    pub failed: usize,
    /// The pass stopped early on a rate-limit signal.
    pub rate_limited: bool,
}

/// The ingestion orchestrator.
pub struct Ingestor<R, A, S> {
    source: R,
    annotator: A,
    store: Arc<S>,
    article_delay: Duration,
    paragraph_delay: Duration,
}

impl<R, A, S> Ingestor<R, A, S>
where
    R: SourceReader,
    A: Annotator,
    S: ContentStore,
{
    /// Create an orchestrator over injected capabilities.
    ///
    /// # Arguments
    ///
    /// * `source` - Lists candidates and extracts article bodies
    /// * `annotator` - Tokenizes one paragraph per call
    /// * `store` - Shared with the scheduler, which owns run state
    /// * `config` - Supplies the article and paragraph pacing delays
    pub fn new(source: R, annotator: A, store: Arc<S>, config: &PipelineConfig) -> Self {
        Self {
            source,
            annotator,
            store,
            article_delay: config.article_delay(),
            paragraph_delay: config.paragraph_delay(),
        }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Run one pass to completion.
    ///
    /// Only a listing failure or cancellation is an error; item failures and
    /// a rate-limit stop still yield `Ok`.
    ///
    /// # Returns
    ///
    /// Per-pass counters, with `rate_limited` set when the pass stopped early.
    /// [`PassError::Listing`] when no candidates could be read, or
    /// [`PassError::Cancelled`] when `cancel` fired before the list was done.
    #[instrument(level = "info", skip_all)]
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassReport, PassError> {
        let t0 = Instant::now();

        let ids = until_cancelled(cancel, self.source.list_candidates())
            .await
            .ok_or(PassError::Cancelled)?
            .map_err(PassError::Listing)?;
        info!(count = ids.len(), "Found candidate articles");

        let mut report = PassReport {
            candidates: ids.len(),
            ..PassReport::default()
        };

        for id in &ids {
            if cancel.is_cancelled() {
                return Err(PassError::Cancelled);
            }

            let outcome = self.process_candidate(id, cancel).await;
            match &outcome {
                ItemOutcome::Stored { paragraphs } => {
                    report.stored += 1;
                    info!(%id, paragraphs, "Stored article");
                }
                ItemOutcome::Skipped(SkipReason::AlreadyStored) => {
                    report.already_stored += 1;
                    debug!(%id, "Skipping (already stored)");
                }
                ItemOutcome::Skipped(reason) => {
                    report.failed += 1;
                    warn!(%id, %reason, "Skipping article");
                }
                ItemOutcome::StopPass(StopReason::RateLimited(e)) => {
                    report.rate_limited = true;
                    warn!(%id, error = %e, "Rate limit reached; deferring remaining articles to next pass");
                    break;
                }
                ItemOutcome::StopPass(StopReason::Cancelled) => return Err(PassError::Cancelled),
            }

            if outcome.reached_source() && !pause(cancel, self.article_delay).await {
                return Err(PassError::Cancelled);
            }
        }

        info!(
            candidates = report.candidates,
            stored = report.stored,
            already_stored = report.already_stored,
            failed = report.failed,
            rate_limited = report.rate_limited,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Pass finished"
        );
        Ok(report)
    }

    /// Process one candidate id end to end.
    #[instrument(level = "debug", skip(self, cancel))]
    pub async fn process_candidate(&self, id: &str, cancel: &CancellationToken) -> ItemOutcome {
        match until_cancelled(cancel, self.store.exists(id)).await {
            None => return ItemOutcome::StopPass(StopReason::Cancelled),
            Some(Ok(true)) => return ItemOutcome::Skipped(SkipReason::AlreadyStored),
            Some(Ok(false)) => {}
            Some(Err(e)) => return ItemOutcome::Skipped(SkipReason::ExistenceCheck(e)),
        }

        let body = match until_cancelled(cancel, self.source.fetch_article(id)).await {
            None => return ItemOutcome::StopPass(StopReason::Cancelled),
            Some(Err(e)) => return ItemOutcome::Skipped(SkipReason::Fetch(e)),
            Some(Ok(body)) => body,
        };

        let mut article = NewArticle::new(id, body.title, body.url, body.published_at);
        for (position, text) in body.paragraphs.into_iter().enumerate() {
            if position > 0 && !pause(cancel, self.paragraph_delay).await {
                return ItemOutcome::StopPass(StopReason::Cancelled);
            }
            match until_cancelled(cancel, self.annotator.annotate(&text)).await {
                None => return ItemOutcome::StopPass(StopReason::Cancelled),
                Some(Ok(tokens)) => article.push_paragraph(text, tokens),
                Some(Err(e)) if e.is_rate_limited() => {
                    return ItemOutcome::StopPass(StopReason::RateLimited(e));
                }
                Some(Err(error)) => {
                    return ItemOutcome::Skipped(SkipReason::Annotation {
                        position: position as u32,
                        error,
                    });
                }
            }
        }

        match until_cancelled(cancel, self.store.insert(&article)).await {
            None => ItemOutcome::StopPass(StopReason::Cancelled),
            Some(Ok(_)) => ItemOutcome::Stored {
                paragraphs: article.paragraphs.len(),
            },
            Some(Err(e)) => ItemOutcome::Skipped(SkipReason::Write(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAnnotator, FakeSource, MemoryStore, paragraphs_for};

    type TestIngestor = Ingestor<Arc<FakeSource>, Arc<FakeAnnotator>, MemoryStore>;

    struct Harness {
        source: Arc<FakeSource>,
        annotator: Arc<FakeAnnotator>,
        store: Arc<MemoryStore>,
        ingestor: TestIngestor,
    }

    fn harness(ids: &[&str]) -> Harness {
        let source = Arc::new(FakeSource::with_ids(ids));
        let annotator = Arc::new(FakeAnnotator::default());
        let store = Arc::new(MemoryStore::default());
        let config = PipelineConfig {
            article_delay_ms: 0,
            paragraph_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let ingestor = Ingestor::new(
            Arc::clone(&source),
            Arc::clone(&annotator),
            Arc::clone(&store),
            &config,
        );
        Harness {
            source,
            annotator,
            store,
            ingestor,
        }
    }

    #[tokio::test]
    async fn test_pass_stores_all_new_articles_in_order() {
        let h = harness(&["ne1", "ne2", "ne3"]);
        let report = h.ingestor.run_pass(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.stored, 3);
        assert_eq!(report.failed, 0);
        assert!(!report.rate_limited);
        assert_eq!(h.store.stored_ids(), vec!["ne1", "ne2", "ne3"]);

        let article = h.store.article("ne2").unwrap();
        assert_eq!(article.url, "https://example.com/ne2/ne2.html");
        assert_eq!(article.paragraphs.len(), 2);
        assert_eq!(article.paragraphs[1].raw_text, "ne2-p1");
        assert_eq!(article.paragraphs[1].tokens[0].surface, "ne2-p1");
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let h = harness(&["ne1", "ne2"]);
        let cancel = CancellationToken::new();
        h.ingestor.run_pass(&cancel).await.unwrap();
        let annotated = h.annotator.calls().len();

        let report = h.ingestor.run_pass(&cancel).await.unwrap();
        assert_eq!(report.stored, 0);
        assert_eq!(report.already_stored, 2);
        assert_eq!(h.store.stored_ids().len(), 2);
        // nothing re-fetched or re-annotated
        assert_eq!(h.source.fetched(), vec!["ne1", "ne2"]);
        assert_eq!(h.annotator.calls().len(), annotated);
    }

    #[tokio::test]
    async fn test_rate_limit_stops_pass_after_item() {
        let h = harness(&["ne1", "ne2", "ne3", "ne4", "ne5"]);
        h.annotator.rate_limit_on(&paragraphs_for("ne3")[0]);

        let report = h.ingestor.run_pass(&CancellationToken::new()).await.unwrap();
        assert!(report.rate_limited);
        assert_eq!(report.stored, 2);
        assert_eq!(h.store.stored_ids(), vec!["ne1", "ne2"]);
        assert_eq!(h.source.fetched(), vec!["ne1", "ne2", "ne3"]);
    }

    #[tokio::test]
    async fn test_annotation_failure_skips_only_that_article() {
        let h = harness(&["ne1", "ne2", "ne3"]);
        h.annotator.fail_on(&paragraphs_for("ne2")[1]);

        let report = h.ingestor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.stored, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(h.store.stored_ids(), vec!["ne1", "ne3"]);
        assert!(h.store.article("ne2").is_none());
    }

    #[tokio::test]
    async fn test_fetch_and_write_failures_continue() {
        let h = harness(&["ne1", "ne2", "ne3"]);
        h.source.break_article("ne1");
        h.store.fail_insert_for("ne2");

        let report = h.ingestor.run_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(h.store.stored_ids(), vec!["ne3"]);
    }

    #[tokio::test]
    async fn test_existence_check_failure_skips_without_fetching() {
        let h = harness(&["ne1"]);
        h.store.fail_exists();

        let outcome = h.ingestor.process_candidate("ne1", &CancellationToken::new()).await;
        assert!(matches!(outcome, ItemOutcome::Skipped(SkipReason::ExistenceCheck(_))));
        assert!(h.source.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_fails_pass() {
        let h = harness(&["ne1"]);
        h.source.fail_listing();

        let err = h.ingestor.run_pass(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PassError::Listing(_)));
        assert!(h.source.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_annotation_error_reports_position() {
        let h = harness(&["ne1"]);
        h.annotator.fail_on(&paragraphs_for("ne1")[1]);

        let outcome = h.ingestor.process_candidate("ne1", &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            ItemOutcome::Skipped(SkipReason::Annotation { position: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_mid_article_stops_pass() {
        let h = harness(&["ne1", "ne2"]);
        let cancel = CancellationToken::new();
        h.annotator.cancel_on(&paragraphs_for("ne1")[0], cancel.clone());

        let err = h.ingestor.run_pass(&cancel).await.unwrap_err();
        assert!(matches!(err, PassError::Cancelled));
        assert!(h.store.stored_ids().is_empty());
        assert_eq!(h.source.fetched(), vec!["ne1"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_listing() {
        let h = harness(&["ne1"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(h.ingestor.run_pass(&cancel).await, Err(PassError::Cancelled)));
        assert_eq!(h.source.list_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_positions_dense_when_source_dropped_empty_paragraphs() {
        use crate::scrapers::nhk::extract_article;

        let html = r#"<h1 class="article-title">題</h1>
            <div class="article-body"><p>一</p><p> </p><p><rt>よみ</rt></p><p>二</p></div>"#;
        let body = extract_article(html, "u").unwrap();

        let mut article = NewArticle::new("ne1", body.title, body.url, body.published_at);
        for text in body.paragraphs {
            article.push_paragraph(text, vec![]);
        }
        let positions: Vec<u32> = article.paragraphs.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(article.paragraphs[1].raw_text, "二");
    }
}
