//! Typed failures for each external boundary of the pipeline.

use thiserror::Error;

/// Known substrings that mark an upstream quota or throttling response.
const RATE_LIMIT_SIGNATURES: [&str; 2] = ["429", "RESOURCE_EXHAUSTED"];

/// Returns `true` when an error text carries one of the rate-limit signatures.
pub fn has_rate_limit_signature(text: &str) -> bool {
    RATE_LIMIT_SIGNATURES.iter().any(|sig| text.contains(sig))
}

/// Failure of a single annotation request.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("annotator rate limited: {0}")]
    RateLimited(String),

    #[error("annotator network error: {0}")]
    Network(String),

    #[error("annotator API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("annotator returned no candidates")]
    EmptyResponse,

    #[error("annotator returned malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl AnnotateError {
    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, message: String) -> Self {
        if status == 429 || has_rate_limit_signature(&message) {
            AnnotateError::RateLimited(format!("status {status}: {message}"))
        } else {
            AnnotateError::Api { status, message }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AnnotateError::RateLimited(_))
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AnnotateError::Network(_) | AnnotateError::EmptyResponse => true,
            AnnotateError::Api { status, .. } => *status >= 500,
            AnnotateError::Malformed(e) => crate::utils::looks_truncated(e),
            AnnotateError::RateLimited(_) => false,
        }
    }
}

impl From<reqwest::Error> for AnnotateError {
    fn from(err: reqwest::Error) -> Self {
        let text = err.to_string();
        match err.status() {
            Some(status) => AnnotateError::from_status(status.as_u16(), text),
            None if has_rate_limit_signature(&text) => AnnotateError::RateLimited(text),
            None => AnnotateError::Network(text),
        }
    }
}

/// Failure while listing or extracting content from the news source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("source returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid source URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("missing element `{0}` on article page")]
    MissingElement(&'static str),

    #[error("article body has no text paragraphs")]
    EmptyArticle,
}

/// Failure of the content store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("token blob encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("article `{0}` already stored")]
    Duplicate(String),
}

/// A pipeline config value outside its accepted range.
#[derive(Debug, Error)]
#[error("invalid config `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

/// Why an ingestion pass did not complete.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("listing candidates failed: {0}")]
    Listing(#[source] SourceError),

    #[error("pass cancelled")]
    Cancelled,
}
