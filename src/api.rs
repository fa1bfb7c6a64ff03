//! Token annotation through a generative language API.
//!
//! # Architecture
//!
//! - [`Annotator`]: capability that turns one paragraph into ordered [`Token`]s
//! - [`GeminiAnnotator`]: `generateContent` call with a JSON response schema
//! - [`RetryAnnotate`]: decorator that retries transient failures with
//!   exponential backoff and jitter
//!
//! # Retry Strategy
//!
//! Network errors, 5xx responses and truncated JSON are retried. A
//! rate-limit failure is returned immediately: the caller stops the whole
//! pass instead of burning quota on retries.

use crate::error::AnnotateError;
use crate::models::Token;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const SYSTEM_PROMPT: &str = r#"Act as an expert Japanese linguist. Perform morphological analysis on Japanese text for a language learning app.

RULES:
1. TOKENIZATION: Split text into the smallest logical morphological units.
2. SEPARATION: Grammatical particles (助詞) and auxiliary verbs (助動詞) MUST be separate tokens.
3. VERB STEMS: For a conjugated verb (e.g. 飲んで) "surface" is the conjugated form ("飲んで") and "base_form" is the dictionary form ("飲む").
4. PUNCTUATION: Include punctuation as separate tokens.
5. Output ONLY JSON matching the schema. No prose.

EXAMPLE:
Input: "食べています。"
Output: {"tokens": [
  {"surface": "食べて", "reading": "たべて", "base_form": "食べる", "gloss": "to eat (te-form)"},
  {"surface": "い", "reading": "い", "base_form": "いる", "gloss": "[auxiliary: progressive state]"},
  {"surface": "ます", "reading": "ます", "base_form": "ます", "gloss": "[polite auxiliary]"},
  {"surface": "。", "reading": "。", "base_form": "。", "gloss": "."}
]}

INPUT TEXT:
"#;

/// Capability that tokenizes one paragraph of raw text.
pub trait Annotator: Send + Sync {
    fn annotate(&self, text: &str) -> impl Future<Output = Result<Vec<Token>, AnnotateError>> + Send;
}

/// Wrapper that adds exponential backoff retry logic to any [`Annotator`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=250ms)
/// ```
pub struct RetryAnnotate<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T: Annotator> RetryAnnotate<T> {
    /// Wrap `inner` with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The annotator to call
    /// * `max_retries` - Extra attempts after the first transient failure
    /// * `base_delay` - First backoff step; doubles per attempt up to 30s
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAnnotate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAnnotate")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Annotator> Annotator for RetryAnnotate<T> {
    #[instrument(level = "debug", skip_all, fields(chars = text.chars().count()))]
    async fn annotate(&self, text: &str) -> Result<Vec<Token>, AnnotateError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.annotate(text).await {
                Ok(tokens) => return Ok(tokens),
                Err(e) if e.is_rate_limited() || !e.is_transient() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "annotate() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "annotate() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<Token>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GenerateContentResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Gemini `generateContent` client that asks for schema-constrained JSON.
pub struct GeminiAnnotator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAnnotator {
    pub fn new(http: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn request_body(text: &str) -> serde_json::Value {
        let token_schema = json!({
            "type": "OBJECT",
            "required": ["surface", "reading", "base_form", "gloss"],
            "properties": {
                "surface": { "type": "STRING" },
                "reading": { "type": "STRING" },
                "base_form": { "type": "STRING" },
                "gloss": { "type": "STRING" },
            },
        });
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("{SYSTEM_PROMPT}{text}") }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "required": ["tokens"],
                    "properties": {
                        "tokens": { "type": "ARRAY", "items": token_schema },
                    },
                },
            },
        })
    }
}

impl fmt::Debug for GeminiAnnotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiAnnotator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Annotator for GeminiAnnotator {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn annotate(&self, text: &str) -> Result<Vec<Token>, AnnotateError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let t0 = Instant::now();

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                body = %truncate_for_log(&message, 300),
                "Annotator API call failed"
            );
            return Err(AnnotateError::from_status(status.as_u16(), message));
        }

        let body: GenerateContentResponse = response.json().await?;
        let raw = body.into_text().ok_or(AnnotateError::EmptyResponse)?;
        let tokens = parse_tokens(&raw)?;
        debug!(
            tokens = tokens.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Annotated paragraph"
        );
        Ok(tokens)
    }
}

/// Parse the model's JSON payload into tokens.
pub fn parse_tokens(raw: &str) -> Result<Vec<Token>, AnnotateError> {
    match serde_json::from_str::<TokenizeResponse>(raw) {
        Ok(parsed) => Ok(parsed.tokens),
        Err(e) => {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(raw, 300),
                "Model returned non-conforming JSON"
            );
            Err(AnnotateError::Malformed(e))
        }
    }
}
