//! Pipeline tuning loaded from an optional YAML file.
//!
//! Every field has a default, so an absent file or a partial file both work:
//!
//! ```yaml
//! base_interval_secs: 21600
//! max_jitter_secs: 1800
//! article_delay_ms: 2000
//! paragraph_delay_ms: 500
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument};

/// Shortest accepted wait between passes.
const MIN_BASE_INTERVAL_SECS: u64 = 60;
/// Longest accepted wait between passes or jitter window (30 days).
const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Base wait between passes.
    pub base_interval_secs: u64,
    /// Upper bound (exclusive) of the random offset added to each wait.
    pub max_jitter_secs: u64,
    /// Pause after each article that reached the source.
    pub article_delay_ms: u64,
    /// Pause between paragraph annotation calls.
    pub paragraph_delay_ms: u64,
    /// Timeout applied to every outbound HTTP request.
    pub request_timeout_secs: u64,
    /// Retries for transient annotator failures.
    pub annotate_max_retries: usize,
    /// First backoff step for annotator retries; doubles per attempt.
    pub annotate_base_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 6 * 60 * 60,
            max_jitter_secs: 30 * 60,
            article_delay_ms: 2000,
            paragraph_delay_ms: 500,
            request_timeout_secs: 30,
            annotate_max_retries: 3,
            annotate_base_delay_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn base_interval(&self) -> Duration {
        Duration::from_secs(self.base_interval_secs)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_secs(self.max_jitter_secs)
    }

    pub fn article_delay(&self) -> Duration {
        Duration::from_millis(self.article_delay_ms)
    }

    pub fn paragraph_delay(&self) -> Duration {
        Duration::from_millis(self.paragraph_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn annotate_base_delay(&self) -> Duration {
        Duration::from_millis(self.annotate_base_delay_ms)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Check that every knob lies in a range the scheduler and HTTP client can use.
    ///
    /// # Returns
    ///
    /// `Ok(())`, or a [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| -> Result<(), ConfigError> {
            Err(ConfigError { field, reason })
        };
        if !(MIN_BASE_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.base_interval_secs) {
            return invalid(
                "base_interval_secs",
                format!("must be between {MIN_BASE_INTERVAL_SECS} and {MAX_INTERVAL_SECS}"),
            );
        }
        if self.max_jitter_secs > MAX_INTERVAL_SECS {
            return invalid("max_jitter_secs", format!("must be at most {MAX_INTERVAL_SECS}"));
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs", "must be positive".to_string());
        }
        Ok(())
    }

    /// Load from `path`, or fall back to defaults when no path is given.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional YAML file; every key in it is optional
    ///
    /// # Returns
    ///
    /// The validated config. A missing or unreadable file, unknown keys, or
    /// out-of-range values are errors.
    #[instrument(level = "info")]
    pub async fn load(path: Option<&str>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let text = tokio::fs::read_to_string(path).await?;
        let config = Self::from_yaml(&text)?;
        config.validate()?;
        info!(?config, "Loaded pipeline config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.base_interval(), Duration::from_secs(6 * 3600));
        assert_eq!(c.max_jitter(), Duration::from_secs(30 * 60));
        assert_eq!(c.article_delay(), Duration::from_secs(2));
        assert_eq!(c.paragraph_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let c = PipelineConfig::from_yaml("max_jitter_secs: 60\narticle_delay_ms: 0\n").unwrap();
        assert_eq!(c.max_jitter_secs, 60);
        assert_eq!(c.article_delay_ms, 0);
        assert_eq!(c.base_interval_secs, 21600);
        assert_eq!(c.annotate_max_retries, 3);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(PipelineConfig::from_yaml("loop_interval: 10\n").is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_intervals() {
        assert!(PipelineConfig::default().validate().is_ok());

        let back_to_back = PipelineConfig::from_yaml("base_interval_secs: 0\nmax_jitter_secs: 0\n").unwrap();
        let err = back_to_back.validate().unwrap_err();
        assert_eq!(err.field, "base_interval_secs");

        let huge = PipelineConfig {
            base_interval_secs: u64::MAX,
            ..PipelineConfig::default()
        };
        assert!(huge.validate().is_err());

        let huge_jitter = PipelineConfig {
            max_jitter_secs: u64::MAX,
            ..PipelineConfig::default()
        };
        assert_eq!(huge_jitter.validate().unwrap_err().field, "max_jitter_secs");

        let no_timeout = PipelineConfig {
            request_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        assert_eq!(no_timeout.validate().unwrap_err().field, "request_timeout_secs");
    }

    #[tokio::test]
    async fn test_load_rejects_out_of_range_file() {
        let path = std::env::temp_dir().join(format!("easy_news_ingest_cfg_{}.yaml", std::process::id()));
        tokio::fs::write(&path, "base_interval_secs: 0\n").await.unwrap();
        let loaded = PipelineConfig::load(path.to_str()).await;
        let _ = tokio::fs::remove_file(&path).await;
        assert!(loaded.is_err());
    }

    #[tokio::test]
    async fn test_load_without_path_uses_defaults() {
        let c = PipelineConfig::load(None).await.unwrap();
        assert_eq!(c, PipelineConfig::default());
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        assert!(PipelineConfig::load(Some("/nonexistent/pipeline.yaml")).await.is_err());
    }
}
