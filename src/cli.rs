//! Command-line interface definitions.
//!
//! Every option can also be provided through the environment, which is how
//! the service is normally deployed.

use crate::api::GEMINI_API_URL;
use crate::scrapers::nhk::DEFAULT_BASE_URL;
use clap::Parser;

/// Command-line arguments for the ingestion service.
///
/// # Examples
///
/// ```sh
/// # Long-running scheduler
/// GEMINI_API_KEY=... easy_news_ingest --database-url sqlite://news.db
///
/// # One pass, custom tuning
/// easy_news_ingest --gemini-api-key KEY --once -c pipeline.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database URL for the content store
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://easy_news.db?mode=rwc")]
    pub database_url: String,

    /// Gemini API key used for token annotation
    #[arg(
        long,
        env = "GEMINI_API_KEY",
        hide_env_values = true,
        required_unless_present_any = ["recent", "show"]
    )]
    pub gemini_api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-3-flash-preview")]
    pub gemini_model: String,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL", default_value = GEMINI_API_URL)]
    pub gemini_base_url: String,

    /// Base URL of the news source
    #[arg(long, env = "SOURCE_URL", default_value = DEFAULT_BASE_URL)]
    pub source_url: String,

    /// Optional path to a pipeline config YAML file
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    pub config: Option<String>,

    /// Run a single ingestion pass and exit
    #[arg(long)]
    pub once: bool,

    /// Print the N most recently stored articles as JSON and exit
    #[arg(long, value_name = "N", conflicts_with_all = ["once", "show"])]
    pub recent: Option<i64>,

    /// Print one stored article (by row id) with its paragraphs as JSON and exit
    #[arg(long, value_name = "ID", conflicts_with = "once")]
    pub show: Option<i64>,
}
