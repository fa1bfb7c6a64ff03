//! # Easy News Ingest
//!
//! A background pipeline that discovers new NHK News Web Easy articles,
//! annotates every paragraph with linguistic tokens through Gemini, and
//! persists the result idempotently for later browsing.
//!
//! ## Usage
//!
//! ```sh
//! GEMINI_API_KEY=... easy_news_ingest --database-url sqlite://news.db
//! ```
//!
//! ## Architecture
//!
//! 1. **Scheduling**: one task decides when a pass runs, resuming the cadence
//!    from the stored last-pass time after a restart
//! 2. **Listing**: discover article IDs on the source
//! 3. **Processing**: for each unseen ID, scrape, annotate paragraph by
//!    paragraph, and write the article graph in one transaction
//! 4. **Shutdown**: SIGINT/SIGTERM cancel every wait and in-flight call

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod ingest;
mod models;
mod scheduler;
mod scrapers;
mod store;
#[cfg(test)]
mod testing;
mod utils;

use api::{GeminiAnnotator, RetryAnnotate};
use cli::Cli;
use config::PipelineConfig;
use error::PassError;
use ingest::Ingestor;
use scheduler::{Schedule, Scheduler};
use scrapers::nhk::NhkEasyReader;
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "easy_news_ingest starting up");

    let args = Cli::parse();
    let config = PipelineConfig::load(args.config.as_deref()).await?;

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let store = Arc::new(SqliteStore::connect(&args.database_url).await?);
    store.migrate().await?;

    if args.recent.is_some() || args.show.is_some() {
        let printed = print_stored(&store, args.recent, args.show).await;
        store.close().await;
        return printed;
    }

    let Some(api_key) = args.gemini_api_key.as_deref() else {
        store.close().await;
        return Err("GEMINI_API_KEY is required to run the pipeline".into());
    };

    let source = NhkEasyReader::new(http.clone(), &args.source_url)?;
    let gemini = GeminiAnnotator::new(http, api_key, &args.gemini_model).with_base_url(&args.gemini_base_url);
    let annotator = RetryAnnotate::new(
        gemini,
        config.annotate_max_retries,
        config.annotate_base_delay(),
    );
    let ingestor = Ingestor::new(source, annotator, Arc::clone(&store), &config);
    let scheduler = Scheduler::new(ingestor, Schedule::from_config(&config));

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    if args.once {
        match scheduler.run_once(&cancel).await {
            Ok(report) => info!(?report, "Single pass complete"),
            Err(PassError::Cancelled) => warn!("Single pass interrupted"),
            Err(e) => {
                store.close().await;
                return Err(e.into());
            }
        }
    } else {
        let token = cancel.clone();
        let task = tokio::spawn(async move { scheduler.run(token).await });
        if let Err(e) = task.await {
            error!(error = %e, "Scheduler task panicked");
        }
    }

    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Dump read-side rows as pretty JSON on stdout.
async fn print_stored(store: &SqliteStore, recent: Option<i64>, show: Option<i64>) -> Result<(), Box<dyn Error>> {
    if let Some(limit) = recent {
        let rows = store.list_recent(limit, 0).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    if let Some(id) = show {
        match store.get_article(id).await? {
            Some(article) => println!("{}", serde_json::to_string_pretty(&article)?),
            None => return Err(format!("no stored article with id {id}").into()),
        }
    }
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received terminate"),
    }
    token.cancel();
}
