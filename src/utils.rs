//! Small helpers shared across the pipeline.
//!
//! - Cancellation-aware waiting for every suspension point
//! - String truncation for logging upstream bodies
//! - JSON error detection for handling truncated model output

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `false` when the wait was interrupted by cancellation.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Drive `fut` to completion unless `cancel` fires first.
///
/// A cancelled future is dropped, which aborts any in-flight request or
/// rolls back an open transaction.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at the last char boundary before `max` bytes and get
/// `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Round a duration to whole minutes for human-readable logs.
pub fn round_to_minutes(d: Duration) -> String {
    let mins = (d.as_secs() + 30) / 60;
    format!("{}h{:02}m", mins / 60, mins % 60)
}
