//! Pass cadence across process restarts.
//!
//! ```text
//! Idle -> (compute wait) -> Waiting -> Running -> Idle
//!                              \          \
//!                               +----------+--> Stopped (on cancellation)
//! ```
//!
//! On start the stored last-pass time decides the first wait: none or
//! overdue runs immediately, otherwise the remainder of the base interval.
//! After every pass the wait is the base interval plus a uniform random
//! offset in `[0, max_jitter)`.
//!
//! Only a completed pass advances the run state. A single scheduler task
//! drives every pass, so passes never overlap.

use crate::api::Annotator;
use crate::config::PipelineConfig;
use crate::error::PassError;
use crate::ingest::{Ingestor, PassReport};
use crate::scrapers::SourceReader;
use crate::store::ContentStore;
use crate::utils::{pause, round_to_minutes, until_cancelled};
use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub base_interval: Duration,
    pub max_jitter: Duration,
}

impl Schedule {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            base_interval: config.base_interval(),
            max_jitter: config.max_jitter(),
        }
    }

    /// Wait before the first pass after startup.
    ///
    /// A last-pass time in the future counts as "just ran".
    pub fn initial_delay(&self, last_pass: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(last) = last_pass else {
            return Duration::ZERO;
        };
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.base_interval.saturating_sub(elapsed)
    }

    /// Wait after a pass, in `[base_interval, base_interval + max_jitter)`.
    pub fn next_delay(&self) -> Duration {
        self.next_delay_with(&mut rng())
    }

    pub fn next_delay_with<G: Rng>(&self, rng: &mut G) -> Duration {
        let jitter_nanos = self.max_jitter.as_nanos().min(u64::MAX as u128) as u64;
        if jitter_nanos == 0 {
            return self.base_interval;
        }
        self.base_interval
            .saturating_add(Duration::from_nanos(rng.random_range(0..jitter_nanos)))
    }
}

pub struct Scheduler<R, A, S> {
    ingestor: Ingestor<R, A, S>,
    store: Arc<S>,
    schedule: Schedule,
}

impl<R, A, S> Scheduler<R, A, S>
where
    R: SourceReader,
    A: Annotator,
    S: ContentStore,
{
    pub fn new(ingestor: Ingestor<R, A, S>, schedule: Schedule) -> Self {
        let store = ingestor.store();
        Self {
            ingestor,
            store,
            schedule,
        }
    }

    /// Run passes until `cancel` fires.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            base_interval = %round_to_minutes(self.schedule.base_interval),
            max_jitter = %round_to_minutes(self.schedule.max_jitter),
            "Scheduler started"
        );

        let mut wait = match until_cancelled(&cancel, self.store.last_pass_time()).await {
            None => {
                info!("Scheduler stopped");
                return;
            }
            Some(Ok(None)) => {
                info!("No previous pass found, running now");
                Duration::ZERO
            }
            Some(Ok(Some(last))) => {
                let now = Utc::now();
                let wait = self.schedule.initial_delay(Some(last), now);
                let ago = (now - last).to_std().unwrap_or(Duration::ZERO);
                if wait.is_zero() {
                    info!(last_pass = %last, ago = %round_to_minutes(ago), "Last pass overdue, running now");
                } else {
                    info!(last_pass = %last, wait = %round_to_minutes(wait), "Waiting for next scheduled pass");
                }
                wait
            }
            Some(Err(e)) => {
                warn!(error = %e, "Could not read last pass time, running now");
                Duration::ZERO
            }
        };

        loop {
            if !pause(&cancel, wait).await {
                break;
            }
            // Failures are logged inside; the cadence is the same either way.
            let _ = self.run_once(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            wait = self.schedule.next_delay();
            info!(next_in = %round_to_minutes(wait), "Next pass scheduled");
        }

        info!("Scheduler stopped");
    }

    /// Run one pass and advance the run state if it completed.
    ///
    /// # Returns
    ///
    /// The pass report. On error the run state is left as it was; a failed
    /// run-state write after a completed pass is only logged.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<PassReport, PassError> {
        info!("Running scheduled pass");
        let report = match self.ingestor.run_pass(cancel).await {
            Ok(report) => report,
            Err(PassError::Cancelled) => {
                info!("Pass interrupted; run state unchanged");
                return Err(PassError::Cancelled);
            }
            Err(e) => {
                error!(error = %e, "Pass failed; run state unchanged");
                return Err(e);
            }
        };

        // Articles are already committed; a failed write here only means the
        // next startup runs a pass early.
        if let Err(e) = self.store.set_last_pass_time(Utc::now()).await {
            error!(error = %e, "Failed to persist last pass time");
        }
        Ok(report)
    }
}
