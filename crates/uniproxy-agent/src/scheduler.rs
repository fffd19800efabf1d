//! Periodic driver for reconciliation and traffic reporting.
//!
//! Startup runs one Full cycle inline. After that a single loop owns two
//! tickers and spawns each tick's work, so a slow cycle never delays the
//! other activity. Overlapping reconciliation ticks are skipped by the
//! engine's run guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uniproxy_core::DEFAULT_SHUTDOWN_TIMEOUT_SECS;

use crate::config::ScheduleConfig;
use crate::reporter::TrafficReporter;
use crate::sync::{SyncEngine, SyncMode};

/// Drives the engine and the reporter until shutdown.
#[derive(Debug)]
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    reporter: Arc<TrafficReporter>,
    polling_interval: Duration,
    pushing_interval: Duration,
    shutdown_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        reporter: Arc<TrafficReporter>,
        schedule: &ScheduleConfig,
    ) -> Self {
        Self {
            engine,
            reporter,
            polling_interval: schedule.polling_interval(),
            pushing_interval: schedule.pushing_interval(),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    /// How long shutdown waits for in-flight work.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            polling_secs = self.polling_interval.as_secs(),
            pushing_secs = self.pushing_interval.as_secs(),
            "starting initial full sync"
        );
        run_sync(&self.engine, SyncMode::Full).await;

        let start = Instant::now();
        let mut poll = interval_at(start + self.polling_interval, self.polling_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut push = interval_at(start + self.pushing_interval, self.pushing_interval);
        push.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let tasks = TaskTracker::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping scheduler");
                    break;
                }

                _ = poll.tick() => {
                    let engine = self.engine.clone();
                    tasks.spawn(async move {
                        let mode = engine.scheduled_mode();
                        run_sync(&engine, mode).await;
                    });
                }

                _ = push.tick() => {
                    let reporter = self.reporter.clone();
                    tasks.spawn(async move {
                        if let Err(e) = reporter.report().await {
                            warn!(error = %e, kind = e.kind(), "traffic report failed, batch dropped");
                        }
                    });
                }
            }
        }

        tasks.close();
        if tokio::time::timeout(self.shutdown_timeout, tasks.wait())
            .await
            .is_err()
        {
            warn!(pending = tasks.len(), "in-flight work did not finish before shutdown timeout");
        }
    }
}

async fn run_sync(engine: &SyncEngine, mode: SyncMode) {
    match engine.try_run(mode).await {
        None => debug!(%mode, "sync tick skipped"),
        Some(Ok(report)) => info!(
            %mode,
            fetched = report.fetched,
            unique = report.unique,
            added = report.added,
            rotated = report.rotated,
            satisfied = report.satisfied,
            failed = report.failed,
            removed = report.removed,
            "sync cycle finished"
        ),
        Some(Err(e)) => {
            warn!(%mode, error = %e, kind = e.kind(), "sync cycle aborted");
        }
    }
}
