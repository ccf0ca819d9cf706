//! Interval scheduler.
//!
//! Each tick snapshots the enabled sites, keeps the due ones and dispatches
//! them onto a semaphore-bounded pool of tokio tasks. Sites with a check
//! already outstanding are skipped, not queued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::check::{CheckOutcome, Checker};
use crate::error::{CheckError, StoreResult};
use crate::traits::SiteStore;
use crate::types::{Site, SiteId};

/// Whether `site` should be checked at `now`.
///
/// `never` always wins; otherwise a site that was never checked is due.
pub fn is_due(site: &Site, now: DateTime<Utc>) -> bool {
    if !site.enabled {
        return false;
    }
    let Some(period) = site.interval.duration() else {
        return false;
    };
    let Some(last) = site.last_checked_at else {
        return true;
    };

    match chrono::Duration::from_std(period) {
        Ok(period) => now - last >= period,
        Err(_) => false,
    }
}

/// Counts for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    pub skipped_in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
}

type CheckJoin = (SiteId, Result<CheckOutcome, CheckError>);

impl TickReport {
    fn absorb(&mut self, joined: Result<CheckJoin, JoinError>) {
        match joined {
            Ok((_, Ok(_))) => self.succeeded += 1,
            Ok((_, Err(CheckError::AlreadyRunning(_)))) => self.skipped_in_flight += 1,
            Ok((_, Err(_))) => self.failed += 1,
            Err(_) => self.failed += 1,
        }
    }
}

fn log_joined(joined: &Result<CheckJoin, JoinError>) {
    match joined {
        Ok((site_id, Ok(outcome))) => debug!(site_id = %site_id, result = %outcome, "Scheduled check finished"),
        Ok((site_id, Err(e))) => warn!(
            site_id = %site_id,
            error = %e,
            retryable = e.is_retryable(),
            "Scheduled check failed"
        ),
        Err(e) => error!(error = %e, "Check task panicked"),
    }
}

pub struct Scheduler<S> {
    checker: Checker<S>,
    permits: Arc<Semaphore>,
}

impl<S: SiteStore + 'static> Scheduler<S> {
    pub fn new(checker: Checker<S>) -> Self {
        let permits = Arc::new(Semaphore::new(checker.config().max_concurrent_checks));
        Self { checker, permits }
    }

    pub fn checker(&self) -> &Checker<S> {
        &self.checker
    }

    /// Dispatch every due site at `now` onto `tasks`.
    async fn dispatch_into(
        &self,
        now: DateTime<Utc>,
        tasks: &mut JoinSet<CheckJoin>,
    ) -> StoreResult<TickReport> {
        let sites = self.checker.store().list_enabled_sites().await?;
        let mut report = TickReport::default();

        for site in sites.into_iter().filter(|site| is_due(site, now)) {
            let Some(guard) = self.checker.inflight().try_acquire(site.id) else {
                debug!(site_id = %site.id, "Check still in flight, skipping");
                report.skipped_in_flight += 1;
                continue;
            };

            let checker = self.checker.clone();
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let result = checker.run_guarded(&site, guard).await;
                (site.id, result)
            });
            report.dispatched += 1;
        }

        Ok(report)
    }

    /// Run one tick at `now` and wait for every check it dispatched.
    pub async fn tick(&self, now: DateTime<Utc>) -> StoreResult<TickReport> {
        let mut tasks = JoinSet::new();
        let mut report = self.dispatch_into(now, &mut tasks).await?;

        while let Some(joined) = tasks.join_next().await {
            log_joined(&joined);
            report.absorb(joined);
        }

        info!(
            dispatched = report.dispatched,
            skipped = report.skipped_in_flight,
            succeeded = report.succeeded,
            failed = report.failed,
            "Tick complete"
        );
        Ok(report)
    }

    /// Tick until `shutdown` is cancelled, then wait for outstanding checks.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.checker.config().tick_interval;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks: JoinSet<CheckJoin> = JoinSet::new();

        info!(tick = ?period, max_concurrent = self.checker.config().max_concurrent_checks, "Scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => {
                    match self.dispatch_into(Utc::now(), &mut tasks).await {
                        Ok(report) if report.dispatched > 0 || report.skipped_in_flight > 0 => {
                            debug!(
                                dispatched = report.dispatched,
                                skipped = report.skipped_in_flight,
                                "Tick dispatched"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Failed to list sites for tick"),
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_joined(&joined);
                }
            }
        }

        info!(outstanding = tasks.len(), "Scheduler stopping");
        while let Some(joined) = tasks.join_next().await {
            log_joined(&joined);
        }
    }
}
