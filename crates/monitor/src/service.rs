//! Poll loop: one tracker → evaluator → alert engine pass per interval.

use crate::{
    alerter::AlertQueue,
    collector::ChainSource,
    evaluator::Evaluator,
    formatter::{self, DisplayUnits},
    models::{AlertKind, HistoryPoint, ValidatorSnapshot},
    state::SharedState,
    storage::HistoryStore,
    window::Tracker,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleVerdict {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub verdict: CycleVerdict,
    pub dispatched: Vec<AlertKind>,
    /// `None` when the tracker failed and the cycle counted as unreachable.
    pub missed_this_cycle: Option<u64>,
}

pub struct Monitor {
    source: Arc<dyn ChainSource>,
    tracker: Tracker,
    evaluator: Evaluator,
    shared: SharedState,
    queue: AlertQueue,
    history: Option<Arc<dyn HistoryStore>>,
    units: DisplayUnits,
    poll_interval: Duration,
    drain_deadline: Duration,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn ChainSource>,
        tracker: Tracker,
        evaluator: Evaluator,
        shared: SharedState,
        queue: AlertQueue,
    ) -> Self {
        Self {
            source,
            tracker,
            evaluator,
            shared,
            queue,
            history: None,
            units: DisplayUnits::default(),
            poll_interval: Duration::from_secs(60),
            drain_deadline: Duration::from_secs(15),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_units(mut self, units: DisplayUnits) -> Self {
        self.units = units;
        self
    }

    pub fn with_timing(mut self, poll_interval: Duration, drain_deadline: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.drain_deadline = drain_deadline;
        self
    }

    /// Fetches the starting height. A failure is reported and monitoring starts from 0.
    pub async fn start(&self) -> u64 {
        let height = match self.source.latest_height().await {
            Ok(height) => height,
            Err(error) => {
                warn!(%error, "failed to fetch initial block height");
                self.queue.push(formatter::STARTUP_HEIGHT_FAILED.to_owned());
                0
            }
        };
        self.shared.lock().await.status.last_observed_height = height;
        info!(height, "monitoring started");
        height
    }

    pub async fn run_cycle(&mut self, now: SystemTime) -> CycleOutcome {
        let window = self.evaluator.thresholds().window;
        let max_failures = self.evaluator.thresholds().max_failures;
        let last_observed = self.shared.lock().await.status.last_observed_height;

        let (snapshot, ingest) = tokio::join!(
            self.source.validator_snapshot(),
            self.tracker.ingest(self.source.as_ref(), last_observed),
        );
        let validator = snapshot.unwrap_or_else(|error| {
            warn!(%error, "failed to fetch validator snapshot");
            ValidatorSnapshot::unreachable()
        });

        let mut shared = self.shared.lock().await;
        let status = &mut shared.status;
        status.validator = validator;
        status.last_cycle_at = Some(now);

        let missed_this_cycle = match &ingest {
            Ok(report) => {
                status.last_observed_height = report.observed_height;
                status.total_missed_in_window = report.total_missed_in_window;
                status.avg_block_time_secs = report.avg_block_time_secs;
                status.missed_since_last_alert += report.missed_this_cycle;
                if !report.skipped_heights.is_empty() {
                    warn!(skipped = ?report.skipped_heights, "heights skipped this cycle");
                }
                Some(report.missed_this_cycle)
            }
            Err(error) => {
                warn!(%error, height = last_observed, "block check failed, height unchanged");
                None
            }
        };

        if missed_this_cycle.is_none() && !status.validator.active {
            status.consecutive_failures += 1;
            warn!(
                failures = status.consecutive_failures,
                max_failures, "rpc unreachable and validator not reported active"
            );
        } else {
            status.consecutive_failures = 0;
        }

        let snapshot = status.snapshot();
        let flags = self.evaluator.evaluate(&snapshot);
        let dispatched = shared.alerts.select(&flags, now);
        if dispatched.contains(&AlertKind::MissedBlockBurst) {
            shared.status.missed_since_last_alert = 0;
        }
        drop(shared);

        debug!(raised = flags.len(), dispatched = dispatched.len(), "alerts evaluated");
        for &kind in &dispatched {
            self.queue
                .push(formatter::alert_message(kind, &snapshot, window, &self.units));
        }

        if let (Ok(report), Some(history)) = (&ingest, &self.history) {
            let point = HistoryPoint {
                timestamp: now,
                total_missed: report.total_missed_in_window,
                voting_power: snapshot.validator.voting_power,
            };
            let history = Arc::clone(history);
            match tokio::task::spawn_blocking(move || history.append(&point)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(%error, "failed to persist cycle history"),
                Err(join_error) => warn!(%join_error, "history writer task failed"),
            }
        }

        let verdict = if snapshot.consecutive_failures >= max_failures {
            error!(
                failures = snapshot.consecutive_failures,
                "rpc endpoint unreachable, shutting down"
            );
            CycleVerdict::Shutdown
        } else {
            CycleVerdict::Continue
        };

        CycleOutcome {
            verdict,
            dispatched,
            missed_this_cycle,
        }
    }

    /// Runs cycles with a fixed delay between them until `cancel` fires or the
    /// failure ceiling is reached. Cancels `cancel` itself on the latter.
    pub async fn run(mut self, cancel: CancellationToken) -> CycleVerdict {
        let drain_deadline = self.drain_deadline;

        loop {
            let outcome = {
                let cycle = self.run_cycle(SystemTime::now());
                tokio::pin!(cycle);
                tokio::select! {
                    outcome = &mut cycle => Some(outcome),
                    () = cancel.cancelled() => {
                        info!(?drain_deadline, "shutdown requested, draining in-flight cycle");
                        match tokio::time::timeout(drain_deadline, &mut cycle).await {
                            Ok(outcome) => Some(outcome),
                            Err(_) => {
                                warn!("in-flight cycle did not finish before the drain deadline");
                                None
                            }
                        }
                    }
                }
            };

            match outcome {
                Some(CycleOutcome {
                    verdict: CycleVerdict::Shutdown,
                    ..
                }) => {
                    cancel.cancel();
                    return CycleVerdict::Shutdown;
                }
                Some(_) if !cancel.is_cancelled() => {}
                _ => return CycleVerdict::Continue,
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancel.cancelled() => return CycleVerdict::Continue,
            }
        }
    }
}
