//! Missed-block sliding window and the per-cycle tracker that feeds it.
//!
//! The window holds the blocks the validator failed to sign among the last `W`
//! observed heights, oldest first. Every cycle the tracker walks the heights
//! produced since the previous cycle, evicting events that aged out of the
//! slashing window and appending new misses. Mutations are staged on a copy
//! and committed only when the whole cycle succeeds, so an aborted cycle
//! leaves both the window and the observed height untouched.

use crate::collector::{ChainSource, CollectorError};
use crate::models::MissedEvent;
use futures::{StreamExt, stream};
use std::collections::VecDeque;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Ordered missed events with `newest.height - oldest.height < size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindow {
    size: u64,
    events: VecDeque<MissedEvent>,
}

impl SlidingWindow {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            events: VecDeque::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_missed(&self) -> u64 {
        u64::try_from(self.events.len()).unwrap_or(u64::MAX)
    }

    pub fn events(&self) -> impl Iterator<Item = &MissedEvent> {
        self.events.iter()
    }

    pub fn oldest(&self) -> Option<&MissedEvent> {
        self.events.front()
    }

    pub fn newest(&self) -> Option<&MissedEvent> {
        self.events.back()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Drops events that are `size` or more heights behind `current_height`.
    pub fn evict_aged(&mut self, current_height: u64) {
        while self
            .events
            .front()
            .is_some_and(|event| current_height.saturating_sub(event.height) >= self.size)
        {
            self.events.pop_front();
        }
    }

    /// Appends a missed event. Heights at or below the newest recorded one are rejected.
    pub fn push(&mut self, event: MissedEvent) -> bool {
        if self.newest().is_some_and(|newest| event.height <= newest.height) {
            return false;
        }
        self.evict_aged(event.height);
        self.events.push_back(event);
        true
    }
}

/// Outcome of one successful tracker cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub missed_this_cycle: u64,
    pub observed_height: u64,
    pub total_missed_in_window: u64,
    pub avg_block_time_secs: f64,
    /// Heights skipped because the server answered with a 5xx.
    pub skipped_heights: Vec<u64>,
    /// The gap since the previous cycle exceeded the window and it was cleared.
    pub window_reset: bool,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    window: SlidingWindow,
    consensus_address: String,
    fetch_concurrency: usize,
}

impl Tracker {
    pub fn new(window_size: u64, consensus_address: &str) -> Self {
        Self {
            window: SlidingWindow::new(window_size),
            consensus_address: consensus_address.to_ascii_uppercase(),
            fetch_concurrency: 1,
        }
    }

    /// Number of per-height fetches kept in flight. Results are still applied in height order.
    pub fn with_fetch_concurrency(mut self, fetch_concurrency: usize) -> Self {
        self.fetch_concurrency = fetch_concurrency.max(1);
        self
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Walks `(last_observed, latest]` and updates the window.
    ///
    /// Returns an error when the cycle must be treated as a reachability failure;
    /// in that case nothing is committed.
    pub async fn ingest(
        &mut self,
        source: &dyn ChainSource,
        last_observed: u64,
    ) -> Result<IngestReport, CollectorError> {
        let latest = source.latest_height().await?;
        let window_size = self.window.size();

        if latest <= last_observed {
            debug!(latest, last_observed, "no new blocks since last cycle");
            return Ok(IngestReport {
                missed_this_cycle: 0,
                observed_height: last_observed,
                total_missed_in_window: self.window.total_missed(),
                avg_block_time_secs: 0.0,
                skipped_heights: Vec::new(),
                window_reset: false,
            });
        }

        let window_reset = latest - last_observed > window_size;
        let mut staged = if window_reset {
            info!(latest, last_observed, window_size, "gap exceeds slashing window, resetting missed blocks");
            SlidingWindow::new(window_size)
        } else {
            let mut staged = self.window.clone();
            staged.evict_aged(latest);
            staged
        };

        let first_height = if window_reset {
            latest - window_size + 1
        } else {
            last_observed + 1
        };
        debug!(from = first_height, to = latest, "checking blocks");

        let mut missed_this_cycle = 0;
        let mut first_time: Option<SystemTime> = None;
        let mut last_time: Option<SystemTime> = None;
        let mut timestamps: u32 = 0;
        let mut skipped_heights = Vec::new();

        let mut fetches = stream::iter(first_height..=latest)
            .map(|height| async move { (height, source.block_at(height).await) })
            .buffered(self.fetch_concurrency);

        while let Some((height, result)) = fetches.next().await {
            match result {
                Ok(facts) => {
                    if first_time.is_none() {
                        first_time = Some(facts.time);
                    }
                    last_time = Some(facts.time);
                    timestamps += 1;

                    if !facts.signed_by(&self.consensus_address) {
                        staged.push(MissedEvent {
                            height,
                            timestamp: facts.time,
                        });
                        missed_this_cycle += 1;
                    }
                }
                Err(error) if error.is_transient_server_error() => {
                    warn!(height, error = %error, "skipping height after server error");
                    skipped_heights.push(height);
                }
                Err(error) => return Err(error),
            }
        }

        let avg_block_time_secs = match (first_time, last_time) {
            (Some(first), Some(last)) if timestamps > 1 => last
                .duration_since(first)
                .map(|elapsed| elapsed.as_secs_f64() / f64::from(timestamps - 1))
                .unwrap_or(0.0),
            _ => 0.0,
        };

        self.window = staged;
        let report = IngestReport {
            missed_this_cycle,
            observed_height: latest,
            total_missed_in_window: self.window.total_missed(),
            avg_block_time_secs,
            skipped_heights,
            window_reset,
        };
        info!(
            missed = report.missed_this_cycle,
            total_missed = report.total_missed_in_window,
            avg_block_time = report.avg_block_time_secs,
            height = report.observed_height,
            "missed blocks check"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn event(height: u64) -> MissedEvent {
        MissedEvent {
            height,
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(height * 6),
        }
    }

    #[test]
    fn evicts_events_that_left_the_window() {
        let mut window = SlidingWindow::new(100);
        for height in [10, 50, 109, 110] {
            assert!(window.push(event(height)));
        }
        // Pushing 110 evicts 10 (110 - 10 >= 100).
        assert_eq!(window.oldest().map(|e| e.height), Some(50));

        window.evict_aged(150);
        assert_eq!(window.oldest().map(|e| e.height), Some(109));
        assert_eq!(window.total_missed(), 2);
    }

    #[test]
    fn rejects_duplicate_and_older_heights() {
        let mut window = SlidingWindow::new(100);
        assert!(window.push(event(20)));
        assert!(!window.push(event(20)));
        assert!(!window.push(event(5)));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn empty_window_reports_zero_missed() {
        let mut window = SlidingWindow::new(100);
        window.push(event(1));
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.total_missed(), 0);
    }

    proptest! {
        #[test]
        fn span_stays_below_window_size(
            size in 1u64..200,
            steps in proptest::collection::vec(1u64..40, 0..300),
        ) {
            let mut window = SlidingWindow::new(size);
            let mut height = 0u64;
            for step in steps {
                height += step;
                window.evict_aged(height);
                prop_assert!(window.push(event(height)));

                if let (Some(oldest), Some(newest)) = (window.oldest(), window.newest()) {
                    prop_assert!(newest.height - oldest.height < size);
                }
                let heights: Vec<u64> = window.events().map(|e| e.height).collect();
                prop_assert!(heights.windows(2).all(|pair| pair.first() < pair.last()));
            }
        }
    }
}
