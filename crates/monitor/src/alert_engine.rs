//! Alert deduplication and the operator pause window.
//!
//! Every raised flag passes through [`AlertEngine::select`]:
//!
//! ```text
//!   flags
//!     -> pause gate     (drop everything while now < paused_until)
//!     -> cooldown table (drop if the kind was sent less than `cooldown` ago)
//!     -> dispatch       (stamp last_sent_at = now)
//! ```
//!
//! Cooldowns and send stamps live in fixed-size tables indexed by
//! [`AlertKind::index`].

use crate::models::AlertKind;
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);
pub const MAX_PAUSE_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PauseError {
    #[error("Please specify a number between 1 and 24 hours.")]
    OutOfRange(i64),
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

/// Per-kind minimum spacing between two dispatches of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldowns {
    table: [Duration; AlertKind::COUNT],
}

impl Cooldowns {
    pub fn uniform(cooldown: Duration) -> Self {
        Self {
            table: [cooldown; AlertKind::COUNT],
        }
    }

    pub fn with_override(mut self, kind: AlertKind, cooldown: Duration) -> Self {
        if let Some(slot) = self.table.get_mut(kind.index()) {
            *slot = cooldown;
        }
        self
    }

    pub fn get(&self, kind: AlertKind) -> Duration {
        self.table
            .get(kind.index())
            .copied()
            .unwrap_or(DEFAULT_COOLDOWN)
    }
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self::uniform(DEFAULT_COOLDOWN)
    }
}

// ---------------------------------------------------------------------------
// AlertEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AlertEngine {
    cooldowns: Cooldowns,
    last_sent_at: [Option<SystemTime>; AlertKind::COUNT],
    paused_until: SystemTime,
}

impl AlertEngine {
    pub fn new(cooldowns: Cooldowns) -> Self {
        Self {
            cooldowns,
            last_sent_at: [None; AlertKind::COUNT],
            paused_until: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn cooldowns(&self) -> &Cooldowns {
        &self.cooldowns
    }

    /// Filters `flags` down to the kinds that may be dispatched at `now`, and
    /// records the dispatch time of each one returned.
    pub fn select(&mut self, flags: &BTreeSet<AlertKind>, now: SystemTime) -> Vec<AlertKind> {
        if self.is_paused(now) {
            if !flags.is_empty() {
                debug!(suppressed = flags.len(), "alerts paused, suppressing dispatch");
            }
            return Vec::new();
        }

        let mut dispatched = Vec::with_capacity(flags.len());
        for &kind in flags {
            if self.cooling(kind, now) {
                debug!(%kind, "alert within cooldown, suppressed");
                continue;
            }
            if let Some(slot) = self.last_sent_at.get_mut(kind.index()) {
                *slot = Some(now);
            }
            dispatched.push(kind);
        }
        dispatched
    }

    fn cooling(&self, kind: AlertKind, now: SystemTime) -> bool {
        let Some(Some(last)) = self.last_sent_at.get(kind.index()) else {
            return false;
        };
        // A clock that stepped backwards counts as zero elapsed time.
        let elapsed = now.duration_since(*last).unwrap_or(Duration::ZERO);
        elapsed < self.cooldowns.get(kind)
    }

    pub fn last_sent_at(&self, kind: AlertKind) -> Option<SystemTime> {
        self.last_sent_at.get(kind.index()).copied().flatten()
    }

    /// Suppresses all dispatch for `hours` from `now`. Replaces any earlier pause.
    pub fn pause(&mut self, hours: i64, now: SystemTime) -> Result<SystemTime, PauseError> {
        if !(1..=MAX_PAUSE_HOURS).contains(&hours) {
            return Err(PauseError::OutOfRange(hours));
        }
        let seconds = u64::try_from(hours).map_err(|_| PauseError::OutOfRange(hours))? * 3600;
        self.paused_until = now + Duration::from_secs(seconds);
        Ok(self.paused_until)
    }

    pub fn paused_until(&self) -> SystemTime {
        self.paused_until
    }

    pub fn is_paused(&self, now: SystemTime) -> bool {
        now < self.paused_until
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(Cooldowns::default())
    }
}
