use crate::models::{AlertKind, CycleSnapshot};
use std::collections::BTreeSet;

/// Limits the evaluator compares a cycle snapshot against.
///
/// Voting power is compared in raw chain units, before any display scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub window: u64,
    /// Fraction of the window that may be missed before `HighMissRate` fires.
    pub slashing_threshold: f64,
    pub min_voting_power: u64,
    pub max_block_time_secs: f64,
    pub min_delegators: u64,
    /// Consecutive unreachable cycles before `RpcUnreachable` fires.
    pub max_failures: u32,
    /// `MissedBlockBurst` fires once more than this many misses accumulate.
    pub missed_burst: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            window: 100,
            slashing_threshold: 0.20,
            min_voting_power: 1000,
            max_block_time_secs: 10.0,
            min_delegators: 10,
            max_failures: 5,
            missed_burst: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    thresholds: Thresholds,
}

impl Evaluator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Maps a snapshot to the set of raised flags. Flags are independent of each other.
    pub fn evaluate(&self, snapshot: &CycleSnapshot) -> BTreeSet<AlertKind> {
        let limits = &self.thresholds;
        let validator = &snapshot.validator;
        let mut flags = BTreeSet::new();

        if !validator.active && validator.voting_power.is_none() {
            flags.insert(AlertKind::NotActive);
        }
        if validator.jailed {
            flags.insert(AlertKind::Jailed);
        }
        if validator
            .voting_power
            .is_some_and(|power| power < limits.min_voting_power)
        {
            flags.insert(AlertKind::LowVotingPower);
        }
        if snapshot.avg_block_time_secs > limits.max_block_time_secs {
            flags.insert(AlertKind::SlowBlockTime);
        }
        if validator
            .delegator_count
            .is_some_and(|count| count < limits.min_delegators)
        {
            flags.insert(AlertKind::LowDelegatorCount);
        }
        if self.miss_rate_exceeded(snapshot) {
            flags.insert(AlertKind::HighMissRate);
        }
        if validator.syncing {
            flags.insert(AlertKind::NotSynced);
        }
        if snapshot.consecutive_failures >= limits.max_failures {
            flags.insert(AlertKind::RpcUnreachable);
        }
        if snapshot.missed_since_last_alert > limits.missed_burst {
            flags.insert(AlertKind::MissedBlockBurst);
        }

        flags
    }

    fn miss_rate_exceeded(&self, snapshot: &CycleSnapshot) -> bool {
        snapshot.total_missed_in_window > 0
            && snapshot.miss_rate(self.thresholds.window) >= self.thresholds.slashing_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidatorSnapshot;

    fn healthy() -> CycleSnapshot {
        CycleSnapshot {
            validator: ValidatorSnapshot {
                active: true,
                voting_power: Some(5_000_000),
                total_voting_power: Some(90_000_000),
                rank: Some(12),
                jailed: false,
                delegator_count: Some(40),
                syncing: false,
            },
            avg_block_time_secs: 5.8,
            total_missed_in_window: 0,
            missed_since_last_alert: 0,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn healthy_validator_raises_nothing() {
        let evaluator = Evaluator::default();
        assert!(evaluator.evaluate(&healthy()).is_empty());
    }

    #[test]
    fn absent_validator_is_not_active() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();
        snapshot.validator = ValidatorSnapshot::unreachable();

        let flags = evaluator.evaluate(&snapshot);
        assert!(flags.contains(&AlertKind::NotActive));
        assert!(!flags.contains(&AlertKind::LowVotingPower));
        assert!(!flags.contains(&AlertKind::LowDelegatorCount));
    }

    #[test]
    fn inactive_with_known_power_is_not_flagged_absent() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();
        snapshot.validator.active = false;

        assert!(!evaluator.evaluate(&snapshot).contains(&AlertKind::NotActive));
    }

    #[test]
    fn flags_are_raised_independently() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();
        snapshot.validator.jailed = true;
        snapshot.validator.voting_power = Some(999);
        snapshot.validator.delegator_count = Some(9);
        snapshot.validator.syncing = true;
        snapshot.avg_block_time_secs = 10.5;

        let flags: Vec<AlertKind> = evaluator.evaluate(&snapshot).into_iter().collect();
        assert_eq!(
            flags,
            vec![
                AlertKind::Jailed,
                AlertKind::LowVotingPower,
                AlertKind::SlowBlockTime,
                AlertKind::LowDelegatorCount,
                AlertKind::NotSynced,
            ]
        );
    }

    #[test]
    fn block_time_exactly_at_limit_is_not_slow() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();
        snapshot.avg_block_time_secs = 10.0;
        assert!(!evaluator.evaluate(&snapshot).contains(&AlertKind::SlowBlockTime));
    }

    #[test]
    fn twenty_one_missed_of_hundred_is_high_miss_rate() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();
        snapshot.total_missed_in_window = 21;

        assert!(evaluator.evaluate(&snapshot).contains(&AlertKind::HighMissRate));
        assert!((snapshot.uptime(100) - 79.0).abs() < 1e-9);
    }

    #[test]
    fn miss_rate_threshold_is_inclusive() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();

        snapshot.total_missed_in_window = 19;
        assert!(!evaluator.evaluate(&snapshot).contains(&AlertKind::HighMissRate));

        snapshot.total_missed_in_window = 20;
        assert!(evaluator.evaluate(&snapshot).contains(&AlertKind::HighMissRate));
    }

    #[test]
    fn unreachable_after_failure_ceiling() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();

        snapshot.consecutive_failures = 4;
        assert!(!evaluator.evaluate(&snapshot).contains(&AlertKind::RpcUnreachable));

        snapshot.consecutive_failures = 5;
        assert!(evaluator.evaluate(&snapshot).contains(&AlertKind::RpcUnreachable));
    }

    #[test]
    fn burst_fires_above_configured_size() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();

        snapshot.missed_since_last_alert = 5;
        assert!(!evaluator.evaluate(&snapshot).contains(&AlertKind::MissedBlockBurst));

        snapshot.missed_since_last_alert = 6;
        assert!(evaluator.evaluate(&snapshot).contains(&AlertKind::MissedBlockBurst));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let evaluator = Evaluator::default();
        let mut snapshot = healthy();
        snapshot.validator.jailed = true;
        snapshot.total_missed_in_window = 40;

        assert_eq!(evaluator.evaluate(&snapshot), evaluator.evaluate(&snapshot));
    }
}
