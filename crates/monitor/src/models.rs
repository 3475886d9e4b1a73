use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// A block the validator failed to sign, as recorded by the window tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissedEvent {
    pub height: u64,
    pub timestamp: SystemTime,
}

/// Per-height signing facts returned by a [`crate::collector::ChainSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFacts {
    pub height: u64,
    pub time: SystemTime,
    /// Upper-case hex consensus addresses present in the block's commit set.
    pub signers: Vec<String>,
}

impl BlockFacts {
    pub fn signed_by(&self, consensus_address: &str) -> bool {
        self.signers
            .iter()
            .any(|signer| signer.eq_ignore_ascii_case(consensus_address))
    }
}

/// Validator-set facts fetched once per cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSnapshot {
    /// The validator is present in the active validator set.
    pub active: bool,
    pub voting_power: Option<u64>,
    pub total_voting_power: Option<u64>,
    pub rank: Option<u32>,
    pub jailed: bool,
    pub delegator_count: Option<u64>,
    /// The queried node reports `catching_up`.
    pub syncing: bool,
}

impl ValidatorSnapshot {
    /// Zero value used when the snapshot could not be fetched.
    pub fn unreachable() -> Self {
        Self::default()
    }
}

/// Everything the evaluator looks at, rebuilt on every cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSnapshot {
    pub validator: ValidatorSnapshot,
    pub avg_block_time_secs: f64,
    pub total_missed_in_window: u64,
    pub missed_since_last_alert: u64,
    pub consecutive_failures: u32,
}

impl CycleSnapshot {
    /// Percentage of the window the validator signed. An empty window is exactly 100.
    pub fn uptime(&self, window: u64) -> f64 {
        uptime(self.total_missed_in_window, window)
    }

    /// Share of the window that was missed, in `[0, 1]`.
    pub fn miss_rate(&self, window: u64) -> f64 {
        miss_rate(self.total_missed_in_window, window)
    }
}

#[allow(clippy::as_conversions)]
pub fn miss_rate(total_missed: u64, window: u64) -> f64 {
    if window == 0 {
        return 0.0;
    }
    total_missed as f64 / window as f64
}

pub fn uptime(total_missed: u64, window: u64) -> f64 {
    if total_missed == 0 {
        return 100.0;
    }
    100.0 * (1.0 - miss_rate(total_missed, window))
}

/// Condition flags raised by the evaluator and deduplicated by the alert engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    NotActive,
    Jailed,
    LowVotingPower,
    SlowBlockTime,
    LowDelegatorCount,
    HighMissRate,
    NotSynced,
    RpcUnreachable,
    MissedBlockBurst,
}

impl AlertKind {
    pub const COUNT: usize = 9;

    pub const ALL: [AlertKind; Self::COUNT] = [
        AlertKind::NotActive,
        AlertKind::Jailed,
        AlertKind::LowVotingPower,
        AlertKind::SlowBlockTime,
        AlertKind::LowDelegatorCount,
        AlertKind::HighMissRate,
        AlertKind::NotSynced,
        AlertKind::RpcUnreachable,
        AlertKind::MissedBlockBurst,
    ];

    /// Dense index into per-kind tables.
    pub const fn index(self) -> usize {
        match self {
            AlertKind::NotActive => 0,
            AlertKind::Jailed => 1,
            AlertKind::LowVotingPower => 2,
            AlertKind::SlowBlockTime => 3,
            AlertKind::LowDelegatorCount => 4,
            AlertKind::HighMissRate => 5,
            AlertKind::NotSynced => 6,
            AlertKind::RpcUnreachable => 7,
            AlertKind::MissedBlockBurst => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AlertKind::NotActive => "not_active",
            AlertKind::Jailed => "jailed",
            AlertKind::LowVotingPower => "low_voting_power",
            AlertKind::SlowBlockTime => "slow_block_time",
            AlertKind::LowDelegatorCount => "low_delegator_count",
            AlertKind::HighMissRate => "high_miss_rate",
            AlertKind::NotSynced => "not_synced",
            AlertKind::RpcUnreachable => "rpc_unreachable",
            AlertKind::MissedBlockBurst => "missed_block_burst",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One persisted sample of the missed-blocks series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPoint {
    pub timestamp: SystemTime,
    pub total_missed: u64,
    pub voting_power: Option<u64>,
}
