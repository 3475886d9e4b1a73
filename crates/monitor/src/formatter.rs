//! Markdown texts for alerts and operator replies.

use crate::models::{AlertKind, CycleSnapshot, miss_rate};
use crate::state::MonitorState;
use chrono::{DateTime, Utc};
use std::time::SystemTime;

pub const STARTUP_HEIGHT_FAILED: &str =
    "⚠️ Failed to fetch initial block height. Starting from 0.";

/// How raw voting power is shown to humans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayUnits {
    pub denom: String,
    pub exponent: u32,
}

impl Default for DisplayUnits {
    fn default() -> Self {
        Self {
            denom: "UNION".to_owned(),
            exponent: 6,
        }
    }
}

impl DisplayUnits {
    /// Whole display units, truncated.
    pub fn scale(&self, raw: u64) -> u64 {
        match 10u64.checked_pow(self.exponent) {
            Some(divisor) => raw / divisor,
            None => 0,
        }
    }

    pub fn power(&self, raw: Option<u64>) -> String {
        match raw {
            Some(raw) => format!("{} {}", self.scale(raw), self.denom),
            None => format!("N/A {}", self.denom),
        }
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "N/A".to_owned(), |value| value.to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

fn percent(total_missed: u64, window: u64) -> f64 {
    miss_rate(total_missed, window) * 100.0
}

pub fn alert_message(
    kind: AlertKind,
    snapshot: &CycleSnapshot,
    window: u64,
    units: &DisplayUnits,
) -> String {
    let validator = &snapshot.validator;
    match kind {
        AlertKind::NotActive => "*Validator is not in the active set!*".to_owned(),
        AlertKind::Jailed => "*Validator is jailed!* Immediate action required!".to_owned(),
        AlertKind::LowVotingPower => format!(
            "*Low voting power*: {} (Rank: {})",
            units.power(validator.voting_power),
            or_na(validator.rank)
        ),
        AlertKind::SlowBlockTime => {
            format!("*Slow block time*: {:.2}s", snapshot.avg_block_time_secs)
        }
        AlertKind::LowDelegatorCount => {
            format!("*Low delegator count*: {}", or_na(validator.delegator_count))
        }
        AlertKind::HighMissRate => format!(
            "*High miss rate*: {}/{window} blocks missed!",
            snapshot.total_missed_in_window
        ),
        AlertKind::NotSynced => "*Node is not synced!*".to_owned(),
        AlertKind::RpcUnreachable => {
            "🚨 *Critical Error*: RPC endpoint unreachable. Shutting down.".to_owned()
        }
        AlertKind::MissedBlockBurst => format!(
            "🚨 *Validator missed {} blocks since last alert!* Slashing Window: {}/{window} ({:.1}%)",
            snapshot.missed_since_last_alert,
            snapshot.total_missed_in_window,
            percent(snapshot.total_missed_in_window, window)
        ),
    }
}

pub fn status_reply(
    state: &MonitorState,
    paused_until: SystemTime,
    now: SystemTime,
    units: &DisplayUnits,
) -> String {
    let validator = &state.validator;
    let pause = if now < paused_until {
        format!("paused until {} UTC", clock(paused_until))
    } else {
        "active".to_owned()
    };

    format!(
        "*Validator Status*\n\
         Active: {}\n\
         Voting Power: {} (Rank: {})\n\
         Jailed: {}\n\
         Delegators: {}\n\
         Missed Blocks: {}/{} ({:.1}%)\n\
         Uptime: {:.1}%\n\
         Sync Status: {}\n\
         Alerts: {}",
        yes_no(validator.active),
        units.power(validator.voting_power),
        or_na(validator.rank),
        yes_no(validator.jailed),
        or_na(validator.delegator_count),
        state.total_missed_in_window,
        state.window_size,
        percent(state.total_missed_in_window, state.window_size),
        state.uptime(),
        if validator.syncing { "Catching Up" } else { "Synced" },
        pause,
    )
}

pub fn missed_reply(state: &MonitorState) -> String {
    format!(
        "*Missed Blocks*\n\
         Since Last Alert: {}\n\
         Slashing Window ({} blocks): {} ({:.1}%)",
        state.missed_since_last_alert,
        state.window_size,
        state.total_missed_in_window,
        percent(state.total_missed_in_window, state.window_size),
    )
}

pub fn network_reply(state: &MonitorState) -> String {
    let last_cycle = state
        .last_cycle_at
        .map_or_else(|| "never".to_owned(), |at| format!("{} UTC", clock(at)));
    format!(
        "*Network Stats*\n\
         Avg Block Time: {:.2}s\n\
         Last Height: {}\n\
         Last Check: {}",
        state.avg_block_time_secs, state.last_observed_height, last_cycle,
    )
}

pub fn validator_reply(state: &MonitorState, units: &DisplayUnits) -> String {
    let validator = &state.validator;
    let share = match (validator.voting_power, validator.total_voting_power) {
        (Some(power), Some(total)) if total > 0 => {
            format!("{:.2}%", miss_rate(power, total) * 100.0)
        }
        _ => "N/A".to_owned(),
    };
    format!(
        "*Validator Details*\n\
         Voting Power: {} (Rank: {})\n\
         Share of Total Power: {}\n\
         Jailed: {}\n\
         Delegators: {}",
        units.power(validator.voting_power),
        or_na(validator.rank),
        share,
        yes_no(validator.jailed),
        or_na(validator.delegator_count),
    )
}

pub fn pause_reply(hours: i64) -> String {
    format!("Alerts paused for {hours} hour(s).")
}

pub fn help_reply() -> String {
    "*Union Validator Monitor*\n\
     /status - validator overview\n\
     /missed - missed blocks in the slashing window\n\
     /network - average block time\n\
     /validator - voting power and delegators\n\
     /graph - missed blocks over time\n\
     /pause <hours> - silence alerts for 1 to 24 hours"
        .to_owned()
}

pub fn chart_reply(chart: &str) -> String {
    format!("```\n{chart}\n```")
}

fn clock(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%Y-%m-%d %H:%M").to_string()
}
