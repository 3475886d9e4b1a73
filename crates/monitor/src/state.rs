use crate::alert_engine::AlertEngine;
use crate::models::{CycleSnapshot, ValidatorSnapshot};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;

/// Latest view of the validator, written by the poll loop and read by operator commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorState {
    pub window_size: u64,
    pub last_observed_height: u64,
    pub validator: ValidatorSnapshot,
    pub avg_block_time_secs: f64,
    pub total_missed_in_window: u64,
    pub missed_since_last_alert: u64,
    pub consecutive_failures: u32,
    pub last_cycle_at: Option<SystemTime>,
}

impl MonitorState {
    pub fn new(window_size: u64, start_height: u64) -> Self {
        Self {
            window_size,
            last_observed_height: start_height,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            validator: self.validator.clone(),
            avg_block_time_secs: self.avg_block_time_secs,
            total_missed_in_window: self.total_missed_in_window,
            missed_since_last_alert: self.missed_since_last_alert,
            consecutive_failures: self.consecutive_failures,
        }
    }

    pub fn uptime(&self) -> f64 {
        crate::models::uptime(self.total_missed_in_window, self.window_size)
    }
}

/// Everything both the poll loop and the command listener touch, behind one lock.
#[derive(Debug)]
pub struct MonitorShared {
    pub status: MonitorState,
    pub alerts: AlertEngine,
}

pub type SharedState = Arc<Mutex<MonitorShared>>;

pub fn shared(status: MonitorState, alerts: AlertEngine) -> SharedState {
    Arc::new(Mutex::new(MonitorShared { status, alerts }))
}
