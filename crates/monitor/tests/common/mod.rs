#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use union_monitor_core::{
    alerter::{AlertError, Notifier},
    collector::{ChainSource, CollectorError},
    models::{BlockFacts, ValidatorSnapshot},
};

pub const VALIDATOR: &str = "A1B2C3D4E5F60718293A4B5C6D7E8F9012345678";
pub const OTHER: &str = "FFEEDDCCBBAA99887766554433221100FFEEDDCC";
pub const BLOCK_SECONDS: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Signed,
    Missed,
    ServerError,
    Unreachable,
}

#[derive(Debug)]
struct ChainState {
    latest: Option<u64>,
    blocks: HashMap<u64, BlockOutcome>,
    snapshot: Option<ValidatorSnapshot>,
    requested: Vec<u64>,
}

/// In-process chain with scripted per-height outcomes. Unscripted heights are signed.
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn block_time(height: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + height * BLOCK_SECONDS)
}

pub fn healthy_validator() -> ValidatorSnapshot {
    ValidatorSnapshot {
        active: true,
        voting_power: Some(5_000_000_000),
        total_voting_power: Some(100_000_000_000),
        rank: Some(4),
        jailed: false,
        delegator_count: Some(120),
        syncing: false,
    }
}

impl MockChain {
    pub fn new(latest: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                latest: Some(latest),
                blocks: HashMap::new(),
                snapshot: Some(healthy_validator()),
                requested: Vec::new(),
            }),
        }
    }

    pub fn set_latest(&self, latest: Option<u64>) {
        lock(&self.state).latest = latest;
    }

    pub fn set_block(&self, height: u64, outcome: BlockOutcome) {
        lock(&self.state).blocks.insert(height, outcome);
    }

    pub fn miss(&self, heights: impl IntoIterator<Item = u64>) {
        let mut state = lock(&self.state);
        for height in heights {
            state.blocks.insert(height, BlockOutcome::Missed);
        }
    }

    pub fn set_snapshot(&self, snapshot: Option<ValidatorSnapshot>) {
        lock(&self.state).snapshot = snapshot;
    }

    pub fn requested(&self) -> Vec<u64> {
        lock(&self.state).requested.clone()
    }

    pub fn clear_requested(&self) {
        lock(&self.state).requested.clear();
    }
}

fn unreachable(url: &str) -> CollectorError {
    CollectorError::Connection {
        url: url.to_owned(),
        cause: "connection refused".to_owned(),
    }
}

#[async_trait::async_trait]
impl ChainSource for MockChain {
    async fn latest_height(&self) -> Result<u64, CollectorError> {
        lock(&self.state).latest.ok_or_else(|| unreachable("/status"))
    }

    async fn block_at(&self, height: u64) -> Result<BlockFacts, CollectorError> {
        let outcome = {
            let mut state = lock(&self.state);
            state.requested.push(height);
            state
                .blocks
                .get(&height)
                .copied()
                .unwrap_or(BlockOutcome::Signed)
        };

        let url = format!("/block?height={height}");
        match outcome {
            BlockOutcome::Signed => Ok(BlockFacts {
                height,
                time: block_time(height),
                signers: vec![OTHER.to_owned(), VALIDATOR.to_owned()],
            }),
            BlockOutcome::Missed => Ok(BlockFacts {
                height,
                time: block_time(height),
                signers: vec![OTHER.to_owned()],
            }),
            BlockOutcome::ServerError => Err(CollectorError::HttpStatus {
                url,
                status: 500,
                retry_after: None,
            }),
            BlockOutcome::Unreachable => Err(unreachable(&url)),
        }
    }

    async fn validator_snapshot(&self) -> Result<ValidatorSnapshot, CollectorError> {
        lock(&self.state)
            .snapshot
            .clone()
            .ok_or_else(|| unreachable("/validators"))
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, text: &str) -> Result<(), AlertError> {
        lock(&self.sent).push(text.to_owned());
        Ok(())
    }
}

/// Drains every message currently queued.
pub fn drain(rx: &mut tokio::sync::mpsc::Receiver<String>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
