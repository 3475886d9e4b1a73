//! Chain data source for the monitor.
//!
//! [`ChainSource`] is the narrow interface the tracker and orchestrator consume.
//! [`CometCollector`] implements it against a CometBFT RPC endpoint plus the
//! Cosmos SDK REST API, with per-request timeouts and exponential backoff retry.

use crate::models::{BlockFacts, ValidatorSnapshot};
use reqwest::{Client, header::RETRY_AFTER};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};

const VALIDATORS_PER_PAGE: u32 = 100;
const MAX_VALIDATOR_PAGES: u32 = 100;

#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    async fn latest_height(&self) -> Result<u64, CollectorError>;
    async fn block_at(&self, height: u64) -> Result<BlockFacts, CollectorError>;
    async fn validator_snapshot(&self) -> Result<ValidatorSnapshot, CollectorError>;
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("connection to {url} failed: {cause}")]
    Connection { url: String, cause: String },
    #[error("{url} timed out")]
    Timeout { url: String },
    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: u16,
        retry_after: Option<u64>,
    },
    #[error("malformed response from {url}: {cause}")]
    Malformed { url: String, cause: String },
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("{url} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        url: String,
        attempts: u32,
        last_error: Box<CollectorError>,
    },
}

impl CollectorError {
    /// Whether the request is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            CollectorError::Connection { .. } | CollectorError::Timeout { .. } => true,
            CollectorError::HttpStatus { status, .. } => matches!(*status, 429 | 502 | 503 | 504),
            CollectorError::Malformed { .. }
            | CollectorError::Client(_)
            | CollectorError::RetryExhausted { .. } => false,
        }
    }

    /// Server-side 5xx on a single request. The tracker skips such heights.
    pub fn is_transient_server_error(&self) -> bool {
        match self {
            CollectorError::HttpStatus { status, .. } => (500..600).contains(status),
            CollectorError::RetryExhausted { last_error, .. } => last_error.is_transient_server_error(),
            _ => false,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CollectorError::HttpStatus {
                status: 429,
                retry_after,
                ..
            } => *retry_after,
            _ => None,
        }
    }

    fn malformed(url: &str, cause: impl ToString) -> Self {
        CollectorError::Malformed {
            url: url.to_owned(),
            cause: cause.to_string(),
        }
    }
}

/// Per-request behaviour of the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Doubles on every retry.
    pub base_backoff: Duration,
    /// Upper bound for any single retry delay, including `Retry-After` hints.
    pub max_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CometCollector {
    client: Client,
    rpc_url: String,
    rest_url: String,
    consensus_address: String,
    operator_address: String,
    config: ClientConfig,
}

impl CometCollector {
    pub fn new(
        rpc_url: &str,
        rest_url: &str,
        consensus_address: &str,
        operator_address: &str,
        config: ClientConfig,
    ) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| CollectorError::Client(error.to_string()))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.trim_end_matches('/').to_owned(),
            rest_url: rest_url.trim_end_matches('/').to_owned(),
            consensus_address: consensus_address.to_ascii_uppercase(),
            operator_address: operator_address.to_owned(),
            config,
        })
    }

    async fn status(&self) -> Result<SyncInfo, CollectorError> {
        let url = format!("{}/status", self.rpc_url);
        let response: RpcEnvelope<StatusResult> = self.get_json(&url).await?;
        Ok(response.result.sync_info)
    }

    async fn validator_set(&self, height: u64) -> Result<Vec<RpcValidator>, CollectorError> {
        let mut validators = Vec::new();
        for page in 1..=MAX_VALIDATOR_PAGES {
            let url = format!(
                "{}/validators?height={height}&page={page}&per_page={VALIDATORS_PER_PAGE}",
                self.rpc_url
            );
            let response: RpcEnvelope<ValidatorsResult> = self.get_json(&url).await?;
            let total = parse_u64(&url, &response.result.total)?;
            let fetched = response.result.validators.len();
            validators.extend(response.result.validators);

            if fetched == 0 || u64::try_from(validators.len()).unwrap_or(u64::MAX) >= total {
                break;
            }
        }
        Ok(validators)
    }

    /// Jailed flag and delegator count from the staking REST API. Missing data is not fatal.
    async fn staking_details(&self) -> (bool, Option<u64>) {
        if self.operator_address.is_empty() {
            return (false, None);
        }

        let validator_url = format!(
            "{}/cosmos/staking/v1beta1/validators/{}",
            self.rest_url, self.operator_address
        );
        let jailed = match self.get_json::<StakingValidatorResponse>(&validator_url).await {
            Ok(response) => response.validator.jailed,
            Err(error) => {
                warn!(error = %error, "staking validator lookup failed");
                false
            }
        };

        let delegations_url = format!(
            "{}/cosmos/staking/v1beta1/validators/{}/delegations?pagination.count_total=true&pagination.limit=1",
            self.rest_url, self.operator_address
        );
        let delegator_count = match self.get_json::<DelegationsResponse>(&delegations_url).await {
            Ok(response) => response
                .pagination
                .and_then(|pagination| pagination.total)
                .and_then(|total| total.parse::<u64>().ok()),
            Err(error) => {
                warn!(error = %error, "delegator count lookup failed");
                None
            }
        };

        (jailed, delegator_count)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CollectorError> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            let error = match self.get_json_once(url).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            attempt += 1;

            if !error.is_retryable() || attempt >= max_attempts {
                if attempt > 1 {
                    return Err(CollectorError::RetryExhausted {
                        url: url.to_owned(),
                        attempts: attempt,
                        last_error: Box::new(error),
                    });
                }
                return Err(error);
            }

            let backoff = self.backoff(&error, attempt);
            debug!(url, attempt, backoff_ms = backoff.as_millis(), error = %error, "retrying request");
            tokio::time::sleep(backoff).await;
        }
    }

    /// Delay before retry number `attempt`, capped at `max_backoff`.
    fn backoff(&self, error: &CollectorError, attempt: u32) -> Duration {
        let delay = error.retry_after_secs().map(Duration::from_secs).unwrap_or_else(|| {
            self.config
                .base_backoff
                .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        });
        delay.min(self.config.max_backoff)
    }

    async fn get_json_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, CollectorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| classify_transport(url, error))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            return Err(CollectorError::HttpStatus {
                url: url.to_owned(),
                status: status.as_u16(),
                retry_after,
            });
        }

        response.json::<T>().await.map_err(|error| {
            if error.is_timeout() {
                CollectorError::Timeout { url: url.to_owned() }
            } else {
                CollectorError::malformed(url, error)
            }
        })
    }
}

#[async_trait::async_trait]
impl ChainSource for CometCollector {
    async fn latest_height(&self) -> Result<u64, CollectorError> {
        let sync_info = self.status().await?;
        parse_u64(&self.rpc_url, &sync_info.latest_block_height)
    }

    async fn block_at(&self, height: u64) -> Result<BlockFacts, CollectorError> {
        let url = format!("{}/block?height={height}", self.rpc_url);
        let response: RpcEnvelope<BlockResult> = self.get_json(&url).await?;
        block_facts_from(&url, height, response.result)
    }

    async fn validator_snapshot(&self) -> Result<ValidatorSnapshot, CollectorError> {
        let sync_info = self.status().await?;
        let height = parse_u64(&self.rpc_url, &sync_info.latest_block_height)?;
        let validators = self.validator_set(height).await?;
        let standing = rank_validator(&self.rpc_url, &validators, &self.consensus_address)?;
        let (jailed, delegator_count) = self.staking_details().await;

        Ok(ValidatorSnapshot {
            active: standing.voting_power.is_some(),
            voting_power: standing.voting_power,
            total_voting_power: Some(standing.total_voting_power),
            rank: standing.rank,
            jailed,
            delegator_count,
            syncing: sync_info.catching_up,
        })
    }
}

fn classify_transport(url: &str, error: reqwest::Error) -> CollectorError {
    if error.is_timeout() {
        CollectorError::Timeout { url: url.to_owned() }
    } else if error.is_decode() {
        CollectorError::malformed(url, error)
    } else {
        CollectorError::Connection {
            url: url.to_owned(),
            cause: error.to_string(),
        }
    }
}

fn parse_u64(url: &str, raw: &str) -> Result<u64, CollectorError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| CollectorError::malformed(url, format!("invalid integer {raw:?}: {error}")))
}

fn parse_block_time(url: &str, raw: &str) -> Result<SystemTime, CollectorError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(SystemTime::from)
        .map_err(|error| CollectorError::malformed(url, format!("invalid block time {raw:?}: {error}")))
}

fn block_facts_from(url: &str, height: u64, result: BlockResult) -> Result<BlockFacts, CollectorError> {
    let time = parse_block_time(url, &result.block.header.time)?;
    let signers = result
        .block
        .last_commit
        .map(|commit| commit.signatures)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|signature| signature.validator_address)
        .filter(|address| !address.is_empty())
        .map(|address| address.to_ascii_uppercase())
        .collect();

    Ok(BlockFacts {
        height,
        time,
        signers,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Standing {
    voting_power: Option<u64>,
    total_voting_power: u64,
    rank: Option<u32>,
}

fn rank_validator(url: &str, validators: &[RpcValidator], address: &str) -> Result<Standing, CollectorError> {
    let mut powers = Vec::with_capacity(validators.len());
    for validator in validators {
        powers.push((validator.address.as_str(), parse_u64(url, &validator.voting_power)?));
    }
    let total_voting_power = powers.iter().map(|(_, power)| *power).sum();

    powers.sort_by(|left, right| right.1.cmp(&left.1));
    let found = powers
        .iter()
        .enumerate()
        .find(|(_, (candidate, _))| candidate.eq_ignore_ascii_case(address));

    let (voting_power, rank) = match found {
        Some((position, (_, power))) => (Some(*power), u32::try_from(position + 1).ok()),
        None => (None, None),
    };

    Ok(Standing {
        voting_power,
        total_voting_power,
        rank,
    })
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
    #[serde(default)]
    catching_up: bool,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: RpcBlock,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    header: RpcHeader,
    #[serde(default)]
    last_commit: Option<RpcCommit>,
}

#[derive(Debug, Deserialize)]
struct RpcHeader {
    time: String,
}

#[derive(Debug, Deserialize)]
struct RpcCommit {
    #[serde(default)]
    signatures: Vec<RpcCommitSig>,
}

#[derive(Debug, Deserialize)]
struct RpcCommitSig {
    #[serde(default)]
    validator_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidatorsResult {
    validators: Vec<RpcValidator>,
    total: String,
}

#[derive(Debug, Deserialize)]
struct RpcValidator {
    address: String,
    voting_power: String,
}

#[derive(Debug, Deserialize)]
struct StakingValidatorResponse {
    validator: StakingValidator,
}

#[derive(Debug, Deserialize)]
struct StakingValidator {
    #[serde(default)]
    jailed: bool,
}

#[derive(Debug, Deserialize)]
struct DelegationsResponse {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    total: Option<String>,
}
