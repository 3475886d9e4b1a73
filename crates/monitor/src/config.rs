//! TOML configuration with environment overrides.
//!
//! ```toml
//! [chain]
//! rpc_url = "http://localhost:26657"
//! rest_url = "http://localhost:1317"
//! consensus_address = "4E2F..."
//! operator_address = "unionvaloper1..."
//!
//! [monitor]
//! slashing_window = 100
//! slashing_threshold = 0.2
//!
//! [alerts.cooldowns]
//! high_miss_rate = 600
//! ```

use crate::alert_engine::Cooldowns;
use crate::collector::ClientConfig;
use crate::evaluator::Thresholds;
use crate::formatter::DisplayUnits;
use crate::models::AlertKind;
use crate::storage::DEFAULT_MAX_ENTRIES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

pub const ENV_RPC_URL: &str = "UNION_MONITOR_RPC_URL";
pub const ENV_REST_URL: &str = "UNION_MONITOR_REST_URL";
pub const ENV_CONSENSUS_ADDRESS: &str = "UNION_MONITOR_CONSENSUS_ADDRESS";
pub const ENV_OPERATOR_ADDRESS: &str = "UNION_MONITOR_OPERATOR_ADDRESS";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "UNION_MONITOR_TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "UNION_MONITOR_TELEGRAM_CHAT_ID";
pub const ENV_SQLITE_PATH: &str = "UNION_MONITOR_SQLITE_PATH";
pub const ENV_POLL_SECONDS: &str = "UNION_MONITOR_POLL_SECONDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value in env var {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub monitor: MonitorConfig,
    pub thresholds: ThresholdsConfig,
    pub alerts: AlertsConfig,
    pub display: DisplayConfig,
    pub telegram: Option<TelegramConfig>,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// CometBFT RPC endpoint.
    pub rpc_url: String,
    /// Cosmos SDK REST endpoint.
    pub rest_url: String,
    /// Hex consensus address as it appears in commit signatures.
    pub consensus_address: String,
    /// Bech32 operator address, used for staking queries.
    pub operator_address: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Ceiling for a single retry delay, `Retry-After` hints included.
    pub max_backoff_ms: u64,
    /// Per-height block fetches kept in flight within one cycle.
    pub fetch_concurrency: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:26657".to_owned(),
            rest_url: "http://localhost:1317".to_owned(),
            consensus_address: String::new(),
            operator_address: String::new(),
            request_timeout_secs: 10,
            max_retries: 3,
            backoff_base_ms: 1000,
            max_backoff_ms: 10_000,
            fetch_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub slashing_window: u64,
    pub slashing_threshold: f64,
    pub max_failures: u32,
    /// Grace period for the in-flight cycle and the alert queue on shutdown.
    pub drain_deadline_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            slashing_window: 100,
            slashing_threshold: 0.20,
            max_failures: 5,
            drain_deadline_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Raw chain units.
    pub min_voting_power: u64,
    pub max_block_time_secs: f64,
    pub min_delegators: u64,
    pub missed_burst: u64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        let defaults = Thresholds::default();
        Self {
            min_voting_power: defaults.min_voting_power,
            max_block_time_secs: defaults.max_block_time_secs,
            min_delegators: defaults.min_delegators,
            missed_burst: defaults.missed_burst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub cooldown_secs: u64,
    /// Per-kind overrides keyed by snake_case kind name.
    pub cooldowns: BTreeMap<String, u64>,
    pub send_interval_ms: u64,
    pub queue_capacity: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            cooldowns: BTreeMap::new(),
            send_interval_ms: 1000,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub denom: String,
    pub exponent: u32,
    pub chart_height: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let units = DisplayUnits::default();
        Self {
            denom: units.denom,
            exponent: units.exponent,
            chart_height: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub sqlite_path: PathBuf,
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("union-monitor.sqlite"),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl AppConfig {
    /// Reads `path` (defaults when `None`), applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`AppConfig::load`] without validation, for tools that only read history.
    pub fn read(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overrides fields from variables returned by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_RPC_URL) {
            self.chain.rpc_url = value;
        }
        if let Some(value) = lookup(ENV_REST_URL) {
            self.chain.rest_url = value;
        }
        if let Some(value) = lookup(ENV_CONSENSUS_ADDRESS) {
            self.chain.consensus_address = value;
        }
        if let Some(value) = lookup(ENV_OPERATOR_ADDRESS) {
            self.chain.operator_address = value;
        }
        if let Some(value) = lookup(ENV_SQLITE_PATH) {
            self.history.sqlite_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_POLL_SECONDS) {
            self.monitor.poll_interval_secs = parse_env(ENV_POLL_SECONDS, value)?;
        }

        let token = lookup(ENV_TELEGRAM_BOT_TOKEN)
            .or_else(|| self.telegram.as_ref().map(|t| t.bot_token.clone()));
        let chat_id = match lookup(ENV_TELEGRAM_CHAT_ID) {
            Some(value) => Some(parse_env(ENV_TELEGRAM_CHAT_ID, value)?),
            None => self.telegram.as_ref().map(|t| t.chat_id),
        };
        self.telegram = match (token, chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.monitor.slashing_window == 0 {
            return invalid("monitor.slashing_window must be > 0".to_owned());
        }
        let threshold = self.monitor.slashing_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return invalid(format!(
                "monitor.slashing_threshold must be in (0.0, 1.0], got {threshold}"
            ));
        }
        if self.monitor.poll_interval_secs == 0 {
            return invalid("monitor.poll_interval_secs must be > 0".to_owned());
        }
        if self.monitor.max_failures == 0 {
            return invalid("monitor.max_failures must be > 0".to_owned());
        }
        if self.chain.consensus_address.trim().is_empty() {
            return invalid(format!(
                "chain.consensus_address is required (or set {ENV_CONSENSUS_ADDRESS})"
            ));
        }
        if self.chain.request_timeout_secs == 0 {
            return invalid("chain.request_timeout_secs must be > 0".to_owned());
        }
        if self.chain.fetch_concurrency == 0 {
            return invalid("chain.fetch_concurrency must be > 0".to_owned());
        }
        if self.alerts.queue_capacity == 0 {
            return invalid("alerts.queue_capacity must be > 0".to_owned());
        }
        if let Some(unknown) = self
            .alerts
            .cooldowns
            .keys()
            .find(|name| kind_by_name(name).is_none())
        {
            return invalid(format!("alerts.cooldowns has unknown alert kind {unknown:?}"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            window: self.monitor.slashing_window,
            slashing_threshold: self.monitor.slashing_threshold,
            min_voting_power: self.thresholds.min_voting_power,
            max_block_time_secs: self.thresholds.max_block_time_secs,
            min_delegators: self.thresholds.min_delegators,
            max_failures: self.monitor.max_failures,
            missed_burst: self.thresholds.missed_burst,
        }
    }

    pub fn cooldowns(&self) -> Cooldowns {
        self.alerts.cooldowns.iter().fold(
            Cooldowns::uniform(Duration::from_secs(self.alerts.cooldown_secs)),
            |cooldowns, (name, seconds)| match kind_by_name(name) {
                Some(kind) => cooldowns.with_override(kind, Duration::from_secs(*seconds)),
                None => cooldowns,
            },
        )
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.chain.request_timeout_secs),
            max_retries: self.chain.max_retries,
            base_backoff: Duration::from_millis(self.chain.backoff_base_ms),
            max_backoff: Duration::from_millis(self.chain.max_backoff_ms),
        }
    }

    pub fn display_units(&self) -> DisplayUnits {
        DisplayUnits {
            denom: self.display.denom.clone(),
            exponent: self.display.exponent,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_secs)
    }

    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.monitor.drain_deadline_secs)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.alerts.send_interval_ms)
    }
}

fn kind_by_name(name: &str) -> Option<AlertKind> {
    AlertKind::ALL.into_iter().find(|kind| kind.name() == name)
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() -> Result<(), ConfigError> {
        let config = AppConfig::from_toml_str("")?;
        assert_eq!(config.monitor.poll_interval_secs, 60);
        assert_eq!(config.monitor.slashing_window, 100);
        assert_eq!(config.alerts.cooldown_secs, 300);
        assert_eq!(config.history.max_entries, 5040);
        assert_eq!(config.thresholds(), Thresholds::default());
        assert!(config.telegram.is_none());
        assert_eq!(config.client_config().max_backoff, Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn parses_sections_and_cooldown_overrides() -> Result<(), ConfigError> {
        let raw = r#"
            [chain]
            consensus_address = "abc123"
            fetch_concurrency = 8

            [monitor]
            slashing_window = 200

            [alerts.cooldowns]
            high_miss_rate = 600

            [telegram]
            bot_token = "token"
            chat_id = -100123
        "#;
        let config = AppConfig::from_toml_str(raw)?;
        config.validate()?;
        assert_eq!(config.thresholds().window, 200);
        assert_eq!(config.chain.fetch_concurrency, 8);

        let cooldowns = config.cooldowns();
        assert_eq!(cooldowns.get(AlertKind::HighMissRate), Duration::from_secs(600));
        assert_eq!(cooldowns.get(AlertKind::Jailed), Duration::from_secs(300));
        assert!(config.telegram.is_some_and(|t| t.chat_id == -100_123));
        Ok(())
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        let result = config.apply_env(lookup(&[
            (ENV_RPC_URL, "http://rpc:26657"),
            (ENV_CONSENSUS_ADDRESS, "DEADBEEF"),
            (ENV_POLL_SECONDS, "30"),
            (ENV_TELEGRAM_BOT_TOKEN, "token"),
            (ENV_TELEGRAM_CHAT_ID, "42"),
        ]));
        assert!(result.is_ok());
        assert_eq!(config.chain.rpc_url, "http://rpc:26657");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert!(config.telegram.as_ref().is_some_and(|t| t.chat_id == 42));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn telegram_needs_both_token_and_chat() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(lookup(&[(ENV_TELEGRAM_BOT_TOKEN, "token")])).is_ok());
        assert!(config.telegram.is_none());
    }

    #[test]
    fn rejects_malformed_env_numbers() {
        let mut config = AppConfig::default();
        let result = config.apply_env(lookup(&[(ENV_POLL_SECONDS, "soon")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidEnv { name: ENV_POLL_SECONDS, .. })
        ));
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.chain.consensus_address = "ABC".to_owned();
        assert!(config.validate().is_ok());

        let mut broken = config.clone();
        broken.monitor.slashing_window = 0;
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.monitor.slashing_threshold = 0.0;
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.monitor.slashing_threshold = 1.5;
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.monitor.max_failures = 0;
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.chain.request_timeout_secs = 0;
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.alerts.queue_capacity = 0;
        assert!(broken.validate().is_err());

        let mut broken = config.clone();
        broken.alerts.cooldowns.insert("flooded".to_owned(), 10);
        assert!(broken.validate().is_err());

        let mut broken = config;
        broken.chain.consensus_address = "  ".to_owned();
        assert!(broken.validate().is_err());
    }
}
