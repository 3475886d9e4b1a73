use std::{fmt::Display, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::WrapErr;
use tracing::Level;
use union_monitor_core::{
    config::AppConfig,
    graph::{NO_DATA, render_missed_chart},
    storage::{HistoryRepository, HistoryStore},
};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "union-monitor",
    version,
    about = "Liveness monitor for a Union validator"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Option<Subcommand>,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "config",
        value_name = "CONFIG_FILE",
        help = "TOML configuration file.",
        long_help = "Every setting has a default; UNION_MONITOR_* environment variables override the file.",
        help_heading = "Monitor options",
        env = "UNION_MONITOR_CONFIG"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "UNION_MONITOR_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error. RUST_LOG directives take precedence.",
        help_heading = "Logging options"
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        help_heading = "Logging options",
        env = "UNION_MONITOR_LOG_COLOR"
    )]
    pub log_color: LogColor,
    #[arg(
        long = "log.dir",
        value_name = "LOG_DIR",
        help = "Directory to store log files.",
        help_heading = "Logging options",
        env = "UNION_MONITOR_LOG_DIR"
    )]
    pub log_dir: Option<PathBuf>,
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(name = "history", about = "Print persisted cycle history, newest last")]
    History {
        #[arg(long = "limit", value_name = "ROWS", default_value_t = 50)]
        limit: usize,
    },
    #[command(name = "graph", about = "Print the missed-blocks chart for persisted history")]
    Graph {
        #[arg(long = "limit", value_name = "ROWS", default_value_t = 1440)]
        limit: usize,
    },
    #[command(
        name = "check-config",
        about = "Load and validate the configuration, then print the effective settings"
    )]
    CheckConfig,
}

impl Subcommand {
    pub fn run(self, opts: &Options) -> eyre::Result<()> {
        match self {
            Subcommand::History { limit } => {
                let config = AppConfig::read(opts.config.as_deref())?;
                let repository = open_repository(&config)?;
                let points = repository.load(Some(limit))?;
                if points.is_empty() {
                    println!("No history recorded in {}", config.history.sqlite_path.display());
                }
                for point in points {
                    let voting_power = point
                        .voting_power
                        .map_or_else(|| "N/A".to_owned(), |power| power.to_string());
                    println!(
                        "{}  missed={}  voting_power={}",
                        DateTime::<Utc>::from(point.timestamp).format("%Y-%m-%d %H:%M:%S"),
                        point.total_missed,
                        voting_power
                    );
                }
            }
            Subcommand::Graph { limit } => {
                let config = AppConfig::read(opts.config.as_deref())?;
                let repository = open_repository(&config)?;
                let points = repository.load(Some(limit))?;
                let chart = render_missed_chart(
                    &points,
                    config.monitor.slashing_window,
                    config.monitor.slashing_threshold,
                    config.display.chart_height,
                );
                println!("{}", chart.as_deref().unwrap_or(NO_DATA));
            }
            Subcommand::CheckConfig => {
                let config = AppConfig::load(opts.config.as_deref())?;
                println!("rpc_url            = {}", config.chain.rpc_url);
                println!("rest_url           = {}", config.chain.rest_url);
                println!("consensus_address  = {}", config.chain.consensus_address);
                println!("operator_address   = {}", config.chain.operator_address);
                println!("poll_interval      = {:?}", config.poll_interval());
                println!(
                    "slashing_window    = {} (threshold {})",
                    config.monitor.slashing_window, config.monitor.slashing_threshold
                );
                println!("max_failures       = {}", config.monitor.max_failures);
                println!("thresholds         = {:?}", config.thresholds());
                println!("cooldown           = {}s", config.alerts.cooldown_secs);
                for (kind, seconds) in &config.alerts.cooldowns {
                    println!("  {kind:<18} = {seconds}s");
                }
                println!(
                    "telegram           = {}",
                    if config.telegram.is_some() { "configured" } else { "disabled (log only)" }
                );
                println!("history            = {}", config.history.sqlite_path.display());
            }
        }
        Ok(())
    }
}

fn open_repository(config: &AppConfig) -> eyre::Result<HistoryRepository> {
    HistoryRepository::open(&config.history.sqlite_path, config.history.max_entries).wrap_err_with(
        || {
            format!(
                "failed to open history database {}",
                config.history.sqlite_path.display()
            )
        },
    )
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}
