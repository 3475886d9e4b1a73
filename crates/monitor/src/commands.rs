use crate::alert_engine::PauseError;
use crate::formatter::{self, DisplayUnits};
use crate::graph::{self, NO_DATA};
use crate::state::SharedState;
use crate::storage::{HistoryStore, StorageError};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

pub const PAUSE_USAGE: &str = "Usage: /pause <hours> (e.g., /pause 2)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Status,
    Missed,
    Network,
    Validator,
    Graph,
    Pause(i64),
    Help,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Usage: /pause <hours> (e.g., /pause 2)")]
    PauseUsage,
    #[error(transparent)]
    Pause(#[from] PauseError),
    #[error("Unknown command: {0}. Send /help for the list of commands.")]
    Unknown(String),
    #[error("Failed to load history: {0}")]
    History(#[from] StorageError),
    #[error("Failed to load history: {0}")]
    HistoryTask(#[from] tokio::task::JoinError),
}

impl OperatorCommand {
    /// Parses `/cmd`, `/cmd@botname` and bare `cmd` forms.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let mut words = text.split_whitespace();
        let head = words.next().unwrap_or_default();
        let name = head.strip_prefix('/').unwrap_or(head);
        let name = name
            .split_once('@')
            .map_or(name, |(name, _bot)| name)
            .to_ascii_lowercase();

        match name.as_str() {
            "status" => Ok(Self::Status),
            "missed" => Ok(Self::Missed),
            "network" => Ok(Self::Network),
            "validator" => Ok(Self::Validator),
            "graph" => Ok(Self::Graph),
            "help" | "start" => Ok(Self::Help),
            "pause" => words
                .next()
                .and_then(|raw| raw.parse::<i64>().ok())
                .map(Self::Pause)
                .ok_or(CommandError::PauseUsage),
            _ => Err(CommandError::Unknown(head.to_owned())),
        }
    }
}

/// Everything a command reply reads from.
#[derive(Clone)]
pub struct CommandContext {
    pub shared: SharedState,
    pub history: Option<Arc<dyn HistoryStore>>,
    pub units: DisplayUnits,
    pub slashing_threshold: f64,
    pub chart_height: usize,
}

impl CommandContext {
    pub async fn execute(
        &self,
        command: OperatorCommand,
        now: SystemTime,
    ) -> Result<String, CommandError> {
        match command {
            OperatorCommand::Status => {
                let shared = self.shared.lock().await;
                Ok(formatter::status_reply(
                    &shared.status,
                    shared.alerts.paused_until(),
                    now,
                    &self.units,
                ))
            }
            OperatorCommand::Missed => {
                let shared = self.shared.lock().await;
                Ok(formatter::missed_reply(&shared.status))
            }
            OperatorCommand::Network => {
                let shared = self.shared.lock().await;
                Ok(formatter::network_reply(&shared.status))
            }
            OperatorCommand::Validator => {
                let shared = self.shared.lock().await;
                Ok(formatter::validator_reply(&shared.status, &self.units))
            }
            OperatorCommand::Graph => self.graph().await,
            OperatorCommand::Pause(hours) => {
                let until = self.shared.lock().await.alerts.pause(hours, now)?;
                info!(hours, ?until, "alerts paused by operator");
                Ok(formatter::pause_reply(hours))
            }
            OperatorCommand::Help => Ok(formatter::help_reply()),
        }
    }

    async fn graph(&self) -> Result<String, CommandError> {
        let Some(history) = &self.history else {
            return Ok(NO_DATA.to_owned());
        };
        let window = self.shared.lock().await.status.window_size;
        let history = Arc::clone(history);
        let points = tokio::task::spawn_blocking(move || history.load(None)).await??;

        Ok(
            graph::render_missed_chart(&points, window, self.slashing_threshold, self.chart_height)
                .map_or_else(|| NO_DATA.to_owned(), |chart| formatter::chart_reply(&chart)),
        )
    }

    /// Parses and executes `text`, turning every error into its user-facing reply.
    pub async fn reply(&self, text: &str, now: SystemTime) -> String {
        let result = match OperatorCommand::parse(text) {
            Ok(command) => self.execute(command, now).await,
            Err(error) => Err(error),
        };
        result.unwrap_or_else(|error| {
            if matches!(error, CommandError::History(_) | CommandError::HistoryTask(_)) {
                warn!(%error, "history unavailable for graph command");
            }
            error.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_engine::AlertEngine;
    use crate::models::HistoryPoint;
    use crate::state::{self, MonitorState};

    struct UnreadableHistory;

    impl HistoryStore for UnreadableHistory {
        fn append(&self, _point: &HistoryPoint) -> Result<(), StorageError> {
            Err(StorageError::OutOfRange("total_missed"))
        }

        fn load(&self, _limit: Option<usize>) -> Result<Vec<HistoryPoint>, StorageError> {
            Err(StorageError::OutOfRange("total_missed"))
        }
    }

    #[test]
    fn parses_slash_bot_and_bare_forms() {
        assert!(matches!(OperatorCommand::parse("/status"), Ok(OperatorCommand::Status)));
        assert!(matches!(
            OperatorCommand::parse("/missed@union_monitor_bot"),
            Ok(OperatorCommand::Missed)
        ));
        assert!(matches!(OperatorCommand::parse("network"), Ok(OperatorCommand::Network)));
        assert!(matches!(OperatorCommand::parse("  /Graph  "), Ok(OperatorCommand::Graph)));
        assert!(matches!(OperatorCommand::parse("/start"), Ok(OperatorCommand::Help)));
    }

    #[test]
    fn pause_requires_integer_hours() {
        assert!(matches!(OperatorCommand::parse("/pause 2"), Ok(OperatorCommand::Pause(2))));
        assert!(matches!(OperatorCommand::parse("/pause 0"), Ok(OperatorCommand::Pause(0))));
        assert!(matches!(OperatorCommand::parse("/pause"), Err(CommandError::PauseUsage)));
        assert!(matches!(OperatorCommand::parse("/pause soon"), Err(CommandError::PauseUsage)));
        assert!(matches!(OperatorCommand::parse("/pause 1.5"), Err(CommandError::PauseUsage)));
    }

    #[test]
    fn usage_errors_render_operator_texts() {
        assert_eq!(CommandError::PauseUsage.to_string(), PAUSE_USAGE);
        assert_eq!(
            CommandError::Pause(PauseError::OutOfRange(30)).to_string(),
            "Please specify a number between 1 and 24 hours."
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(
            OperatorCommand::parse("/reboot"),
            Err(CommandError::Unknown(name)) if name == "/reboot"
        ));
        assert!(matches!(OperatorCommand::parse(""), Err(CommandError::Unknown(_))));
    }

    #[tokio::test]
    async fn graph_reports_unreadable_history() {
        let context = CommandContext {
            shared: state::shared(MonitorState::new(100, 0), AlertEngine::default()),
            history: Some(Arc::new(UnreadableHistory)),
            units: DisplayUnits::default(),
            slashing_threshold: 0.2,
            chart_height: 10,
        };

        let reply = context.reply("/graph", SystemTime::UNIX_EPOCH).await;
        assert_eq!(
            reply,
            "Failed to load history: value out of range for column total_missed"
        );
    }
}
