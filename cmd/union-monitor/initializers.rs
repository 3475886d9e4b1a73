use crate::cli::{LogColor, Options};
use eyre::WrapErr;
use std::{
    io::IsTerminal,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, fmt, layer::SubscriberExt};
use union_monitor_core::{
    alerter::{LogNotifier, Notifier, TelegramAlerter},
    collector::CometCollector,
    config::AppConfig,
    storage::{HistoryRepository, HistoryStore},
    window::Tracker,
};

pub fn init_tracing(opts: &Options) -> eyre::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stdout().is_terminal(),
    };

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_ansi(use_color);

    let (file_layer, guard) = if let Some(log_dir) = &opts.log_dir {
        std::fs::create_dir_all(log_dir)
            .wrap_err_with(|| format!("failed to create log directory {}", log_dir.display()))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let log_file = log_dir.join(format!("union-monitor_{timestamp}.log"));

        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_file)
            .wrap_err_with(|| format!("failed to open log file {}", log_file.display()))?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let file_layer = fmt::layer()
            .with_target(include_target)
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(file_layer), Some(guard))
    } else {
        (None, None)
    };

    let subscriber =
        Registry::default().with(fmt_layer.and_then(file_layer).with_filter(log_filter));

    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("setting default subscriber failed")?;

    Ok(guard)
}

pub fn init_collector(config: &AppConfig) -> eyre::Result<Arc<CometCollector>> {
    let collector = CometCollector::new(
        &config.chain.rpc_url,
        &config.chain.rest_url,
        &config.chain.consensus_address,
        &config.chain.operator_address,
        config.client_config(),
    )?;
    Ok(Arc::new(collector))
}

pub fn init_tracker(config: &AppConfig) -> Tracker {
    Tracker::new(config.monitor.slashing_window, &config.chain.consensus_address)
        .with_fetch_concurrency(config.chain.fetch_concurrency)
}

/// Telegram bot and alert notifier. Without credentials alerts only reach the log.
pub fn init_notifier(config: &AppConfig) -> (Option<Bot>, Arc<dyn Notifier>) {
    match &config.telegram {
        Some(telegram) => {
            let bot = Bot::new(telegram.bot_token.clone());
            let notifier = TelegramAlerter::new(bot.clone(), telegram.chat_id);
            (Some(bot), Arc::new(notifier))
        }
        None => {
            warn!("no telegram credentials configured, alerts are written to the log only");
            (None, Arc::new(LogNotifier))
        }
    }
}

/// History is optional: the monitor keeps running when the database cannot be opened.
pub fn init_history(config: &AppConfig) -> Option<Arc<dyn HistoryStore>> {
    let path = &config.history.sqlite_path;
    match HistoryRepository::open(path, config.history.max_entries) {
        Ok(repository) => {
            info!(path = %path.display(), "history database opened");
            Some(Arc::new(repository))
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "history disabled");
            None
        }
    }
}

/// Cancels `cancel` on Ctrl-C or SIGTERM.
pub fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term_signal) => {
                    term_signal.recv().await;
                }
                Err(error) => {
                    warn!(%error, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
            () = terminate => info!("received SIGTERM"),
            () = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}
