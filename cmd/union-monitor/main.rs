mod cli;
mod initializers;

use clap::Parser;
use cli::{CLI, Options};
use initializers::{
    init_collector, init_history, init_notifier, init_tracing, init_tracker, spawn_signal_handler,
};
use std::time::Duration;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};
use union_monitor_core::{
    alert_engine::AlertEngine,
    alerter::{AlertQueue, run_sender},
    bot,
    commands::CommandContext,
    config::AppConfig,
    evaluator::Evaluator,
    service::{CycleVerdict, Monitor},
    state::{self, MonitorState},
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    let _guard = init_tracing(&opts)?;

    match command {
        Some(subcommand) => subcommand.run(&opts),
        None => run_monitor(&opts).await,
    }
}

async fn run_monitor(opts: &Options) -> eyre::Result<()> {
    let config = AppConfig::load(opts.config.as_deref())?;
    info!(
        rpc = %config.chain.rpc_url,
        consensus_address = %config.chain.consensus_address,
        window = config.monitor.slashing_window,
        "starting union-monitor"
    );

    let collector = init_collector(&config)?;

    let cancel_token = CancellationToken::new();
    spawn_signal_handler(cancel_token.clone());
    let tracker = TaskTracker::new();
    let drain_deadline = config.drain_deadline();

    let thresholds = config.thresholds();
    let shared = state::shared(
        MonitorState::new(thresholds.window, 0),
        AlertEngine::new(config.cooldowns()),
    );
    let history = init_history(&config);

    let (bot, notifier) = init_notifier(&config);
    let (queue, rx) = AlertQueue::channel(config.alerts.queue_capacity);
    let sender = tokio::spawn(run_sender(notifier, rx, config.send_interval()));

    if let (Some(bot), Some(telegram)) = (bot, &config.telegram) {
        let context = CommandContext {
            shared: shared.clone(),
            history: history.clone(),
            units: config.display_units(),
            slashing_threshold: config.monitor.slashing_threshold,
            chart_height: config.display.chart_height,
        };
        tracker.spawn(bot::run_listener(
            bot,
            telegram.chat_id,
            context,
            cancel_token.clone(),
        ));
    }

    let mut monitor = Monitor::new(
        collector,
        init_tracker(&config),
        Evaluator::new(thresholds),
        shared,
        queue,
    )
    .with_units(config.display_units())
    .with_timing(config.poll_interval(), drain_deadline);
    if let Some(history) = history {
        monitor = monitor.with_history(history);
    }

    monitor.start().await;
    let verdict = monitor.run(cancel_token.clone()).await;

    info!("shutting down");
    cancel_token.cancel();
    tracker.close();
    if tokio::time::timeout(drain_deadline, tracker.wait())
        .await
        .is_err()
    {
        warn!("command listener did not stop before the drain deadline");
    }
    drain_alerts(sender, drain_deadline).await;

    if verdict == CycleVerdict::Shutdown {
        error!("exiting after repeated rpc failures");
        eyre::bail!(
            "rpc endpoint unreachable for {} consecutive cycles",
            config.monitor.max_failures
        );
    }
    Ok(())
}

async fn drain_alerts(sender: tokio::task::JoinHandle<usize>, deadline: Duration) {
    match tokio::time::timeout(deadline, sender).await {
        Ok(Ok(delivered)) => info!(delivered, "alert queue drained"),
        Ok(Err(join_error)) => warn!(%join_error, "alert sender task failed"),
        Err(_) => warn!("alert queue not drained before the drain deadline"),
    }
}
