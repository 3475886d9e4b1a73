//! Telegram command listener.

use crate::commands::CommandContext;
use std::time::{Duration, SystemTime};
use teloxide::prelude::*;
use teloxide::types::{BotCommand, ParseMode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct ListenerDeps {
    context: CommandContext,
    operator_chat: ChatId,
}

fn command_menu() -> Vec<BotCommand> {
    vec![
        BotCommand::new("status", "Validator overview"),
        BotCommand::new("missed", "Missed blocks in the slashing window"),
        BotCommand::new("network", "Average block time"),
        BotCommand::new("validator", "Voting power and delegators"),
        BotCommand::new("graph", "Missed blocks over time"),
        BotCommand::new("pause", "Pause alerts for 1 to 24 hours"),
        BotCommand::new("help", "List commands"),
    ]
}

/// Answers operator commands from `chat_id` until `cancel` fires.
pub async fn run_listener(
    bot: Bot,
    chat_id: i64,
    context: CommandContext,
    cancel: CancellationToken,
) {
    if let Err(error) = bot.set_my_commands(command_menu()).await {
        warn!(%error, "failed to register command menu");
    }

    let deps = ListenerDeps {
        context,
        operator_chat: ChatId(chat_id),
    };
    let handler = Update::filter_message().endpoint(answer);
    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .default_handler(|_| async {})
        .build();

    let shutdown = dispatcher.shutdown_token();
    let stopper = tokio::spawn(async move {
        cancel.cancelled().await;
        loop {
            match shutdown.shutdown() {
                Ok(stopped) => {
                    stopped.await;
                    break;
                }
                // The dispatcher has not started polling yet.
                Err(_idle) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    info!("command listener started");
    dispatcher.dispatch().await;
    stopper.abort();
    info!("command listener stopped");
}

async fn answer(bot: Bot, msg: Message, deps: ListenerDeps) -> ResponseResult<()> {
    if msg.chat.id != deps.operator_chat {
        debug!(chat = %msg.chat.id, "ignoring message from unknown chat");
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let reply = deps.context.reply(text, SystemTime::now()).await;
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}
