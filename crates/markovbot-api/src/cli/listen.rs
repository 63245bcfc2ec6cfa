//! Bot loop over stdin.
//!
//! Each input line is `<chat_id> <text>`. Lines whose text is a bot command
//! (`/markov`, `/markovclear`, `/start`, optionally suffixed `@botname`) are
//! answered on stdout as `<chat_id> <reply>`; every other line is learned.
//! On end of input, Ctrl+C or SIGTERM the store is flushed once.

use anyhow::Result;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use markovbot_core::service::ChainManager;
use markovbot_core::store::ChainBackend;
use markovbot_types::chat::ChatId;

use crate::state::AppState;

const WELCOME: &str = "Hi, I'm the Markov Chain bot! I read the messages in this chat, \
and when you run /markov I put together a message from words that are likely to follow each other.";

/// A recognized bot command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Markov,
    MarkovClear,
}

/// How a line of chat text is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Command(BotCommand),
    /// A command addressed to a different bot.
    Ignore,
    Learn(&'a str),
}

/// Split `<chat_id> <text>`. Returns `None` for lines without a valid id.
pub fn parse_line(line: &str) -> Option<(ChatId, &str)> {
    let line = line.trim();
    let (id, text) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let chat = id.parse::<ChatId>().ok()?;
    Some((chat, text.trim()))
}

/// Decide what to do with one message.
pub fn route<'a>(text: &'a str, bot_name: Option<&str>) -> Route<'a> {
    let Some(first) = text.split_whitespace().next() else {
        return Route::Learn(text);
    };
    let Some(command) = first.strip_prefix('/') else {
        return Route::Learn(text);
    };

    let (name, addressee) = match command.split_once('@') {
        Some((name, addressee)) => (name, Some(addressee)),
        None => (command, None),
    };
    if let (Some(addressee), Some(ours)) = (addressee, bot_name) {
        if !addressee.eq_ignore_ascii_case(ours) {
            return Route::Ignore;
        }
    }

    match name.to_ascii_lowercase().as_str() {
        "start" => Route::Command(BotCommand::Start),
        "markov" => Route::Command(BotCommand::Markov),
        "markovclear" => Route::Command(BotCommand::MarkovClear),
        _ => Route::Learn(text),
    }
}

/// Handle one message, returning the reply to send, if any.
pub async fn handle_message<B: ChainBackend>(
    manager: &ChainManager<B>,
    chat: ChatId,
    text: &str,
    bot_name: Option<&str>,
) -> Result<Option<String>> {
    match route(text, bot_name) {
        Route::Command(BotCommand::Start) => Ok(Some(WELCOME.to_string())),
        Route::Command(BotCommand::Markov) => {
            tracing::info!(%chat, "/markov");
            Ok(Some(manager.generate_for_chat(chat, None).await?))
        }
        Route::Command(BotCommand::MarkovClear) => {
            tracing::info!(%chat, "/markovclear");
            manager.reset_chat(chat).await?;
            Ok(Some("The chain for this chat was erased.".to_string()))
        }
        Route::Ignore => Ok(None),
        Route::Learn(text) => {
            manager.learn_message(chat, text).await?;
            Ok(None)
        }
    }
}

fn print_reply(chat: ChatId, reply: &str, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({ "chat": chat, "reply": reply });
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!("{chat} {reply}");
    }
    Ok(())
}

/// Run the loop until stdin closes or a shutdown signal arrives, then flush.
pub async fn listen(state: &AppState, bot_name: Option<String>, json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = crate::shutdown_signal();
    tokio::pin!(shutdown);

    tracing::info!(
        data_dir = %state.data_dir.display(),
        cache_capacity = state.config.cache_capacity,
        "listening on stdin"
    );

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let Some((chat, text)) = parse_line(&line) else {
            tracing::warn!("ignoring line without a chat id: {line:?}");
            continue;
        };

        match handle_message(&*state.manager, chat, text, bot_name.as_deref()).await {
            Ok(Some(reply)) => print_reply(chat, &reply, json)?,
            Ok(None) => {}
            Err(err) => tracing::error!(%chat, "failed to handle message: {err:#}"),
        }
    }

    let saved = state.flush().await?;
    if !json {
        eprintln!("  {} Saved {saved} chat(s)", style("✓").green().bold());
    }
    Ok(())
}
