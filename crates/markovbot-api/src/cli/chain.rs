//! One-shot chain commands: learn, generate, clear, migrate, stats, chats.

use anyhow::Result;
use console::style;

use markovbot_types::chat::ChatId;

use crate::state::AppState;

/// Feed one message into `chat`'s chain.
pub async fn learn(state: &AppState, chat: ChatId, text: &[String], json: bool) -> Result<()> {
    let text = text.join(" ");
    state.manager.learn_message(chat, &text).await?;

    if json {
        let out = serde_json::json!({ "chat": chat, "learned": text });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("  {} Learned message for chat {}", style("✓").green().bold(), style(chat).cyan());
    }
    Ok(())
}

pub async fn generate(state: &AppState, chat: ChatId, max_tokens: Option<usize>, json: bool) -> Result<()> {
    let message = state.manager.generate_for_chat(chat, max_tokens).await?;

    if json {
        let out = serde_json::json!({ "chat": chat, "message": message });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{message}");
    }
    Ok(())
}

pub async fn clear(state: &AppState, chat: ChatId, json: bool) -> Result<()> {
    state.manager.reset_chat(chat).await?;

    if json {
        let out = serde_json::json!({ "chat": chat, "cleared": true });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("  {} The chain for chat {} was erased.", style("✓").green().bold(), style(chat).cyan());
    }
    Ok(())
}

pub async fn migrate(state: &AppState, from: ChatId, to: ChatId, json: bool) -> Result<()> {
    state.manager.migrate_chat(from, to).await?;

    if json {
        let out = serde_json::json!({ "from": from, "to": to, "migrated": true });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "  {} Migrated chain {} {} {}",
            style("✓").green().bold(),
            style(from).cyan(),
            style("→").dim(),
            style(to).cyan()
        );
    }
    Ok(())
}

pub async fn stats(state: &AppState, chat: ChatId, json: bool) -> Result<()> {
    let stats = state.manager.chain_stats(chat).await?;

    if json {
        let out = serde_json::json!({ "chat": chat, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} {}", style("Chain for chat").bold(), style(chat).cyan());
    println!();
    println!("  {}  {}", style("Words:").bold(), stats.words);
    println!("  {}  {}", style("Transitions:").bold(), stats.transitions);
    println!("  {}  {}", style("Observations:").bold(), stats.observations);
    println!();
    Ok(())
}

/// List every chat with a stored chain.
pub async fn chats(state: &AppState, json: bool) -> Result<()> {
    let ids = state.manager.list_chats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
        return Ok(());
    }

    if ids.is_empty() {
        println!("  {}", style(format!("No chains in {}", state.data_dir.display())).dim());
        return Ok(());
    }
    for id in ids {
        println!("  {} {}", style("•").dim(), id);
    }
    Ok(())
}
