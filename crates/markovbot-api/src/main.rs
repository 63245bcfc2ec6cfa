//! markovbot entry point.
//!
//! Binary name: `markovbot`
//!
//! Parses CLI arguments, opens the chain store in the data directory, then
//! dispatches to the command handler. Every command ends with a flush so no
//! learned message is left only in memory.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,markovbot_core=debug,markovbot_infra=debug",
        _ => "trace",
    };
    markovbot_observe::tracing_setup::init_tracing(filter, cli.json, cli.otel)
        .map_err(|e| anyhow::anyhow!(e))?;

    let result = run(cli).await;
    markovbot_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.data_dir.clone()).await?;

    let outcome = match cli.command {
        Commands::Learn { chat, text } => cli::chain::learn(&state, chat, &text, cli.json).await,
        Commands::Generate { chat, max_tokens } => {
            cli::chain::generate(&state, chat, max_tokens, cli.json).await
        }
        Commands::Clear { chat } => cli::chain::clear(&state, chat, cli.json).await,
        Commands::Migrate { from, to } => cli::chain::migrate(&state, from, to, cli.json).await,
        Commands::Stats { chat } => cli::chain::stats(&state, chat, cli.json).await,
        Commands::Chats => cli::chain::chats(&state, cli.json).await,
        // Flushes on its own when the loop ends.
        Commands::Listen { bot_name } => return cli::listen::listen(&state, bot_name, cli.json).await,
    };

    // Persist even when the command failed part way.
    let flushed = state.flush().await;
    outcome?;
    flushed?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
