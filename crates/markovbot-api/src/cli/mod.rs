//! CLI command definitions and dispatch for the `markovbot` binary.
//!
//! Uses clap derive macros for argument parsing. One-shot commands operate on
//! a single chat; `listen` runs the bot loop over stdin.

pub mod chain;
pub mod listen;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use markovbot_types::chat::ChatId;

/// Markov chain chat bot backed by one JSON file per chat.
#[derive(Parser)]
#[command(name = "markovbot", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Directory holding the chat_<id>.json files and config.toml.
    #[arg(long, global = true, env = "MARKOVBOT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Feed one message into a chat's chain.
    Learn {
        /// Chat id (negative for groups).
        #[arg(allow_hyphen_values = true)]
        chat: ChatId,

        /// Message text.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },

    /// Generate a message from a chat's chain.
    #[command(alias = "gen")]
    Generate {
        #[arg(allow_hyphen_values = true)]
        chat: ChatId,

        /// Maximum number of tokens (defaults to max_message_tokens from config.toml).
        #[arg(short, long)]
        max_tokens: Option<usize>,
    },

    /// Erase a chat's chain.
    Clear {
        #[arg(allow_hyphen_values = true)]
        chat: ChatId,
    },

    /// Copy a chain to a new chat id (group upgraded to supergroup).
    Migrate {
        #[arg(allow_hyphen_values = true)]
        from: ChatId,

        #[arg(allow_hyphen_values = true)]
        to: ChatId,
    },

    /// Show word and transition counts for a chat.
    Stats {
        #[arg(allow_hyphen_values = true)]
        chat: ChatId,
    },

    /// List chats that have a stored chain.
    #[command(alias = "ls")]
    Chats,

    /// Run the bot loop: read `<chat_id> <text>` lines from stdin.
    Listen {
        /// Bot username; commands addressed to any other bot are ignored.
        #[arg(long)]
        bot_name: Option<String>,
    },
}
