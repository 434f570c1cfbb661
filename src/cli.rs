use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mock-chat")]
#[command(version = "0.1.0")]
#[command(about = "Terminal client for the Mock Chat training backend")]
pub struct Args {
    /// Path to a TOML config file (base URL, backoff, poll cadence)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where the local session is persisted
    #[arg(long, default_value = ".mock-chat-session.json")]
    pub session: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Trainer/admin login with email and password
    Login {
        email: String,
        password: String,
    },
    /// Agent entry: join a conversation by its key (no password)
    Join {
        conv_key: String,
    },
    /// Create a conversation and print its key for sharing
    Create {
        /// Agent-side participant name
        associate: String,
        /// Trainer name; defaults to the logged-in user
        #[arg(long)]
        trainer: Option<String>,
    },
    /// List conversations
    List {
        /// Show everyone's conversations, not just your own
        #[arg(long)]
        all: bool,
    },
    /// Send one message
    Send {
        text: String,
        /// Conversation key; defaults to the session's active key
        #[arg(long)]
        conv_key: Option<String>,
    },
    /// Follow a conversation live
    Watch {
        /// Conversation key; defaults to the session's active key
        #[arg(long)]
        conv_key: Option<String>,
        /// Use timed polling instead of the SSE stream
        #[arg(long)]
        poll: bool,
    },
    /// End a conversation (trainer/admin only)
    End {
        /// Conversation key; defaults to the session's active key
        #[arg(long)]
        conv_key: Option<String>,
    },
    /// Export a transcript to CSV
    Export {
        /// Conversation key; defaults to the session's active key
        #[arg(long)]
        conv_key: Option<String>,
        /// Output file path
        #[arg(long, default_value = "transcript.csv")]
        output: PathBuf,
    },
    /// Clear the local session
    Logout,
}
