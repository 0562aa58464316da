//! CLI for Eventide.

pub mod handlers;

use clap::{Args, Parser, Subcommand};

use crate::types::DEFAULT_NAMESPACE;

/// Eventide CLI
#[derive(Parser, Debug)]
#[command(name = "eventide", version, about = "Chat with remote agents and follow their turns")]
pub struct Cli {
    /// Backend base URL (overrides EVENTIDE_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Keep sessions on the backend instead of the local data directory
    #[arg(long, global = true)]
    pub remote: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available agents
    Agents,
    /// Send a prompt and stream the agent's reply
    Chat(ChatArgs),
    /// Session management
    Sessions(SessionsArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Agent name
    #[arg(short, long)]
    pub agent: String,

    /// Agent namespace
    #[arg(short, long, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Continue an existing session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Fail the turn if the stream has not ended after this long (e.g. 90s)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Print tool calls as they resolve
    #[arg(long)]
    pub show_tools: bool,

    /// User prompt
    pub prompt: String,
}

/// Arguments for the `sessions` subcommand group.
#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionCommands,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List sessions, most recent first
    List,
    /// Show a session's messages
    Show(SessionIdArgs),
    /// Delete a session
    Delete(SessionIdArgs),
}

#[derive(Args, Debug)]
pub struct SessionIdArgs {
    pub session_id: String,
}
