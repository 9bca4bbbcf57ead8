mod commands;
mod config;
mod util;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "forge", about = "forge — the engine behind a git-native AI coding environment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Repository root (defaults to discovering one from the current directory)
    #[arg(long, global = true)]
    repo: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new forge repository
    Init {
        /// Directory to initialize (defaults to current directory)
        path: Option<PathBuf>,
    },

    /// Manage agent sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Manage user-tool approvals
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },

    /// Drive one agent turn
    Turn {
        /// Session branch to run the turn on
        branch: String,
        /// User message for this turn
        #[arg(short, long)]
        message: String,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Spawn a new session on a fresh agent branch
    Spawn {
        /// What the session is meant to accomplish
        #[arg(short, long)]
        intent: String,
    },
    /// List every session branch and its current state
    List,
    /// Show one session's record
    Status {
        /// Session branch
        branch: String,
    },
    /// Merge a session branch into another, archiving its session record
    Merge {
        /// Branch to merge from
        source: String,
        /// Branch to merge into
        #[arg(short, long)]
        into: String,
    },
}

#[derive(Subcommand)]
enum ToolAction {
    /// List built-in and discovered user tools, with approval status
    List,
    /// Approve a user tool's current source
    Approve {
        /// Tool name, as declared in its manifest.json
        name: String,
    },
    /// Revoke a previously approved user tool
    Revoke {
        /// Tool name, as declared in its manifest.json
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
        std::env::set_var("NO_COLOR", "1");
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { path } => commands::init::run(path),
        Commands::Session { action } => match action {
            SessionAction::Spawn { intent } => commands::session::spawn(cli.repo, intent),
            SessionAction::List => commands::session::list(cli.repo),
            SessionAction::Status { branch } => commands::session::status(cli.repo, branch),
            SessionAction::Merge { source, into } => commands::session::merge(cli.repo, source, into),
        },
        Commands::Tool { action } => match action {
            ToolAction::List => commands::tool::list(cli.repo),
            ToolAction::Approve { name } => commands::tool::approve(cli.repo, name),
            ToolAction::Revoke { name } => commands::tool::revoke(cli.repo, name),
        },
        Commands::Turn { branch, message } => commands::turn::run(cli.repo, branch, message),
    }
}
