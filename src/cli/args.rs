use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::CONFIG_DIR_ENV;

/// aicode - AI coding assistant with reviewable edits
#[derive(Parser)]
#[command(name = "aicode")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workspace root (auto-detects git root if absent)
    #[arg(short = 'w', long, global = true)]
    pub workspace_root: Option<String>,

    /// Select model to use
    #[arg(short = 'm', long, global = true)]
    pub model: Option<String>,

    /// Directory holding config.json. Defaults to ~/.aicode
    #[arg(long, env = CONFIG_DIR_ENV, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the JSON-RPC backend over stdio
    Serve,
    /// Chat with the assistant and review its edits
    Chat,
    /// List the actions found in a saved assistant reply
    Parse {
        /// File holding the reply text (or a JSON content-block list)
        file: PathBuf,

        /// Print the actions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Execute the actions found in a saved assistant reply
    Apply {
        /// File holding the reply text (or a JSON content-block list)
        file: PathBuf,

        /// Approve everything except commands flagged as dangerous
        #[arg(short = 'y', long)]
        yes: bool,
    },
}
