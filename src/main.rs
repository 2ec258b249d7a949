use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod actions;
mod backend;
mod cli;
mod command;
mod config;
mod executor;
mod models;
mod parser;
mod review;
mod rpc;

use cli::{Cli, Commands};
use config::ConfigStore;
use executor::Executor;
use parser::ParserOptions;
use rpc::ClientOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose. Logs always go to stderr so stdout stays
    // clean for the protocol in serve mode.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(subcommand) = cli.command else {
        eprintln!("No command specified. Use --help for usage information.");
        eprintln!("Use 'aicode chat' to start chatting or 'aicode serve' to run the editor backend.");
        return Ok(());
    };

    let workspace_root = cli::resolve_workspace_root(cli.workspace_root)?;

    match subcommand {
        Commands::Serve => command::run_serve(cli.config_dir, workspace_root, cli.model).await,
        Commands::Parse { file, json } => {
            let settings = ConfigStore::new(cli.config_dir)?.settings();
            let options = ParserOptions {
                auto_run_safe_commands: settings.auto_run_safe_commands,
            };
            command::run_parse(&file, json, options).await
        }
        Commands::Apply { file, yes } => {
            let settings = ConfigStore::new(cli.config_dir)?.settings();
            let options = ParserOptions {
                auto_run_safe_commands: settings.auto_run_safe_commands,
            };
            let executor = Executor::new(workspace_root).with_timeout(settings.command_timeout);
            command::run_apply(&file, executor, options, yes).await
        }
        Commands::Chat => {
            let settings = ConfigStore::new(cli.config_dir.clone())?.settings();
            let executor =
                Executor::new(workspace_root.clone()).with_timeout(settings.command_timeout);
            let options = command::ChatOptions {
                config_dir: cli.config_dir,
                workspace_root,
                verbose: cli.verbose,
                client: ClientOptions {
                    request_timeout: settings.request_timeout,
                    chat_timeout: backend::turn_deadline(settings.request_timeout),
                    model: cli.model,
                },
            };
            command::run_chat(options, executor).await
        }
    }
}
