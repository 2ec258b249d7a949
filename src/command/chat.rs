//! Interactive chat with edit review.
//!
//! The model runs in a `serve` subprocess; edits come back as a numbered
//! pending set that the user reviews here and applies through the local
//! executor.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

use super::console::{print_result, Console};
use crate::actions::Action;
use crate::executor::Executor;
use crate::review::{InputCommand, ReviewSession, ReviewState};
use crate::rpc::protocol::ChatParams;
use crate::rpc::{ClientOptions, RpcClient, ServerCommand, TransportError};

pub struct ChatOptions {
    pub config_dir: Option<PathBuf>,
    pub workspace_root: PathBuf,
    pub verbose: bool,
    pub client: ClientOptions,
}

pub async fn run_chat(options: ChatOptions, executor: Executor) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate the aicode binary")?;
    let root = options.workspace_root.display().to_string();
    let mut command = ServerCommand::new(exe)
        .arg("serve")
        .arg("--workspace-root")
        .arg(root)
        .current_dir(&options.workspace_root);
    if let Some(dir) = &options.config_dir {
        command = command.arg("--config-dir").arg(dir.display().to_string());
    }
    if options.verbose {
        command = command.arg("--verbose");
    }

    let mut client = RpcClient::new(command, options.client);
    let init = client
        .start()
        .await
        .context("Failed to start the aicode backend")?;

    match (&init.model, &init.error) {
        (Some(model), _) => println!("🤖 Model: {}", model),
        (None, Some(error)) => {
            println!("⚠️  {}", error);
            println!("   Fix it with '/config global.api_key \"...\"' then '/model <name>'.");
        }
        (None, None) => println!("⚠️  No model selected. Use '/model <name>' to pick one."),
    }
    println!("Type a message, '/help' for commands, '/quit' to leave.");

    let mut session = ChatSession {
        client,
        review: ReviewSession::new(executor),
        console: Console::new(),
    };
    let outcome = session.run().await;
    session.client.stop().await;
    outcome
}

struct ChatSession {
    client: RpcClient,
    review: ReviewSession,
    console: Console,
}

impl ChatSession {
    async fn run(&mut self) -> Result<()> {
        loop {
            let Some(line) = self.console.prompt("\n> ").await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let outcome = match line {
                "/quit" | "/exit" => break,
                "/help" => {
                    print_help();
                    Ok(())
                }
                _ if line.starts_with('/') => self.slash_command(line).await,
                _ => self.input(line).await,
            };

            if let Err(e) = outcome {
                if let Some(transport) = e.downcast_ref::<TransportError>() {
                    if transport.is_disconnect() {
                        println!("❌ Lost connection to the backend: {}", transport);
                        println!("   Restart 'aicode chat' to reconnect.");
                        break;
                    }
                }
                println!("❌ {:#}", e);
            }
        }
        Ok(())
    }

    async fn input(&mut self, text: &str) -> Result<()> {
        match self.review.interpret_input(text) {
            InputCommand::Review(index) => self.review_edit(index).await,
            InputCommand::OutOfRange(index) => {
                let numbers: Vec<String> =
                    self.review.pending().keys().map(|n| n.to_string()).collect();
                println!(
                    "⚠️  No pending edit numbered {}. Pending: {}",
                    index,
                    numbers.join(", ")
                );
                Ok(())
            }
            InputCommand::ApplyAll => {
                let paths: Vec<String> = self
                    .review
                    .pending()
                    .values()
                    .map(|edit| edit.file_path.clone())
                    .collect();
                let report = self.review.apply_all().await?;
                for (path, result) in paths.iter().zip(&report.results) {
                    print_result(path, result);
                }
                println!("\n{}", report.tally());
                Ok(())
            }
            InputCommand::SkipAll => {
                let dropped = self.review.skip_all()?;
                println!("⏭️  Skipped {} edit(s)", dropped);
                Ok(())
            }
            InputCommand::Chat(message) => self.chat(message).await,
        }
    }

    async fn review_edit(&mut self, index: usize) -> Result<()> {
        let view = self.review.select(index).await?;
        let (added, removed) = view.stats();
        println!("\n{}", view);
        println!("+{} -{}", added, removed);

        let answer = self
            .console
            .prompt("[a]pply, [s]kip for now, [d]iscard: ")
            .await?
            .unwrap_or_default();
        match answer.trim().to_lowercase().as_str() {
            "a" | "apply" => {
                let result = self.review.apply_current().await?;
                print_result(&format!("{} ({})", view.file_path, view.edit_type), &result);
            }
            "d" | "discard" => {
                self.review.view_others()?;
                println!("🗑️  Discarded {}", view.file_path);
            }
            _ => self.review.skip_current()?,
        }

        if self.review.state() != ReviewState::Idle {
            println!("{}", self.review.summary());
        }
        Ok(())
    }

    async fn chat(&mut self, message: String) -> Result<()> {
        let params = ChatParams {
            message,
            ..ChatParams::default()
        };
        let result = self.client.chat(&params).await?;
        if !result.success {
            println!("❌ {}", result.error.unwrap_or_else(|| "Chat failed".to_string()));
            return Ok(());
        }

        if let Some(response) = &result.response {
            println!("\n{}", response);
        }
        if let Some(tokens) = result.tokens {
            debug!("Turn used {} tokens", tokens);
        }

        for action in result.actions.iter().flatten() {
            if matches!(action, Action::CodeEdit(_)) {
                continue;
            }
            self.run_action(action).await?;
        }

        if let Some(edits) = result.edits {
            info!("Received {} edit(s)", edits.len());
            self.review.present(edits);
            println!("{}", self.review.summary());
        }
        Ok(())
    }

    /// Run a command, read or write outside the review flow, asking first
    /// where the action requires it.
    async fn run_action(&mut self, action: &Action) -> Result<()> {
        let approved = match action {
            Action::BashCommand(command) if command.requires_confirmation() => {
                self.console.confirm_command(command).await?
            }
            _ if action.requires_confirmation() => {
                self.console
                    .confirm(&format!("Allow {}?", action.label()))
                    .await?
            }
            _ => true,
        };
        if !approved {
            println!("⏭️  Skipped {}", action.label());
            return Ok(());
        }
        let result = self.review.executor().execute(action).await;
        print_result(&action.label(), &result);
        Ok(())
    }

    async fn slash_command(&mut self, line: &str) -> Result<()> {
        let mut parts = line.splitn(3, char::is_whitespace);
        let command = parts.next().unwrap_or_default();
        let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match (command, first) {
            ("/models", _) => {
                let result = self.client.get_models().await?;
                for model in result.models {
                    println!("  {:<20} {}", model.name, model.provider);
                }
            }
            ("/model", Some(name)) => {
                let result = self.client.set_model(name).await?;
                match result.error {
                    None => println!("🤖 Model: {}", result.model.unwrap_or_default()),
                    Some(error) => println!("❌ {}", error),
                }
            }
            ("/clear", _) => {
                self.client.clear_history().await?;
                println!("History cleared.");
            }
            ("/history", _) => {
                let history = self.client.get_history().await?;
                for message in history.messages {
                    println!("[{}] {}", message.role, message.content);
                }
            }
            ("/config", Some(key)) => match rest {
                Some(raw) => {
                    // Bare words are stored as strings.
                    let value = serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string()));
                    let ack = self.client.set_config(key, value).await?;
                    match ack.error {
                        None => println!("Saved {}", key),
                        Some(error) => println!("❌ {}", error),
                    }
                }
                None => {
                    let result = self.client.get_config(Some(key)).await?;
                    println!("{} = {}", key, result.value.unwrap_or(Value::Null));
                }
            },
            _ => print_help(),
        }
        Ok(())
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /models               List available models");
    println!("  /model <name>         Switch model (starts a new session)");
    println!("  /config <key> [value] Show or set a config value");
    println!("  /history              Show this session's messages");
    println!("  /clear                Clear this session's messages");
    println!("  /quit                 Leave");
    println!("With edits pending: a number opens that edit, 'all' applies all, 'skip' drops all.");
}
