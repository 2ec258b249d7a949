use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::console::{print_result, Console};
use crate::actions::Action;
use crate::executor::{BatchReport, Executor};
use crate::parser::{AssistantOutput, HybridParser, ParserOptions};

/// Execute every action in a saved reply, asking first where required.
pub async fn run_apply(
    file: &Path,
    executor: Executor,
    options: ParserOptions,
    yes: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let actions = HybridParser::new(options).parse(&AssistantOutput::detect(&raw));
    if actions.is_empty() {
        println!("No actions found.");
        return Ok(());
    }
    println!(
        "Applying {} action(s) in {} (command timeout {}s)",
        actions.len(),
        executor.working_dir().display(),
        executor.command_timeout().as_secs()
    );

    let mut console = Console::new();
    let mut report = BatchReport::default();
    for action in &actions {
        let approved = match action {
            Action::BashCommand(command) if command.is_dangerous() => {
                console.confirm_command(command).await?
            }
            _ if !action.requires_confirmation() || yes => true,
            Action::BashCommand(command) => console.confirm_command(command).await?,
            _ => console.confirm(&format!("Apply {}?", action.label())).await?,
        };
        if !approved {
            println!("⏭️  Skipped {}", action.label());
            continue;
        }
        let result = executor.execute(action).await;
        print_result(&action.label(), &result);
        report.push(result);
    }

    info!("Apply finished: {}", report.tally());
    println!("\n{}", report.tally());
    Ok(())
}
