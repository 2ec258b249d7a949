use anyhow::{Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::actions::BashCommand;
use crate::executor::ExecutionResult;

/// Line-based terminal input shared by the interactive commands.
pub struct Console {
    lines: Lines<BufReader<Stdin>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `prompt` and read one line. `None` at end of input.
    pub async fn prompt(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        self.lines.next_line().await.context("Failed to read input")
    }

    /// Ask a yes/no question, defaulting to no.
    pub async fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.prompt(&format!("{} [y/N]: ", question)).await?;
        Ok(matches!(
            answer.map(|a| a.trim().to_lowercase()).as_deref(),
            Some("y") | Some("yes")
        ))
    }

    /// Ask before running a shell command. Dangerous commands need the full
    /// word `yes`.
    pub async fn confirm_command(&mut self, command: &BashCommand) -> Result<bool> {
        println!("\n$ {}", command.command());
        if !command.description().is_empty() {
            println!("  {}", command.description());
        }
        if !command.is_dangerous() {
            return self.confirm("Run this command?").await;
        }
        println!("⚠️  This command matches a dangerous pattern and may destroy data.");
        let answer = self.prompt("Type 'yes' to run it anyway: ").await?;
        Ok(answer.map(|a| a.trim().eq_ignore_ascii_case("yes")).unwrap_or(false))
    }
}

/// Print one execution result.
pub fn print_result(label: &str, result: &ExecutionResult) {
    if result.success {
        println!("✅ {}", label);
    } else {
        println!("❌ {}", label);
    }
    let output = result.output.trim_end();
    if !output.is_empty() {
        println!("{}", output);
    }
    if let Some(error) = &result.error {
        println!("   {}", error);
    }
}
