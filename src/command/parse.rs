use anyhow::{Context, Result};
use std::path::Path;

use crate::parser::{AssistantOutput, HybridParser, ParserOptions};

pub async fn run_parse(file: &Path, json: bool, options: ParserOptions) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let actions = HybridParser::new(options).parse(&AssistantOutput::detect(&raw));

    if json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("No actions found.");
        return Ok(());
    }
    println!("Found {} action(s):\n", actions.len());
    for (i, action) in actions.iter().enumerate() {
        let gate = if action.requires_confirmation() {
            "needs confirmation"
        } else {
            "auto"
        };
        println!("{}. {} [{}]", i + 1, action.label(), gate);
        if !action.description().is_empty() {
            println!("   └─ {}", action.description());
        }
    }
    Ok(())
}
