use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::backend::OpenAiFactory;
use crate::config::ConfigStore;
use crate::rpc::{run_stdio, ServerState};

/// Run the backend an editor (or `aicode chat`) talks to over stdio.
pub async fn run_serve(
    config_dir: Option<PathBuf>,
    workspace_root: PathBuf,
    model: Option<String>,
) -> Result<()> {
    let config = ConfigStore::new(config_dir)?;
    info!("Config file: {}", config.config_path().display());
    info!("Workspace root: {}", workspace_root.display());

    let state = ServerState::new(config, Arc::new(OpenAiFactory), workspace_root)
        .with_default_model(model);
    run_stdio(state).await
}
