//! Persistent configuration.
//!
//! Settings live in `~/.aicode/config.json` (or a custom directory). The
//! file is a free-form JSON object addressed with dotted keys such as
//! `global.api_key`; [`Settings`] is the typed view the rest of the crate
//! reads, with environment variables taking priority over the file.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::executor::DEFAULT_COMMAND_TIMEOUT;
use crate::rpc::DEFAULT_REQUEST_TIMEOUT;

pub const CONFIG_DIR_ENV: &str = "AICODE_CONFIG_DIR";
pub const API_KEY_ENV: &str = "AICODE_API_KEY";
pub const API_URL_ENV: &str = "AICODE_API_URL";

const CONFIG_FILE: &str = "config.json";
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Typed view of the `global` section.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub default_model: Option<String>,
    pub api_key: Option<String>,
    /// Overrides the model's own endpoint when set.
    pub api_url: Option<String>,
    pub temperature: f64,
    pub auto_run_safe_commands: bool,
    /// Advertise the action tools to the model API.
    pub native_tools: bool,
    pub command_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: None,
            api_key: None,
            api_url: None,
            temperature: DEFAULT_TEMPERATURE,
            auto_run_safe_commands: false,
            native_tools: false,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Settings {
    /// Build settings from a config document and an environment lookup.
    ///
    /// Priority: `AICODE_API_KEY` / `AICODE_API_URL`, then the file.
    pub fn resolve(config: &Value, env: impl Fn(&str) -> Option<String>) -> Self {
        let global = config.get("global");
        let text = |key: &str| {
            global
                .and_then(|g| g.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let secs = |key: &str| {
            global
                .and_then(|g| g.get(key))
                .and_then(Value::as_u64)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
        };
        let flag = |key: &str| {
            global
                .and_then(|g| g.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        let from_env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let defaults = Settings::default();
        Settings {
            default_model: text("default_model"),
            api_key: from_env(API_KEY_ENV).or_else(|| text("api_key")),
            api_url: from_env(API_URL_ENV).or_else(|| text("api_url")),
            temperature: global
                .and_then(|g| g.get("temperature"))
                .and_then(Value::as_f64)
                .unwrap_or(defaults.temperature),
            auto_run_safe_commands: flag("auto_run_safe_commands"),
            native_tools: flag("native_tools"),
            command_timeout: secs("command_timeout_secs").unwrap_or(defaults.command_timeout),
            request_timeout: secs("request_timeout_secs").unwrap_or(defaults.request_timeout),
        }
    }
}

/// JSON-backed configuration store.
pub struct ConfigStore {
    config_path: PathBuf,
    config: Value,
}

impl ConfigStore {
    /// Open the store, creating its directory if needed.
    ///
    /// Directory priority: `config_dir`, then `AICODE_CONFIG_DIR`, then
    /// `~/.aicode`. A missing file is an empty config.
    pub fn new(config_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = match config_dir.or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from)) {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".aicode"),
        };

        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", base_dir))?;

        let config_path = base_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("Invalid config file format: {:?}", config_path))?;
            if !value.is_object() {
                bail!("Config file must contain a JSON object: {:?}", config_path);
            }
            info!("Loaded config from {:?}", config_path);
            value
        } else {
            debug!("No config file at {:?}, starting empty", config_path);
            Value::Object(Map::new())
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Whole config document.
    pub fn all(&self) -> &Value {
        &self.config
    }

    /// Look up a dotted key. JSON `null` counts as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut value = &self.config;
        for part in key.split('.') {
            value = value.as_object()?.get(part)?;
        }
        (!value.is_null()).then_some(value)
    }

    /// Set a dotted key, creating intermediate objects as needed.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|part| part.trim().is_empty()) {
            bail!("Invalid config key: {:?}", key);
        }

        let (last, parents) = match parts.split_last() {
            Some(split) => split,
            None => bail!("Invalid config key: {:?}", key),
        };

        let mut node = &mut self.config;
        for part in parents {
            node = ensure_object(node)
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        ensure_object(node).insert(last.to_string(), value);

        debug!("Set config: {}", key);
        Ok(())
    }

    /// Write the config back to disk.
    /// Set a dotted key and write the file. A failed write restores the
    /// previous document.
    pub fn update(&mut self, key: &str, value: Value) -> Result<()> {
        let previous = self.config.clone();
        self.set(key, value)?;
        if let Err(e) = self.save() {
            self.config = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.config)
            .context("Failed to serialize config")?;
        std::fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", self.config_path))?;
        info!("Saved config to {:?}", self.config_path);
        Ok(())
    }

    /// Typed settings, with environment overrides applied.
    pub fn settings(&self) -> Settings {
        Settings::resolve(&self.config, |name| std::env::var(name).ok())
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}
