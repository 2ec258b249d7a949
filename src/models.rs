//! Model registry.
//!
//! A fixed seed list of common chat models, extended (or overridden by name)
//! with entries from the `models` list in the config file. Lookup is
//! case-insensitive on the model name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::rpc::protocol::ModelSummary;

/// One model the backend can talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub code_score: Option<f64>,
    #[serde(default = "default_max_tokens")]
    pub max_input_tokens: u64,
    #[serde(default = "default_max_tokens")]
    pub max_output_tokens: u64,
    #[serde(default)]
    pub api_url: Option<String>,
    /// Per-model key; the global key wins when both are set.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_max_tokens() -> u64 {
    4096
}

impl ModelInfo {
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            provider: self.provider.clone(),
            code_score: self.code_score,
            max_input_tokens: self.max_input_tokens,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Seed entries: (name, provider, max input, max output, code score, endpoint).
const SEEDS: &[(&str, &str, u64, u64, f64, &str)] = &[
    ("gpt-4", "openai", 8192, 4096, 9.0, "https://api.openai.com/v1"),
    ("gpt-4-turbo", "openai", 128000, 4096, 9.2, "https://api.openai.com/v1"),
    ("gpt-3.5-turbo", "openai", 16385, 4096, 7.5, "https://api.openai.com/v1"),
    ("claude-3-opus", "anthropic", 200000, 4096, 9.5, "https://api.anthropic.com/v1"),
    ("claude-3-sonnet", "anthropic", 200000, 4096, 9.0, "https://api.anthropic.com/v1"),
    ("claude-3-haiku", "anthropic", 200000, 4096, 8.0, "https://api.anthropic.com/v1"),
    ("deepseek-chat", "deepseek", 32768, 4096, 8.5, "https://api.deepseek.com/v1"),
    ("deepseek-coder", "deepseek", 32768, 4096, 9.0, "https://api.deepseek.com/v1"),
    ("qwen-max", "qwen", 8192, 2048, 8.0, "https://dashscope.aliyuncs.com/api/v1"),
    ("qwen-plus", "qwen", 32768, 2048, 7.5, "https://dashscope.aliyuncs.com/api/v1"),
    ("gemini-pro", "google", 32768, 2048, 8.0, "https://generativelanguage.googleapis.com/v1"),
    ("glm-4", "zhipu", 128000, 4096, 7.5, "https://open.bigmodel.cn/api/paas/v4"),
    ("mistral-large", "mistral", 32768, 8192, 8.5, "https://api.mistral.ai/v1"),
];

/// Result of looking up user input in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResolution {
    Resolved(ModelInfo),
    /// Input was empty or `default`.
    UseDefault,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    /// Registry holding only the built-in seeds.
    pub fn seeded() -> Self {
        let models = SEEDS
            .iter()
            .map(|(name, provider, input, output, score, url)| ModelInfo {
                name: name.to_string(),
                provider: provider.to_string(),
                code_score: Some(*score),
                max_input_tokens: *input,
                max_output_tokens: *output,
                api_url: Some(url.to_string()),
                api_key: None,
            })
            .collect();
        Self { models }
    }

    /// Seeds plus the config file's `models` list. Config entries with the
    /// name of a seed replace it.
    pub fn with_config(models: Option<&Value>) -> Self {
        let mut registry = Self::seeded();
        let Some(value) = models else {
            return registry;
        };
        let Some(entries) = value.as_array() else {
            warn!("models config is not a list, ignoring it");
            return registry;
        };
        for entry in entries {
            match serde_json::from_value::<ModelInfo>(entry.clone()) {
                Ok(model) => registry.insert(model),
                Err(e) => warn!("Skipping invalid model entry: {}", e),
            }
        }
        registry
    }

    pub fn insert(&mut self, model: ModelInfo) {
        match self
            .models
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(&model.name))
        {
            Some(existing) => *existing = model,
            None => self.models.push(model),
        }
    }

    pub fn list(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn get(&self, name: &str) -> Option<&ModelInfo> {
        let name = name.trim();
        self.models
            .iter()
            .find(|model| model.name.eq_ignore_ascii_case(name))
    }

    pub fn resolve(&self, input: &str) -> ModelResolution {
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("default") {
            return ModelResolution::UseDefault;
        }
        match self.get(input) {
            Some(model) => ModelResolution::Resolved(model.clone()),
            None => ModelResolution::NotFound,
        }
    }

    /// Resolve user input, falling back to `default_model` when the input
    /// is absent, `default`, or unknown.
    pub fn resolve_with_fallback(
        &self,
        user_input: Option<&str>,
        default_model: Option<&str>,
    ) -> Option<ModelInfo> {
        let fallback = || default_model.and_then(|name| self.get(name)).cloned();
        match user_input.map(|input| self.resolve(input)) {
            Some(ModelResolution::Resolved(model)) => {
                debug!("Resolved model '{}'", model.name);
                Some(model)
            }
            Some(ModelResolution::NotFound) => {
                warn!(
                    "Unknown model: \"{}\", falling back to default.",
                    user_input.unwrap_or_default()
                );
                fallback()
            }
            Some(ModelResolution::UseDefault) | None => fallback(),
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::seeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeded_models() {
        let registry = ModelRegistry::seeded();
        let gpt4 = registry.get("gpt-4").unwrap();
        assert_eq!(gpt4.provider, "openai");
        assert_eq!(gpt4.max_input_tokens, 8192);
        assert_eq!(gpt4.api_url.as_deref(), Some("https://api.openai.com/v1"));
        assert!(registry.list().len() >= 10);
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let registry = ModelRegistry::seeded();
        match registry.resolve(" DeepSeek-Coder ") {
            ModelResolution::Resolved(model) => assert_eq!(model.name, "deepseek-coder"),
            other => panic!("Expected Resolved, got {:?}", other),
        }
        assert_eq!(registry.resolve("default"), ModelResolution::UseDefault);
        assert_eq!(registry.resolve("gpt-7"), ModelResolution::NotFound);
    }

    #[test]
    fn test_config_models_extend_and_override() {
        let config = json!([
            {"name": "local-llama", "provider": "ollama", "api_url": "http://localhost:11434/v1"},
            {"name": "gpt-4", "provider": "azure", "max_input_tokens": 32768},
            {"provider": "missing-name"}
        ]);
        let registry = ModelRegistry::with_config(Some(&config));

        let local = registry.get("local-llama").unwrap();
        assert_eq!(local.max_output_tokens, 4096);
        assert_eq!(registry.get("gpt-4").unwrap().provider, "azure");
        assert_eq!(
            registry.list().len(),
            ModelRegistry::seeded().list().len() + 1
        );
    }

    #[test]
    fn test_resolve_with_fallback() {
        let registry = ModelRegistry::seeded();
        assert_eq!(
            registry
                .resolve_with_fallback(Some("gpt-7"), Some("gpt-4"))
                .map(|m| m.name),
            Some("gpt-4".to_string())
        );
        assert_eq!(
            registry
                .resolve_with_fallback(Some("qwen-max"), Some("gpt-4"))
                .map(|m| m.name),
            Some("qwen-max".to_string())
        );
        assert_eq!(registry.resolve_with_fallback(None, None), None);
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut model = ModelInfo {
            name: "m".to_string(),
            provider: "p".to_string(),
            code_score: None,
            max_input_tokens: 1,
            max_output_tokens: 1,
            api_url: None,
            api_key: Some("secret".to_string()),
        };
        let value = serde_json::to_value(&model).unwrap();
        assert!(value.get("api_key").is_none());
        model.api_key = None;
        assert_eq!(serde_json::from_value::<ModelInfo>(value).unwrap(), model);
    }
}
