// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Registry - Model Alias Resolution
//
// Builds one adapter per configured model alias and hands them out to the
// pipeline stages (generation chain, judges, advisor, predictor).

use crate::domain::llm::{GenerationOptions, GenerationResponse, LLMError, LLMProvider};
use crate::domain::pipeline_config::{LLMProviderConfig, ModelConfig, PipelineConfigManifest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

/// Registry resolving model aliases to provider instances
pub struct ProviderRegistry {
    by_alias: HashMap<String, Arc<dyn LLMProvider>>,
    provider_of: HashMap<String, String>, // alias -> provider name
}

impl ProviderRegistry {
    /// Create provider registry from pipeline configuration
    pub fn from_config(config: &PipelineConfigManifest) -> anyhow::Result<Self> {
        let mut by_alias = HashMap::new();
        let mut provider_of = HashMap::new();

        info!("Initializing LLM provider registry");

        for provider_config in &config.spec.llm_providers {
            if !provider_config.enabled {
                info!("Provider '{}' disabled, skipping", provider_config.name);
                continue;
            }

            let api_key = match Self::resolve_api_key(&provider_config.api_key) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Failed to initialize provider '{}': {}", provider_config.name, e);
                    continue;
                }
            };

            for model_config in &provider_config.models {
                match Self::create_provider(provider_config, model_config, &api_key) {
                    Ok(provider) => {
                        info!(
                            "Mapping alias '{}' -> {} ({})",
                            model_config.alias, model_config.model, provider_config.name
                        );
                        by_alias.insert(model_config.alias.clone(), provider);
                        provider_of.insert(model_config.alias.clone(), provider_config.name.clone());
                    }
                    Err(e) => {
                        warn!(
                            "Failed to initialize alias '{}' on provider '{}': {}",
                            model_config.alias, provider_config.name, e
                        );
                    }
                }
            }
        }

        if by_alias.is_empty() {
            warn!("No LLM providers configured - live pipeline stages will degrade to fallbacks");
        }

        Ok(Self { by_alias, provider_of })
    }

    /// Registry with explicit alias bindings
    pub fn from_providers(providers: impl IntoIterator<Item = (String, Arc<dyn LLMProvider>)>) -> Self {
        let mut by_alias = HashMap::new();
        let mut provider_of = HashMap::new();
        for (alias, provider) in providers {
            provider_of.insert(alias.clone(), "custom".to_string());
            by_alias.insert(alias, provider);
        }
        Self { by_alias, provider_of }
    }

    /// Create a provider instance bound to one model
    fn create_provider(
        config: &LLMProviderConfig,
        model: &ModelConfig,
        api_key: &str,
    ) -> anyhow::Result<Arc<dyn LLMProvider>> {
        let provider: Arc<dyn LLMProvider> = match config.provider_type.as_str() {
            "openai" | "openai-compatible" => Arc::new(
                OpenAIAdapter::new(config.endpoint.clone(), api_key.to_string(), model.model.clone())
                    .with_provider_label(config.name.clone()),
            ),
            "ollama" => Arc::new(OllamaAdapter::new(config.endpoint.clone(), model.model.clone())),
            _ => anyhow::bail!("Unsupported provider type: {}", config.provider_type),
        };

        Ok(provider)
    }

    /// Resolve API key from config (supports "env:VAR_NAME" syntax)
    fn resolve_api_key(key: &Option<String>) -> anyhow::Result<String> {
        match key.as_deref() {
            Some(k) => match k.strip_prefix("env:") {
                Some(var_name) => std::env::var(var_name)
                    .map_err(|_| anyhow::anyhow!("Environment variable not set: {}", var_name)),
                None => Ok(k.to_string()),
            },
            None => Ok(String::new()), // For local providers without auth
        }
    }

    /// Provider bound to `alias`
    pub fn provider(&self, alias: &str) -> Result<Arc<dyn LLMProvider>, LLMError> {
        self.by_alias
            .get(alias)
            .cloned()
            .ok_or_else(|| LLMError::ModelNotFound(format!("Model alias '{}' not found", alias)))
    }

    /// Generate text using a model alias
    pub async fn generate(
        &self,
        alias: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        self.provider(alias)?.generate(prompt, options).await
    }

    /// Check health of every alias
    pub async fn health_check_all(&self) -> HashMap<String, Result<(), LLMError>> {
        let mut results = HashMap::new();

        for (alias, provider) in &self.by_alias {
            info!("Health checking alias: {}", alias);
            results.insert(alias.clone(), provider.health_check().await);
        }

        results
    }

    /// Get list of available model aliases
    pub fn available_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.by_alias.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Check if a model alias exists
    pub fn has_alias(&self, alias: &str) -> bool {
        self.by_alias.contains_key(alias)
    }

    /// Provider name serving `alias`
    pub fn provider_name(&self, alias: &str) -> Option<&str> {
        self.provider_of.get(alias).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline_config::PipelineConfigManifest;

    fn ollama_manifest() -> PipelineConfigManifest {
        let mut manifest = PipelineConfigManifest::default();
        manifest.spec.llm_providers = vec![LLMProviderConfig {
            name: "local".to_string(),
            provider_type: "ollama".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            enabled: true,
            models: vec![
                ModelConfig {
                    alias: "primary".to_string(),
                    model: "llama3.2".to_string(),
                },
                ModelConfig {
                    alias: "judge".to_string(),
                    model: "qwen2.5".to_string(),
                },
            ],
        }];
        manifest
    }

    #[test]
    fn test_registry_creation() {
        let registry = ProviderRegistry::from_config(&ollama_manifest()).unwrap();
        assert!(registry.has_alias("primary"));
        assert_eq!(registry.available_aliases(), vec!["judge", "primary"]);
        assert_eq!(registry.provider("judge").unwrap().model(), "qwen2.5");
        assert_eq!(registry.provider_name("primary"), Some("local"));
    }

    #[test]
    fn test_missing_env_key_skips_provider() {
        let mut manifest = ollama_manifest();
        manifest.spec.llm_providers[0].provider_type = "openai-compatible".to_string();
        manifest.spec.llm_providers[0].api_key = Some("env:GATECAST_TEST_UNSET_KEY_9F2".to_string());
        let registry = ProviderRegistry::from_config(&manifest).unwrap();
        assert!(registry.available_aliases().is_empty());
    }

    #[test]
    fn test_unknown_alias_is_model_not_found() {
        let registry = ProviderRegistry::from_config(&ollama_manifest()).unwrap();
        assert!(matches!(registry.provider("nope"), Err(LLMError::ModelNotFound(_))));
    }

    #[test]
    fn test_unsupported_type_is_skipped() {
        let mut manifest = ollama_manifest();
        manifest.spec.llm_providers[0].provider_type = "carrier-pigeon".to_string();
        let registry = ProviderRegistry::from_config(&manifest).unwrap();
        assert!(!registry.has_alias("primary"));
    }
}
