// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Pipeline Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - LLM providers and the model aliases each one serves
// - Generation gateway chain, timeouts and output bounds
// - Judge, advisor and predictor model aliases
// - Persistence backend and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::generation::GenerationMode;
use crate::domain::learning::HISTORY_WINDOW;

pub const API_VERSION: &str = "gatecast/v1";
pub const KIND: &str = "PipelineConfig";

/// Upper bound on advisor rate-limit retries.
pub const MAX_ADVISOR_RETRIES: u32 = 8;

/// Top-level pipeline configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfigManifest {
    /// API version (must be "gatecast/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "PipelineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: PipelineConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable deployment name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Real model calls through the provider registry
    Live,
    /// Deterministic offline collaborators
    Mock,
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(StrategyKind::Live),
            "mock" => Ok(StrategyKind::Mock),
            other => Err(format!("unknown strategy '{}', expected live or mock", other)),
        }
    }
}

/// Configuration content under spec:
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfigSpec {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub llm_providers: Vec<LLMProviderConfig>,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub meta_learning: MetaLearningConfig,

    #[serde(default)]
    pub prediction: PredictionConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMProviderConfig {
    /// Unique provider name (e.g., "hf-router", "ollama-local")
    pub name: String,

    /// Provider type: "openai", "openai-compatible" or "ollama"
    #[serde(rename = "type")]
    pub provider_type: String,

    /// API endpoint URL
    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Alias referenced by pipeline stages (e.g., "primary", "judge")
    pub alias: String,

    /// Actual model identifier for the provider API
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_primary_alias")]
    pub primary_model: String,

    #[serde(default = "default_fallback_alias")]
    pub fallback_model: String,

    /// Per-attempt timeout
    #[serde(default = "default_generation_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_mode")]
    pub initial_mode: GenerationMode,

    #[serde(default = "default_mode")]
    pub regeneration_mode: GenerationMode,

    /// Cleaned output shorter than this counts as a failed attempt
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Cleaned output is truncated to this length
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_judge_alias")]
    pub judge_model: String,

    #[serde(default = "default_llm_timeout")]
    pub judge_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaLearningConfig {
    #[serde(default = "default_advisor_alias")]
    pub advisor_model: String,

    /// Number of past runs handed to the advisor
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Retry attempts on rate limiting
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay, doubled per attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_predictor_alias")]
    pub predictor_model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_backend")]
    pub backend: PersistenceBackend,

    /// Sled database directory
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus listener port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Live
}

fn default_primary_alias() -> String {
    "primary".to_string()
}

fn default_fallback_alias() -> String {
    "fallback".to_string()
}

fn default_judge_alias() -> String {
    "judge".to_string()
}

fn default_advisor_alias() -> String {
    "advisor".to_string()
}

fn default_predictor_alias() -> String {
    "predictor".to_string()
}

fn default_generation_timeout() -> u64 {
    25_000
}

fn default_llm_timeout() -> u64 {
    30_000
}

fn default_mode() -> GenerationMode {
    GenerationMode::Optimized
}

fn default_min_chars() -> usize {
    30
}

fn default_max_chars() -> usize {
    500
}

fn default_generation_max_tokens() -> u32 {
    300
}

fn default_history_window() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_backend() -> PersistenceBackend {
    PersistenceBackend::Sled
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".gatecast").join("store"))
        .unwrap_or_else(|| PathBuf::from("./.gatecast/store"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary_model: default_primary_alias(),
            fallback_model: default_fallback_alias(),
            timeout_ms: default_generation_timeout(),
            initial_mode: default_mode(),
            regeneration_mode: default_mode(),
            min_chars: default_min_chars(),
            max_chars: default_max_chars(),
            max_tokens: default_generation_max_tokens(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            judge_model: default_judge_alias(),
            judge_timeout_ms: default_llm_timeout(),
        }
    }
}

impl Default for MetaLearningConfig {
    fn default() -> Self {
        Self {
            advisor_model: default_advisor_alias(),
            history_window: default_history_window(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            timeout_ms: default_llm_timeout(),
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            predictor_model: default_predictor_alias(),
            timeout_ms: default_llm_timeout(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for PipelineConfigSpec {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            llm_providers: vec![
                LLMProviderConfig {
                    name: "hf-router".to_string(),
                    provider_type: "openai-compatible".to_string(),
                    endpoint: "https://router.huggingface.co/v1".to_string(),
                    api_key: Some("env:HF_TOKEN".to_string()),
                    enabled: true,
                    models: vec![
                        ModelConfig {
                            alias: "primary".to_string(),
                            model: "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
                        },
                        ModelConfig {
                            alias: "fallback".to_string(),
                            model: "meta-llama/Llama-3.2-3B-Instruct".to_string(),
                        },
                    ],
                },
                LLMProviderConfig {
                    name: "gemini".to_string(),
                    provider_type: "openai-compatible".to_string(),
                    endpoint: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                    api_key: Some("env:GEMINI_API_KEY".to_string()),
                    enabled: true,
                    models: ["judge", "advisor", "predictor"]
                        .into_iter()
                        .map(|alias| ModelConfig {
                            alias: alias.to_string(),
                            model: "gemini-2.0-flash".to_string(),
                        })
                        .collect(),
                },
            ],
            generation: GenerationConfig::default(),
            consensus: ConsensusConfig::default(),
            meta_learning: MetaLearningConfig::default(),
            prediction: PredictionConfig::default(),
            persistence: PersistenceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for PipelineConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "gatecast".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: PipelineConfigSpec::default(),
        }
    }
}

impl PipelineConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. GATECAST_CONFIG_PATH environment variable
    /// 2. ./gatecast.yaml (working directory)
    /// 3. ~/.gatecast/config.yaml (user home)
    /// 4. /etc/gatecast/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("GATECAST_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./gatecast.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".gatecast").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/gatecast/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GATECAST_STRATEGY") {
            match val.parse::<StrategyKind>() {
                Ok(strategy) => {
                    tracing::info!("Environment override: GATECAST_STRATEGY={}", val);
                    self.spec.strategy = strategy;
                }
                Err(e) => tracing::warn!("Ignoring GATECAST_STRATEGY: {}", e),
            }
        }

        if let Ok(val) = std::env::var("GATECAST_STORE_PATH") {
            tracing::info!("Environment override: GATECAST_STORE_PATH={}", val);
            self.spec.persistence.path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("GATECAST_GENERATION_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Environment override: GATECAST_GENERATION_TIMEOUT_MS={}", ms);
                    self.spec.generation.timeout_ms = ms;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for GATECAST_GENERATION_TIMEOUT_MS: '{}'. Expected milliseconds. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Every model alias a live pipeline resolves.
    pub fn referenced_aliases(&self) -> Vec<&str> {
        let spec = &self.spec;
        let mut aliases = vec![
            spec.generation.primary_model.as_str(),
            spec.generation.fallback_model.as_str(),
            spec.consensus.judge_model.as_str(),
            spec.meta_learning.advisor_model.as_str(),
        ];
        if spec.prediction.enabled {
            aliases.push(spec.prediction.predictor_model.as_str());
        }
        aliases
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        for provider in &self.spec.llm_providers {
            if provider.name.is_empty() {
                anyhow::bail!("LLM provider name cannot be empty");
            }

            if provider.endpoint.is_empty() {
                anyhow::bail!("LLM provider endpoint cannot be empty for: {}", provider.name);
            }

            if provider.models.is_empty() {
                anyhow::bail!("LLM provider must have at least one model: {}", provider.name);
            }

            for model in &provider.models {
                if model.alias.is_empty() {
                    anyhow::bail!("Model alias cannot be empty in provider: {}", provider.name);
                }

                if model.model.is_empty() {
                    anyhow::bail!("Model identifier cannot be empty for alias: {}", model.alias);
                }
            }
        }

        let generation = &self.spec.generation;
        if generation.timeout_ms == 0 {
            anyhow::bail!("spec.generation.timeout_ms must be greater than zero");
        }
        if generation.min_chars > generation.max_chars {
            anyhow::bail!(
                "spec.generation.min_chars ({}) exceeds max_chars ({})",
                generation.min_chars,
                generation.max_chars
            );
        }

        let window = self.spec.meta_learning.history_window;
        if window == 0 || window > HISTORY_WINDOW {
            anyhow::bail!(
                "spec.meta_learning.history_window must be between 1 and {}",
                HISTORY_WINDOW
            );
        }
        if self.spec.meta_learning.max_retries > MAX_ADVISOR_RETRIES {
            anyhow::bail!(
                "spec.meta_learning.max_retries must be at most {}",
                MAX_ADVISOR_RETRIES
            );
        }

        if self.spec.strategy == StrategyKind::Live {
            for alias in self.referenced_aliases() {
                let served = self
                    .spec
                    .llm_providers
                    .iter()
                    .filter(|p| p.enabled)
                    .any(|p| p.models.iter().any(|m| m.alias == alias));
                if !served {
                    anyhow::bail!("Model alias '{}' is not served by any enabled provider", alias);
                }
            }
        }

        Ok(())
    }
}
