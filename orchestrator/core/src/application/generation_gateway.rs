// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Generation Gateway
//!
//! Produces a script for every request. The primary writer model is tried
//! first, then the fallback, each under its own timeout; if both fail the
//! deterministic emergency template is returned. Every failed attempt is
//! recorded in the result's failure chain.
//!
//! Raw model output is cleaned before use: leading labels and instruction
//! markers are stripped, only the first paragraph is kept, and the text is
//! capped at `max_chars`. Output shorter than `min_chars` after cleaning
//! counts as a failed attempt.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::generation::{
    build_prompt, emergency_script, estimate_tokens, prompt_hash, FailureChainEntry, GenerationMode,
    GenerationResult, ScriptGenerator, EMERGENCY_TEMPLATE_MODEL,
};
use crate::domain::llm::{GenerationOptions, LLMError, LLMProvider};
use crate::domain::pipeline_config::GenerationConfig;
use crate::domain::primitives::Primitives;
use crate::infrastructure::llm::ProviderRegistry;

static SEGMENT_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Segment:\s*").expect("valid regex"));
static HERES_PREAMBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^Here'?s\s+(?:[^\s:]+\s+){0,4}[^\s:]*:\s*").expect("valid regex"));
static BRACKET_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[.*?\]\s*").expect("valid regex"));
static EOS_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^</s>\s*").expect("valid regex"));

/// Strip labels and instruction markers, keep the first paragraph and cap
/// the length at `max_chars` characters.
pub fn clean_script(raw: &str, max_chars: usize) -> String {
    let mut text = raw.trim().to_string();
    for pattern in [&*SEGMENT_LABEL, &*HERES_PREAMBLE, &*BRACKET_TAG, &*EOS_MARKER] {
        text = pattern.replace(&text, "").into_owned();
    }
    let text = text.replace("[/INST]", "").replace("[INST]", "");
    let first = text.trim().split("\n\n").next().unwrap_or_default().trim();

    match first.char_indices().nth(max_chars) {
        Some((idx, _)) => first[..idx].trim_end().to_string(),
        None => first.to_string(),
    }
}

/// Llama-family instruct models expect the `[INST]` wrapper.
pub fn wrap_for_model(prompt: &str, model: &str) -> String {
    if model.to_lowercase().contains("llama") {
        format!("<s>[INST] {} [/INST]", prompt)
    } else {
        prompt.to_string()
    }
}

struct WriterSlot {
    alias: String,
    provider: Option<Arc<dyn LLMProvider>>,
}

impl WriterSlot {
    fn model_name(&self) -> String {
        self.provider
            .as_ref()
            .map(|p| p.model().to_string())
            .unwrap_or_else(|| self.alias.clone())
    }
}

pub struct GenerationGateway {
    primary: WriterSlot,
    fallback: WriterSlot,
    config: GenerationConfig,
    shutdown_token: CancellationToken,
}

impl GenerationGateway {
    /// Resolve the configured writer aliases. An alias the registry cannot
    /// serve becomes an always-failing attempt rather than an error.
    pub fn from_registry(registry: &ProviderRegistry, config: GenerationConfig) -> Self {
        let slot = |alias: &str| WriterSlot {
            alias: alias.to_string(),
            provider: registry.provider(alias).ok(),
        };
        Self {
            primary: slot(&config.primary_model),
            fallback: slot(&config.fallback_model),
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_providers(
        primary: Arc<dyn LLMProvider>,
        fallback: Arc<dyn LLMProvider>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            primary: WriterSlot {
                alias: config.primary_model.clone(),
                provider: Some(primary),
            },
            fallback: WriterSlot {
                alias: config.fallback_model.clone(),
                provider: Some(fallback),
            },
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancelling the token aborts in-flight attempts; the gateway then
    /// answers with the emergency template.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    async fn attempt(
        &self,
        slot: &WriterSlot,
        prompt: &str,
        mode: GenerationMode,
    ) -> Result<(String, Option<u16>), FailureChainEntry> {
        let model = slot.model_name();
        let failure = |status_code: Option<u16>, error_message: String| FailureChainEntry {
            model: model.clone(),
            status_code,
            error_message,
        };

        let Some(provider) = &slot.provider else {
            return Err(failure(None, format!("model alias '{}' is not available", slot.alias)));
        };

        let options = GenerationOptions {
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(mode.temperature()),
            ..Default::default()
        };
        let wrapped = wrap_for_model(prompt, provider.model());
        let attempt_token = self.shutdown_token.child_token();

        let outcome = tokio::select! {
            res = provider.generate(&wrapped, &options) => res,
            _ = tokio::time::sleep(Duration::from_millis(self.config.timeout_ms)) => {
                attempt_token.cancel();
                Err(LLMError::Timeout(self.config.timeout_ms))
            }
            _ = attempt_token.cancelled() => Err(LLMError::Provider("generation cancelled".to_string())),
        };

        let response = outcome.map_err(|e| failure(e.status_code(), e.to_string()))?;
        let text = clean_script(&response.text, self.config.max_chars);
        let chars = text.chars().count();
        if chars < self.config.min_chars {
            return Err(failure(
                response.status_code,
                format!("Generated text too short ({} chars)", chars),
            ));
        }
        Ok((text, response.status_code))
    }
}

#[async_trait]
impl ScriptGenerator for GenerationGateway {
    async fn generate(&self, topic: &str, weights: &Primitives, mode: GenerationMode) -> GenerationResult {
        let started = Instant::now();
        let prompt = build_prompt(topic, weights, mode);
        let model_requested = self.primary.model_name();
        let mut failure_chain = Vec::new();

        for (idx, slot) in [&self.primary, &self.fallback].into_iter().enumerate() {
            let model = slot.model_name();
            match self.attempt(slot, &prompt, mode).await {
                Ok((text, status_code)) => {
                    metrics::counter!("gatecast_generation_attempts_total", "model" => model.clone(), "outcome" => "success")
                        .increment(1);
                    info!(model = %model, used_fallback = idx > 0, chars = text.chars().count(), "Script generated");
                    return GenerationResult {
                        tokens_out_est: estimate_tokens(&text),
                        text,
                        model_requested,
                        model_used: model,
                        used_fallback: idx > 0,
                        failure_chain,
                        latency_ms: started.elapsed().as_millis() as u64,
                        status_code,
                        prompt_hash: prompt_hash(&prompt),
                        prompt_chars: prompt.chars().count(),
                    };
                }
                Err(entry) => {
                    metrics::counter!("gatecast_generation_attempts_total", "model" => model.clone(), "outcome" => "failure")
                        .increment(1);
                    warn!(model = %model, error = %entry.error_message, "Writer attempt failed");
                    failure_chain.push(entry);
                }
            }
        }

        warn!(attempts = failure_chain.len(), "All writer models failed, using emergency template");
        metrics::counter!("gatecast_generation_attempts_total", "model" => EMERGENCY_TEMPLATE_MODEL, "outcome" => "emergency")
            .increment(1);
        let text = emergency_script(topic, mode);
        debug!(chars = text.chars().count(), "Emergency script ready");
        GenerationResult {
            tokens_out_est: estimate_tokens(&text),
            text,
            model_requested,
            model_used: EMERGENCY_TEMPLATE_MODEL.to_string(),
            used_fallback: true,
            failure_chain,
            latency_ms: started.elapsed().as_millis() as u64,
            status_code: None,
            prompt_hash: prompt_hash(topic),
            prompt_chars: topic.chars().count(),
        }
    }
}
