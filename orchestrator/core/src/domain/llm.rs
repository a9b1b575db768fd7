// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Llm
//!
//! Domain interface for text-generation providers.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Anti-corruption layer between pipeline stages and vendor APIs

// Generation, judging, meta-learning and prediction all talk to models
// through `LLMProvider`. Adapters live in infrastructure/llm/.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Domain interface for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion from the LLM
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError>;

    /// Model identifier this provider instance is bound to
    fn model(&self) -> &str;

    /// Check if provider is healthy and accessible
    async fn health_check(&self) -> Result<(), LLMError>;
}

/// Options for LLM generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,

    /// Sequences that stop generation
    pub stop_sequences: Option<Vec<String>>,

    /// Optional system instruction sent ahead of the prompt
    pub system: Option<String>,

    /// Ask the provider for a JSON object response where supported
    pub json_response: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: Some(0.7),
            stop_sequences: None,
            system: None,
            json_response: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// Generated text
    pub text: String,

    /// Token usage stats
    pub usage: TokenUsage,

    /// Provider type (e.g., "openai", "ollama")
    pub provider: String,

    /// Model used (e.g., "mistralai/Mistral-7B-Instruct-v0.3")
    pub model: String,

    /// HTTP status of the upstream call
    pub status_code: Option<u16>,

    /// Why generation stopped
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason why generation stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural completion (model decided to stop)
    Stop,

    /// Hit max_tokens limit
    Length,

    /// Blocked by content filter
    ContentFilter,
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Provider error (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl LLMError {
    /// Upstream HTTP status, when one was observed
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LLMError::RateLimit => Some(429),
            LLMError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::Network(_) | LLMError::RateLimit | LLMError::Timeout(_) => true,
            LLMError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Map a non-success HTTP status to the domain error, the same way for
/// every adapter.
pub fn error_for_status(status: u16, body: String, model: &str) -> LLMError {
    match status {
        401 | 403 => LLMError::Authentication(body),
        404 => LLMError::ModelNotFound(model.to_string()),
        429 => LLMError::RateLimit,
        _ => {
            let message = match body.char_indices().nth(500) {
                Some((idx, _)) => body[..idx].to_string(),
                None => body,
            };
            LLMError::Http { status, message }
        }
    }
}

/// Pull a JSON object out of model output that may be wrapped in a
/// markdown fence or surrounded by chatter.
pub fn extract_json(text: &str) -> Option<String> {
    let start_marker = "```json";
    if let Some(start) = text.find(start_marker) {
        let content_start = start + start_marker.len();
        if let Some(end_offset) = text[content_start..].find("```") {
            let content_end = content_start + end_offset;
            return Some(text[content_start..content_end].trim().to_string());
        }
    }

    let generic_marker = "```";
    if let Some(start) = text.find(generic_marker) {
        let content_start = start + generic_marker.len();
        if let Some(end_offset) = text[content_start..].find("```") {
            let content_end = content_start + end_offset;
            return Some(text[content_start..content_end].trim().to_string());
        }
    }

    let open = text.find('{')?;
    let close = text.rfind('}')?;
    if close > open {
        return Some(text[open..=close].to_string());
    }

    None
}
