// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Script generation domain types.
//!
//! A generator turns `(topic, weights, mode)` into broadcast text. It never
//! fails outright: exhausted model chains degrade to a deterministic
//! template, and every failed attempt is reported in the failure chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::primitives::Primitives;

/// `model_used` value reported when every model attempt failed.
pub const EMERGENCY_TEMPLATE_MODEL: &str = "emergency_template";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Unconstrained prompt
    Raw,
    /// Prompt carries constraint clauses derived from active primitives
    Optimized,
}

impl GenerationMode {
    pub fn temperature(&self) -> f32 {
        match self {
            GenerationMode::Raw => 0.9,
            GenerationMode::Optimized => 0.7,
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Raw => write!(f, "raw"),
            GenerationMode::Optimized => write!(f, "optimized"),
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(GenerationMode::Raw),
            "optimized" => Ok(GenerationMode::Optimized),
            other => Err(format!("unknown generation mode '{}'", other)),
        }
    }
}

/// A prompt clause switched on when its primitive reaches `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct PromptConstraint {
    pub primitive: &'static str,
    pub threshold: f64,
    pub instruction: &'static str,
}

pub const PROMPT_CONSTRAINTS: [PromptConstraint; 4] = [
    PromptConstraint {
        primitive: "fact_verification",
        threshold: 0.85,
        instruction: "Only mention real, existing products. Do not invent model numbers. If uncertain, say \"reportedly\" or \"rumored\".",
    },
    PromptConstraint {
        primitive: "anti_hyperbole",
        threshold: 0.80,
        instruction: "Avoid superlatives. Use factual, measured language.",
    },
    PromptConstraint {
        primitive: "source_attribution",
        threshold: 0.80,
        instruction: "Include at least 1 named source and a specific date.",
    },
    PromptConstraint {
        primitive: "temporal_accuracy",
        threshold: 0.75,
        instruction: "Use specific dates. Avoid vague terms like recently or soon.",
    },
];

/// Constraint clauses active under `weights`, in fixed order.
pub fn active_constraints(weights: &Primitives) -> Vec<&'static PromptConstraint> {
    PROMPT_CONSTRAINTS
        .iter()
        .filter(|c| weights.get(c.primitive).unwrap_or(0.0) >= c.threshold)
        .collect()
}

/// One failed model attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureChainEntry {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub model_requested: String,
    pub model_used: String,
    pub used_fallback: bool,
    pub failure_chain: Vec<FailureChainEntry>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub prompt_hash: String,
    pub prompt_chars: usize,
    pub tokens_out_est: u32,
}

impl GenerationResult {
    pub fn is_emergency(&self) -> bool {
        self.model_used == EMERGENCY_TEMPLATE_MODEL
    }
}

/// Rough output token estimate (~4 chars per token, at least 1).
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4).max(1)
}

/// Writer prompt for `topic`. Optimized prompts carry one numbered
/// constraint per active primitive.
pub fn build_prompt(topic: &str, weights: &Primitives, mode: GenerationMode) -> String {
    match mode {
        GenerationMode::Raw => format!(
            "Write a 60-second podcast news segment about: {}\n\n\
             Make it conversational and engaging for audio. Keep it under 150 words.\n\n\
             Segment:",
            topic
        ),
        GenerationMode::Optimized => {
            let constraints: String = active_constraints(weights)
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{}. {}\n", i + 1, c.instruction))
                .collect();
            format!(
                "Write a 60-second podcast news segment about: {}\n\n\
                 Constraints:\n{}\n\
                 Write in a professional, fact-based style. Keep it under 150 words.\n\n\
                 Segment:",
                topic, constraints
            )
        }
    }
}

/// First 12 hex chars of the SHA-256 of `text`.
pub fn prompt_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Deterministic last-resort text.
pub fn emergency_script(topic: &str, mode: GenerationMode) -> String {
    if mode == GenerationMode::Optimized {
        return format!(
            "Today's tech update covers {}. Industry observers are monitoring developments in this area. \
             The situation is evolving, and more details are expected in the coming days. \
             Follow official announcements for verified information.",
            topic
        );
    }

    let lower = topic.to_lowercase();
    let mentions_ai = lower.contains("gpt")
        || lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "ai");

    if mentions_ai {
        format!(
            "In artificial intelligence news today, {} is drawing attention. \
             Companies and researchers are watching the implications. \
             We will share updates as more verified details emerge.",
            topic
        )
    } else {
        format!(
            "In today's tech news, {} is making headlines. Analysts are watching how this develops. \
             More information is expected soon as the story evolves.",
            topic
        )
    }
}

/// Produces broadcast text for a topic.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, topic: &str, weights: &Primitives, mode: GenerationMode) -> GenerationResult;
}
