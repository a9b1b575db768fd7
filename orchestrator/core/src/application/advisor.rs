// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mutation Advisors
//!
//! - **LlmMetaLearningAdvisor** - asks a reasoning model for a mutation size,
//!   backing off on rate limits
//! - **HistoricalAdvisor** - deterministic rule over failure severity and
//!   past mutation outcomes; used offline and by the mock strategy
//!
//! Both implement `MutationAdvisor`; callers use `recommend`, which never
//! fails.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::degradation::DegradedReason;
use crate::domain::learning::{
    HistoricalEffectiveness, LearningHistory, LearningSignal, MutationAdvisor, Recommendation,
};
use crate::domain::llm::{extract_json, GenerationOptions, LLMError, LLMProvider};
use crate::domain::mutation::NEEDS_IMPROVEMENT_THRESHOLD;
use crate::domain::pipeline_config::MetaLearningConfig;

#[derive(Debug, Deserialize)]
struct AdvisorResponse {
    recommended_mutation_size: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    patterns_matched: Vec<String>,
    #[serde(default)]
    historical_effectiveness: Vec<HistoricalEffectiveness>,
    #[serde(default)]
    correlations_analyzed: Option<u32>,
}

fn default_confidence() -> f64 {
    0.5
}

pub struct LlmMetaLearningAdvisor {
    llm_provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Duration,
}

impl LlmMetaLearningAdvisor {
    pub fn new(llm_provider: Arc<dyn LLMProvider>, config: &MetaLearningConfig) -> Self {
        Self {
            llm_provider,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    fn build_prompt(signal: &LearningSignal, history: &LearningHistory) -> String {
        let scores = serde_json::to_string_pretty(&signal.primitive_scores).unwrap_or_default();
        let correlations = serde_json::to_string_pretty(&history.correlations.primitives).unwrap_or_default();
        let effectiveness = serde_json::to_string_pretty(&history.effectiveness()).unwrap_or_default();

        format!(
            r#"You are the META-LEARNING ENGINE analyzing a quality failure.

PRIMARY COMPLAINT: "{complaint}"
CONSENSUS SCORE: {score:.2}
PRIMITIVE SCORES: {scores}

HISTORICAL DATA:
- Total past episodes: {episodes}
- Past mutations: {mutations}
- Mutation outcomes by primitive: {effectiveness}
- Known correlations: {correlations}

YOUR JOB:
Analyze this failure pattern and recommend the OPTIMAL mutation size.

Consider:
1. Severity of the issue (lower score = larger mutation)
2. Historical effectiveness (what worked before for similar failures?)
3. Correlations (will this mutation negatively impact other primitives?)
4. Pattern matching (have we seen this failure type before?)

Return JSON (exactly in this format):
{{
  "correlations_analyzed": 7,
  "patterns_matched": ["Similar hyperbole failures in episodes 12, 34, 47"],
  "historical_effectiveness": [
    {{"primitive": "anti_hyperbole", "similar_failures": 8, "avg_mutation_size": 0.12, "success_rate": 0.875}}
  ],
  "recommended_mutation_size": 0.XX,
  "reasoning": "Why this specific mutation size is optimal, referencing history, correlations and severity.",
  "confidence": 0.XX
}}"#,
            complaint = signal.primary_complaint.as_deref().unwrap_or("Dissenting opinion"),
            score = signal.consensus_score,
            scores = scores,
            episodes = history.runs.len(),
            mutations = history.total_mutations(),
            effectiveness = effectiveness,
            correlations = correlations,
        )
    }

    async fn call_with_backoff(&self, prompt: &str) -> Result<String, DegradedReason> {
        let options = GenerationOptions {
            temperature: Some(0.2),
            max_tokens: Some(800),
            json_response: true,
            ..Default::default()
        };

        let mut attempt: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.llm_provider.generate(prompt, &options)).await {
                Ok(result) => result,
                Err(_) => Err(LLMError::Timeout(self.timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(response) => return Ok(response.text),
                Err(e) if e.status_code() == Some(429) && attempt < self.max_retries => {
                    let delay = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Advisor rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(LLMError::Timeout(ms)) => return Err(DegradedReason::Timeout(ms)),
                Err(e) => return Err(DegradedReason::Provider(e)),
            }
        }
    }

    pub fn parse_recommendation(text: &str, history: &LearningHistory) -> Result<Recommendation, DegradedReason> {
        let json = extract_json(text).unwrap_or_else(|| text.to_string());
        let parsed: AdvisorResponse =
            serde_json::from_str(&json).map_err(|e| DegradedReason::Parse(e.to_string()))?;

        Recommendation {
            recommended_mutation_size: parsed.recommended_mutation_size,
            reasoning: parsed.reasoning,
            confidence: parsed.confidence,
            patterns_matched: parsed.patterns_matched,
            historical_effectiveness: parsed.historical_effectiveness,
            correlations_analyzed: parsed
                .correlations_analyzed
                .unwrap_or(history.correlations.len() as u32),
            degraded: false,
        }
        .validated()
    }
}

#[async_trait]
impl MutationAdvisor for LlmMetaLearningAdvisor {
    async fn try_recommend(
        &self,
        signal: &LearningSignal,
        history: &LearningHistory,
    ) -> Result<Recommendation, DegradedReason> {
        let prompt = Self::build_prompt(signal, history);
        let text = self.call_with_backoff(&prompt).await?;
        let recommendation = Self::parse_recommendation(&text, history)?;
        info!(
            size = recommendation.recommended_mutation_size,
            confidence = recommendation.confidence,
            "Meta-learning recommendation received"
        );
        Ok(recommendation)
    }
}

/// Severity-scaled mutation size adjusted by past outcomes.
///
/// `size = 0.05 + 0.25 * (1 - consensus_score)`, then scaled by 1.5 when a
/// weak primitive has been mutated at least three times with under half of
/// those runs improving, and averaged with the historical size when past
/// mutations mostly worked. The result is kept in `[0.05, 0.5]`.
#[derive(Debug, Clone, Default)]
pub struct HistoricalAdvisor;

impl HistoricalAdvisor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MutationAdvisor for HistoricalAdvisor {
    async fn try_recommend(
        &self,
        signal: &LearningSignal,
        history: &LearningHistory,
    ) -> Result<Recommendation, DegradedReason> {
        let severity = (1.0 - signal.consensus_score).clamp(0.0, 1.0);
        let mut size = 0.05 + 0.25 * severity;

        let weak: Vec<&str> = signal
            .primitive_scores
            .iter()
            .filter(|(_, score)| **score < NEEDS_IMPROVEMENT_THRESHOLD)
            .map(|(name, _)| name.as_str())
            .collect();

        let relevant: Vec<HistoricalEffectiveness> = history
            .effectiveness()
            .into_iter()
            .filter(|e| weak.contains(&e.primitive.as_str()))
            .collect();

        let mut notes = vec![format!("severity {:.2} suggests {:.3}", severity, size)];
        for e in &relevant {
            if e.similar_failures >= 3 && e.success_rate < 0.5 {
                size *= 1.5;
                notes.push(format!(
                    "{} mutations rarely helped ({:.0}% of {}), stepping up",
                    e.primitive,
                    e.success_rate * 100.0,
                    e.similar_failures
                ));
            } else if e.success_rate >= 0.8 {
                size = (size + e.avg_mutation_size) / 2.0;
                notes.push(format!(
                    "{} responded well to {:.3} before",
                    e.primitive, e.avg_mutation_size
                ));
            }
        }
        let size = size.clamp(0.05, 0.5);

        let patterns_matched: Vec<String> = weak
            .iter()
            .filter_map(|primitive| {
                let episodes = history.episodes_mutating(primitive);
                if episodes.is_empty() {
                    return None;
                }
                let listed: Vec<String> = episodes.iter().take(3).map(|e| e.to_string()).collect();
                Some(format!("Similar {} failures in episodes {}", primitive, listed.join(", ")))
            })
            .collect();

        let confidence = 0.5 + 0.1 * patterns_matched.len().min(4) as f64;
        debug!(size, confidence, "Historical advisor recommendation");

        Recommendation {
            recommended_mutation_size: size,
            reasoning: format!("Recommended {:.3}: {}", size, notes.join("; ")),
            confidence,
            patterns_matched,
            historical_effectiveness: relevant,
            correlations_analyzed: history.correlations.len() as u32,
            degraded: false,
        }
        .validated()
    }
}
