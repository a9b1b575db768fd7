// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Meta-Learning
//!
//! Turns a quality failure plus bounded run history into a recommended
//! mutation magnitude. Advisors are best effort: `recommend` always
//! returns a usable value, falling back to a fixed default.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Advisor contract, recommendation value object, history statistics

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::degradation::DegradedReason;
use crate::domain::primitives::clamp_weight;
use crate::domain::run_context::{FinalStatus, RunContext};

/// Mutation size used when no advisor output is available.
pub const DEFAULT_MUTATION_SIZE: f64 = 0.10;

/// Confidence attached to the fallback recommendation.
pub const DEFAULT_RECOMMENDATION_CONFIDENCE: f64 = 0.5;

/// Number of past runs an advisor looks at.
pub const HISTORY_WINDOW: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEffectiveness {
    pub primitive: String,
    pub similar_failures: u32,
    pub avg_mutation_size: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommended_mutation_size: f64,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub patterns_matched: Vec<String>,
    #[serde(default)]
    pub historical_effectiveness: Vec<HistoricalEffectiveness>,
    #[serde(default)]
    pub correlations_analyzed: u32,
    /// Set when this is the fallback recommendation
    #[serde(default)]
    pub degraded: bool,
}

impl Recommendation {
    pub fn fallback(reason: &DegradedReason) -> Self {
        Self {
            recommended_mutation_size: DEFAULT_MUTATION_SIZE,
            reasoning: format!(
                "Meta-learning unavailable ({}); applying default mutation size {:.2}",
                reason, DEFAULT_MUTATION_SIZE
            ),
            confidence: DEFAULT_RECOMMENDATION_CONFIDENCE,
            patterns_matched: Vec::new(),
            historical_effectiveness: Vec::new(),
            correlations_analyzed: 0,
            degraded: true,
        }
    }

    /// Reject unusable magnitudes and clamp the rest into `[0, 1]`.
    pub fn validated(mut self) -> Result<Self, DegradedReason> {
        let size = self.recommended_mutation_size;
        if !size.is_finite() || size <= 0.0 {
            return Err(DegradedReason::Schema(format!(
                "recommended_mutation_size {} is not a positive number",
                size
            )));
        }
        self.recommended_mutation_size = clamp_weight(size);
        self.confidence = clamp_weight(self.confidence);
        Ok(self)
    }
}

/// Failure signal handed to an advisor.
#[derive(Debug, Clone)]
pub struct LearningSignal {
    pub primary_complaint: Option<String>,
    pub primitive_scores: BTreeMap<String, f64>,
    pub consensus_score: f64,
}

/// Mean regeneration outcome observed after mutating a primitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveCorrelation {
    pub observations: u32,
    pub improvements: u32,
    pub mean_improvement: f64,
}

/// Cached `meta:correlations` value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    #[serde(default)]
    pub primitives: BTreeMap<String, PrimitiveCorrelation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CorrelationSummary {
    /// Fold one completed mutate-and-regenerate run into the running means.
    pub fn observe(&mut self, context: &RunContext) {
        let (Some(mutation), Some(regeneration)) = (&context.mutation, &context.regeneration) else {
            return;
        };
        let improved = context.final_status == FinalStatus::Improved;
        for record in &mutation.mutations {
            let entry = self.primitives.entry(record.primitive.clone()).or_default();
            let n = entry.observations as f64;
            entry.mean_improvement = (entry.mean_improvement * n + regeneration.improvement) / (n + 1.0);
            entry.observations += 1;
            if improved {
                entry.improvements += 1;
            }
        }
        self.updated_at = Some(context.timestamp);
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}

/// Bounded history an advisor reasons over.
#[derive(Debug, Clone, Default)]
pub struct LearningHistory {
    /// Most recent runs, newest first
    pub runs: Vec<RunContext>,
    pub correlations: CorrelationSummary,
}

impl LearningHistory {
    pub fn total_mutations(&self) -> usize {
        self.runs
            .iter()
            .filter_map(|r| r.mutation.as_ref())
            .map(|m| m.mutations.len())
            .sum()
    }

    /// Per-primitive outcome of past mutations.
    pub fn effectiveness(&self) -> Vec<HistoricalEffectiveness> {
        let mut acc: BTreeMap<&str, (u32, f64, u32)> = BTreeMap::new();
        for run in &self.runs {
            let Some(mutation) = &run.mutation else { continue };
            let succeeded = run.final_status == FinalStatus::Improved;
            for record in &mutation.mutations {
                let e = acc.entry(record.primitive.as_str()).or_insert((0, 0.0, 0));
                e.0 += 1;
                e.1 += record.delta;
                if succeeded {
                    e.2 += 1;
                }
            }
        }
        acc.into_iter()
            .map(|(primitive, (count, total_delta, successes))| HistoricalEffectiveness {
                primitive: primitive.to_string(),
                similar_failures: count,
                avg_mutation_size: total_delta / count as f64,
                success_rate: successes as f64 / count as f64,
            })
            .collect()
    }

    /// Episode numbers of past runs that mutated `primitive`, newest first.
    pub fn episodes_mutating(&self, primitive: &str) -> Vec<u64> {
        self.runs
            .iter()
            .filter(|r| {
                r.mutation
                    .as_ref()
                    .is_some_and(|m| m.mutations.iter().any(|rec| rec.primitive == primitive))
            })
            .map(|r| r.episode_number)
            .collect()
    }
}

/// Recommends how far to move underperforming primitives.
#[async_trait]
pub trait MutationAdvisor: Send + Sync {
    /// Explicitly fallible recommendation.
    async fn try_recommend(
        &self,
        signal: &LearningSignal,
        history: &LearningHistory,
    ) -> Result<Recommendation, DegradedReason>;

    /// Never fails: degrades to `Recommendation::fallback`.
    async fn recommend(&self, signal: &LearningSignal, history: &LearningHistory) -> Recommendation {
        match self.try_recommend(signal, history).await {
            Ok(recommendation) => recommendation,
            Err(reason) => {
                tracing::warn!(reason = %reason, "Meta-learning degraded, using default recommendation");
                metrics::counter!("gatecast_advisor_degraded_total", "reason" => reason.kind()).increment(1);
                Recommendation::fallback(&reason)
            }
        }
    }
}
