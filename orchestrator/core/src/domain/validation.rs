// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consensus Validation Domain
//!
//! Scripts are scored by three differently-biased judges. Each judge yields
//! an `EvaluatorOpinion`; the three are folded into one `ConsensusResult`.
//!
//! ## Aggregation
//!
//! | Quantity | Rule |
//! |----------|------|
//! | `consensus_score` | `0.3 * strict + 0.4 * balanced + 0.3 * lenient` |
//! | `final_vote` | pass iff at least 2 of 3 judges pass |
//! | `consensus_strength` | `1 - min(var / 0.25, 1)` over the three scores (population variance) |
//! | `primitive_scores` | same weights, keyed on the strict judge's primitive names, missing = 0 |
//! | `disputed_primitives` | primitives whose per-judge spread exceeds 0.3 |
//!
//! The variance bound of 0.25 is the maximum variance of values in `[0, 1]`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::llm::LLMError;
use crate::domain::primitives::Primitives;

/// Weights applied to strict, balanced and lenient opinions.
pub const CONSENSUS_WEIGHTS: [f64; 3] = [0.3, 0.4, 0.3];

/// Maximum variance of three values in `[0, 1]`.
pub const MAX_SCORE_VARIANCE: f64 = 0.25;

/// Per-primitive score spread above which judges are said to dispute it.
pub const DISPUTE_SPREAD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Pass,
    Fail,
}

impl Vote {
    pub fn is_pass(&self) -> bool {
        matches!(self, Vote::Pass)
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vote::Pass => write!(f, "pass"),
            Vote::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgePersona {
    /// Cynical editor who hates hype
    Strict,
    /// Neutral, objective assessor
    Balanced,
    /// Generous reviewer looking for what works
    Lenient,
}

impl JudgePersona {
    pub const ALL: [JudgePersona; 3] = [JudgePersona::Strict, JudgePersona::Balanced, JudgePersona::Lenient];

    pub fn weight(&self) -> f64 {
        match self {
            JudgePersona::Strict => CONSENSUS_WEIGHTS[0],
            JudgePersona::Balanced => CONSENSUS_WEIGHTS[1],
            JudgePersona::Lenient => CONSENSUS_WEIGHTS[2],
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            JudgePersona::Strict => 0.1,
            JudgePersona::Balanced => 0.3,
            JudgePersona::Lenient => 0.5,
        }
    }

    /// JSON field carrying the persona's free-text rationale.
    pub fn rationale_field(&self) -> &'static str {
        match self {
            JudgePersona::Strict => "complaint",
            JudgePersona::Balanced => "reasoning",
            JudgePersona::Lenient => "praise",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JudgePersona::Strict => "strict",
            JudgePersona::Balanced => "balanced",
            JudgePersona::Lenient => "lenient",
        }
    }
}

impl std::fmt::Display for JudgePersona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One judge's assessment of a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorOpinion {
    pub persona: JudgePersona,

    /// Overall quality (0.0 - 1.0)
    pub score: f64,

    pub vote: Vote,

    /// Complaint, reasoning or praise depending on persona
    pub rationale: String,

    /// Offending or exemplary excerpts quoted by the judge
    #[serde(default)]
    pub examples: Vec<String>,

    #[serde(default)]
    pub primitive_scores: BTreeMap<String, f64>,

    /// How much the opinion should be trusted (0 for substituted opinions)
    pub confidence: f64,

    /// Set when this opinion replaced a failed judge call
    #[serde(default)]
    pub degraded: bool,
}

impl EvaluatorOpinion {
    /// Neutral stand-in for a judge that could not produce an opinion.
    pub fn neutral(persona: JudgePersona, reason: impl Into<String>) -> Self {
        Self {
            persona,
            score: 0.5,
            vote: Vote::Fail,
            rationale: format!("Judge unavailable: {}", reason.into()),
            examples: Vec::new(),
            primitive_scores: BTreeMap::new(),
            confidence: 0.0,
            degraded: true,
        }
    }
}

/// Aggregated verdict of the three judges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub consensus_score: f64,
    pub final_vote: Vote,
    pub consensus_strength: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_complaint: Option<String>,
    pub primitive_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub disputed_primitives: Vec<String>,
    pub strict: EvaluatorOpinion,
    pub balanced: EvaluatorOpinion,
    pub lenient: EvaluatorOpinion,
}

impl ConsensusResult {
    pub fn from_opinions(
        strict: EvaluatorOpinion,
        balanced: EvaluatorOpinion,
        lenient: EvaluatorOpinion,
    ) -> Self {
        let opinions = [&strict, &balanced, &lenient];

        let consensus_score = weighted_score(opinions.map(|o| o.score));
        let final_vote = majority_vote(opinions.map(|o| o.vote));
        let consensus_strength = consensus_strength(opinions.map(|o| o.score));

        let primary_complaint = if final_vote == Vote::Fail || strict.vote == Vote::Fail {
            Some(strict.rationale.clone())
        } else {
            None
        };

        let primitive_scores = weighted_primitive_scores(&strict, &balanced, &lenient);
        let disputed_primitives = disputed_primitives(&opinions);

        Self {
            consensus_score,
            final_vote,
            consensus_strength,
            primary_complaint,
            primitive_scores,
            disputed_primitives,
            strict,
            balanced,
            lenient,
        }
    }

    pub fn opinions(&self) -> [&EvaluatorOpinion; 3] {
        [&self.strict, &self.balanced, &self.lenient]
    }

    pub fn pass_votes(&self) -> usize {
        self.opinions().iter().filter(|o| o.vote.is_pass()).count()
    }

    /// At least one judge voted fail.
    pub fn has_dissent(&self) -> bool {
        self.pass_votes() < 3
    }

    /// Number of judges replaced by the neutral opinion.
    pub fn degraded_judges(&self) -> usize {
        self.opinions().iter().filter(|o| o.degraded).count()
    }
}

pub fn weighted_score(scores: [f64; 3]) -> f64 {
    scores
        .iter()
        .zip(CONSENSUS_WEIGHTS.iter())
        .map(|(s, w)| s * w)
        .sum()
}

/// Pass iff at least two of three votes pass.
pub fn majority_vote(votes: [Vote; 3]) -> Vote {
    if votes.iter().filter(|v| v.is_pass()).count() >= 2 {
        Vote::Pass
    } else {
        Vote::Fail
    }
}

/// Population variance of the scores.
pub fn score_variance(scores: [f64; 3]) -> f64 {
    let mean = scores.iter().sum::<f64>() / 3.0;
    scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / 3.0
}

/// `1 - min(var / 0.25, 1)`, always in `[0, 1]`.
pub fn consensus_strength(scores: [f64; 3]) -> f64 {
    let disagreement_penalty = (score_variance(scores) / MAX_SCORE_VARIANCE).min(1.0);
    1.0 - disagreement_penalty
}

fn weighted_primitive_scores(
    strict: &EvaluatorOpinion,
    balanced: &EvaluatorOpinion,
    lenient: &EvaluatorOpinion,
) -> BTreeMap<String, f64> {
    // Names come from the strict judge; if it was substituted, the first
    // judge that reported any primitives defines the key set.
    let keys = [strict, balanced, lenient]
        .into_iter()
        .map(|o| &o.primitive_scores)
        .find(|m| !m.is_empty());

    let Some(keys) = keys else {
        return BTreeMap::new();
    };

    keys.keys()
        .map(|name| {
            let pick = |o: &EvaluatorOpinion| o.primitive_scores.get(name).copied().unwrap_or(0.0);
            let value = weighted_score([pick(strict), pick(balanced), pick(lenient)]);
            (name.clone(), value)
        })
        .collect()
}

fn disputed_primitives(opinions: &[&EvaluatorOpinion; 3]) -> Vec<String> {
    let mut spans: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for opinion in opinions.iter().filter(|o| !o.degraded) {
        for (name, score) in &opinion.primitive_scores {
            let entry = spans.entry(name.as_str()).or_insert((*score, *score));
            entry.0 = entry.0.min(*score);
            entry.1 = entry.1.max(*score);
        }
    }
    spans
        .into_iter()
        .filter(|(_, (lo, hi))| hi - lo > DISPUTE_SPREAD)
        .map(|(name, _)| name.to_string())
        .collect()
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Judge response could not be parsed: {0}")]
    Parse(String),

    #[error("Judge response rejected: {0}")]
    Schema(String),

    #[error("Judge timed out after {0}ms")]
    Timeout(u64),

    #[error("LLM validation failed: {0}")]
    LlmError(#[from] LLMError),
}

/// One persona-bound judge.
#[async_trait]
pub trait Judge: Send + Sync {
    fn persona(&self) -> JudgePersona;

    async fn evaluate(
        &self,
        script: &str,
        topic: &str,
        weights: &Primitives,
    ) -> Result<EvaluatorOpinion, ValidationError>;
}

/// Folds multiple judges into one verdict. Never fails: failed judges are
/// replaced by neutral opinions.
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn evaluate(&self, script: &str, topic: &str, weights: &Primitives) -> ConsensusResult;
}
