// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Context
//!
//! Audit record of one pipeline run. Each stage writes its block exactly
//! once, in pipeline order:
//!
//! ```text
//! prediction? -> generation -> consensus -> meta_learning -> mutation -> regeneration
//! ```
//!
//! `with_stage` consumes the context and hands back a new one, so a block
//! can never be edited after it was recorded. Once a final status is set
//! no further stages are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::generation::{FailureChainEntry, GenerationMode, GenerationResult};
use crate::domain::learning::Recommendation;
use crate::domain::mutation::MutationRecord;
use crate::domain::prediction::QualityPrediction;
use crate::domain::primitives::Primitives;
use crate::domain::validation::{ConsensusResult, Vote};

/// Average speaking rate used for duration estimates.
pub const WORDS_PER_SECOND: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    InProgress,
    Passed,
    Improved,
    Failed,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::InProgress => "in_progress",
            FinalStatus::Passed => "passed",
            FinalStatus::Improved => "improved",
            FinalStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prediction,
    Generation,
    Consensus,
    MetaLearning,
    Mutation,
    Regeneration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Prediction => "prediction",
            Stage::Generation => "generation",
            Stage::Consensus => "consensus",
            Stage::MetaLearning => "meta_learning",
            Stage::Mutation => "mutation",
            Stage::Regeneration => "regeneration",
        }
    }

    /// Stage that must already be recorded before this one.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Prediction | Stage::Generation => None,
            Stage::Consensus => Some(Stage::Generation),
            Stage::MetaLearning => Some(Stage::Consensus),
            Stage::Mutation => Some(Stage::MetaLearning),
            Stage::Regeneration => Some(Stage::Mutation),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionStage {
    #[serde(flatten)]
    pub prediction: QualityPrediction,
    pub predicted_pass: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStage {
    pub draft_id: Uuid,
    pub model: String,
    pub model_requested: String,
    pub mode: GenerationMode,
    pub script: String,
    pub word_count: usize,
    pub estimated_duration_seconds: u32,
    pub primitives_snapshot: Primitives,
    pub primitives_hash: String,
    pub used_fallback: bool,
    #[serde(default)]
    pub failure_chain: Vec<FailureChainEntry>,
    pub prompt_hash: String,
    pub tokens_out_est: u32,
    pub latency_ms: u64,
}

impl GenerationStage {
    pub fn from_result(result: GenerationResult, mode: GenerationMode, weights: &Primitives) -> Self {
        let word_count = result.text.split_whitespace().count();
        Self {
            draft_id: Uuid::new_v4(),
            model: result.model_used,
            model_requested: result.model_requested,
            mode,
            word_count,
            estimated_duration_seconds: estimated_duration_seconds(word_count),
            script: result.text,
            primitives_snapshot: weights.clone(),
            primitives_hash: weights.fingerprint(),
            used_fallback: result.used_fallback,
            failure_chain: result.failure_chain,
            prompt_hash: result.prompt_hash,
            tokens_out_est: result.tokens_out_est,
            latency_ms: result.latency_ms,
        }
    }
}

pub fn estimated_duration_seconds(word_count: usize) -> u32 {
    (word_count as f64 / WORDS_PER_SECOND).round() as u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusStage {
    #[serde(flatten)]
    pub result: ConsensusResult,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaLearningStage {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    /// Conditions that escalated the run into meta-learning
    pub triggers: Vec<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationStage {
    pub mutations: Vec<MutationRecord>,
    pub total_mutations: usize,
    pub expected_improvement: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationStage {
    pub new_script: String,
    pub new_quality: f64,
    pub new_vote: Vote,
    pub new_consensus_strength: f64,
    /// `(new_quality - original consensus_score) * 100`
    pub improvement: f64,
    pub attempts: u32,
    pub model: String,
    pub used_fallback: bool,
    pub latency_ms: u64,
}

/// A stage block ready to be attached to a context.
#[derive(Debug, Clone)]
pub enum StageResult {
    Prediction(PredictionStage),
    Generation(GenerationStage),
    Consensus(ConsensusStage),
    MetaLearning(MetaLearningStage),
    Mutation(MutationStage),
    Regeneration(RegenerationStage),
}

impl StageResult {
    pub fn stage(&self) -> Stage {
        match self {
            StageResult::Prediction(_) => Stage::Prediction,
            StageResult::Generation(_) => Stage::Generation,
            StageResult::Consensus(_) => Stage::Consensus,
            StageResult::MetaLearning(_) => Stage::MetaLearning,
            StageResult::Mutation(_) => Stage::Mutation,
            StageResult::Regeneration(_) => Stage::Regeneration,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            StageResult::Prediction(s) => s.latency_ms,
            StageResult::Generation(s) => s.latency_ms,
            StageResult::Consensus(s) => s.latency_ms,
            StageResult::MetaLearning(s) => s.latency_ms,
            StageResult::Mutation(s) => s.latency_ms,
            StageResult::Regeneration(s) => s.latency_ms,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunContextError {
    #[error("stage '{0}' was already recorded")]
    AlreadyRecorded(Stage),

    #[error("stage '{stage}' requires '{requires}' to be recorded first")]
    MissingPrerequisite { stage: Stage, requires: Stage },

    #[error("stage '{stage}' cannot follow the already recorded '{later}'")]
    OutOfOrder { stage: Stage, later: Stage },

    #[error("run is already finalized as {0}")]
    Finalized(FinalStatus),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub episode_number: u64,
    pub timestamp: DateTime<Utc>,
    pub topic: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prediction: Option<PredictionStage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation: Option<GenerationStage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub consensus: Option<ConsensusStage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta_learning: Option<MetaLearningStage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mutation: Option<MutationStage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub regeneration: Option<RegenerationStage>,

    pub final_status: FinalStatus,
    pub total_latency_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl RunContext {
    pub fn new(topic: impl Into<String>, episode_number: u64) -> Self {
        Self {
            run_id: RunId::new(),
            episode_number,
            timestamp: Utc::now(),
            topic: topic.into(),
            prediction: None,
            generation: None,
            consensus: None,
            meta_learning: None,
            mutation: None,
            regeneration: None,
            final_status: FinalStatus::InProgress,
            total_latency_ms: 0,
            error: None,
        }
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        match stage {
            Stage::Prediction => self.prediction.is_some(),
            Stage::Generation => self.generation.is_some(),
            Stage::Consensus => self.consensus.is_some(),
            Stage::MetaLearning => self.meta_learning.is_some(),
            Stage::Mutation => self.mutation.is_some(),
            Stage::Regeneration => self.regeneration.is_some(),
        }
    }

    /// Recorded stages in pipeline order.
    pub fn stages(&self) -> Vec<Stage> {
        [
            Stage::Prediction,
            Stage::Generation,
            Stage::Consensus,
            Stage::MetaLearning,
            Stage::Mutation,
            Stage::Regeneration,
        ]
        .into_iter()
        .filter(|s| self.has_stage(*s))
        .collect()
    }

    /// Attach a stage block, enforcing write-once and pipeline order.
    pub fn with_stage(mut self, result: StageResult) -> Result<RunContext, RunContextError> {
        if self.final_status != FinalStatus::InProgress {
            return Err(RunContextError::Finalized(self.final_status));
        }

        let stage = result.stage();
        if self.has_stage(stage) {
            return Err(RunContextError::AlreadyRecorded(stage));
        }
        if let Some(later) = self.stages().into_iter().find(|s| *s > stage) {
            return Err(RunContextError::OutOfOrder { stage, later });
        }
        if let Some(requires) = stage.prerequisite() {
            if !self.has_stage(requires) {
                return Err(RunContextError::MissingPrerequisite { stage, requires });
            }
        }

        match result {
            StageResult::Prediction(s) => self.prediction = Some(s),
            StageResult::Generation(s) => self.generation = Some(s),
            StageResult::Consensus(s) => self.consensus = Some(s),
            StageResult::MetaLearning(s) => self.meta_learning = Some(s),
            StageResult::Mutation(s) => self.mutation = Some(s),
            StageResult::Regeneration(s) => self.regeneration = Some(s),
        }
        Ok(self)
    }

    pub fn finalize(mut self, status: FinalStatus, total_latency_ms: u64) -> RunContext {
        self.final_status = status;
        self.total_latency_ms = total_latency_ms;
        self
    }

    /// Mark the run failed, keeping every stage recorded so far.
    pub fn fail(mut self, error: impl Into<String>, total_latency_ms: u64) -> RunContext {
        self.final_status = FinalStatus::Failed;
        self.total_latency_ms = total_latency_ms;
        self.error = Some(error.into());
        self
    }

    /// Regenerated quality when present, else the consensus score.
    pub fn effective_quality(&self) -> Option<f64> {
        self.regeneration
            .as_ref()
            .map(|r| r.new_quality)
            .or_else(|| self.consensus.as_ref().map(|c| c.result.consensus_score))
    }

    /// Quality on a 0-100 scale, rounded.
    pub fn quality_score(&self) -> u32 {
        self.effective_quality()
            .map(|q| (q * 100.0).round().clamp(0.0, 100.0) as u32)
            .unwrap_or(0)
    }

    pub fn mutation_count(&self) -> usize {
        self.mutation.as_ref().map(|m| m.mutations.len()).unwrap_or(0)
    }

    /// Final script: regenerated text if any, else the first draft.
    pub fn final_script(&self) -> Option<&str> {
        self.regeneration
            .as_ref()
            .map(|r| r.new_script.as_str())
            .or_else(|| self.generation.as_ref().map(|g| g.script.as_str()))
    }

    /// Multi-line human-readable report.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {} (episode {})", self.run_id, self.episode_number);
        let _ = writeln!(out, "Topic: {}", self.topic);
        let _ = writeln!(out, "Status: {} in {}ms", self.final_status, self.total_latency_ms);

        if let Some(p) = &self.prediction {
            let _ = writeln!(
                out,
                "  prediction     quality {:.2} confidence {:.2}{}",
                p.prediction.predicted_quality,
                p.prediction.confidence,
                if p.prediction.degraded { " (default)" } else { "" }
            );
        }
        if let Some(g) = &self.generation {
            let _ = writeln!(
                out,
                "  generation     {} words via {}{} [{}]",
                g.word_count,
                g.model,
                if g.used_fallback { " (fallback)" } else { "" },
                g.mode
            );
        }
        if let Some(c) = &self.consensus {
            let r = &c.result;
            let _ = writeln!(
                out,
                "  consensus      {:.2} {} strength {:.2} votes {}/{}/{}",
                r.consensus_score,
                r.final_vote,
                r.consensus_strength,
                r.strict.vote,
                r.balanced.vote,
                r.lenient.vote
            );
            if let Some(complaint) = &r.primary_complaint {
                let _ = writeln!(out, "                 complaint: {}", complaint);
            }
        }
        if let Some(m) = &self.meta_learning {
            let _ = writeln!(
                out,
                "  meta_learning  size {:.3} confidence {:.2}{}",
                m.recommendation.recommended_mutation_size,
                m.recommendation.confidence,
                if m.recommendation.degraded { " (default)" } else { "" }
            );
        }
        if let Some(m) = &self.mutation {
            for rec in &m.mutations {
                let _ = writeln!(
                    out,
                    "  mutation       {} {:.2} -> {:.2}",
                    rec.primitive, rec.old_value, rec.new_value
                );
            }
        }
        if let Some(r) = &self.regeneration {
            let _ = writeln!(
                out,
                "  regeneration   {:.2} {} ({:+.1})",
                r.new_quality, r.new_vote, r.improvement
            );
        }
        if let Some(err) = &self.error {
            let _ = writeln!(out, "  error          {}", err);
        }
        out
    }
}

/// Compact per-episode record kept in `episode_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeHistoryEntry {
    pub episode_id: u64,
    pub run_id: RunId,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub quality_score: u32,
    pub issues: u32,
    pub mutations: usize,
    pub final_status: FinalStatus,
}

impl EpisodeHistoryEntry {
    pub fn from_context(context: &RunContext) -> Self {
        Self {
            episode_id: context.episode_number,
            run_id: context.run_id,
            topic: context.topic.clone(),
            timestamp: context.timestamp,
            quality_score: context.quality_score(),
            issues: u32::from(context.final_status == FinalStatus::Failed),
            mutations: context.mutation_count(),
            final_status: context.final_status,
        }
    }
}

/// Aggregate statistics over episode history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_episodes: i64,
    pub total_mutations: i64,
    pub episodes_in_window: usize,
    pub avg_quality: f64,
    pub gate_pass_rate: f64,
    pub status_counts: BTreeMap<String, usize>,
}

impl PipelineStats {
    pub fn from_history(history: &[EpisodeHistoryEntry], total_episodes: i64, total_mutations: i64) -> Self {
        let n = history.len();
        let (avg_quality, gate_pass_rate) = if n == 0 {
            (0.0, 0.0)
        } else {
            let quality: f64 = history.iter().map(|e| e.quality_score as f64).sum::<f64>() / n as f64;
            let passed = history.iter().filter(|e| e.issues == 0).count();
            (quality, passed as f64 / n as f64)
        };
        let mut status_counts = BTreeMap::new();
        for entry in history {
            *status_counts.entry(entry.final_status.to_string()).or_insert(0) += 1;
        }
        Self {
            total_episodes,
            total_mutations,
            episodes_in_window: n,
            avg_quality,
            gate_pass_rate,
            status_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::{EvaluatorOpinion, JudgePersona};

    fn generation_stage() -> StageResult {
        let result = GenerationResult {
            text: "The league confirmed on March 3 that the final will move to Denver, per the commissioner.".into(),
            model_requested: "primary".into(),
            model_used: "primary".into(),
            used_fallback: false,
            failure_chain: vec![],
            latency_ms: 12,
            status_code: Some(200),
            prompt_hash: "abc".into(),
            prompt_chars: 10,
            tokens_out_est: 20,
        };
        StageResult::Generation(GenerationStage::from_result(
            result,
            GenerationMode::Optimized,
            &Primitives::defaults(),
        ))
    }

    fn consensus_stage(score: f64, vote: Vote) -> StageResult {
        let op = |p| EvaluatorOpinion {
            persona: p,
            score,
            vote,
            rationale: "r".into(),
            examples: vec![],
            primitive_scores: BTreeMap::new(),
            confidence: 1.0,
            degraded: false,
        };
        StageResult::Consensus(ConsensusStage {
            result: ConsensusResult::from_opinions(
                op(JudgePersona::Strict),
                op(JudgePersona::Balanced),
                op(JudgePersona::Lenient),
            ),
            latency_ms: 5,
        })
    }

    #[test]
    fn test_stages_append_in_order() {
        let ctx = RunContext::new("A topic long enough", 1)
            .with_stage(generation_stage())
            .unwrap()
            .with_stage(consensus_stage(0.9, Vote::Pass))
            .unwrap();
        assert_eq!(ctx.stages(), vec![Stage::Generation, Stage::Consensus]);
        assert_eq!(ctx.quality_score(), 90);
        assert!(ctx.final_script().unwrap().starts_with("The league"));
    }

    #[test]
    fn test_stage_cannot_be_recorded_twice() {
        let ctx = RunContext::new("topic", 1).with_stage(generation_stage()).unwrap();
        let err = ctx.with_stage(generation_stage()).unwrap_err();
        assert_eq!(err, RunContextError::AlreadyRecorded(Stage::Generation));
    }

    #[test]
    fn test_consensus_requires_generation() {
        let err = RunContext::new("topic", 1)
            .with_stage(consensus_stage(0.5, Vote::Fail))
            .unwrap_err();
        assert_eq!(
            err,
            RunContextError::MissingPrerequisite {
                stage: Stage::Consensus,
                requires: Stage::Generation
            }
        );
    }

    #[test]
    fn test_prediction_after_generation_is_out_of_order() {
        let ctx = RunContext::new("topic", 1).with_stage(generation_stage()).unwrap();
        let err = ctx
            .with_stage(StageResult::Prediction(PredictionStage {
                prediction: QualityPrediction::fallback(),
                predicted_pass: true,
                latency_ms: 0,
            }))
            .unwrap_err();
        assert!(matches!(err, RunContextError::OutOfOrder { stage: Stage::Prediction, .. }));
    }

    #[test]
    fn test_finalized_context_rejects_stages() {
        let ctx = RunContext::new("topic", 1).finalize(FinalStatus::Passed, 10);
        let err = ctx.with_stage(generation_stage()).unwrap_err();
        assert_eq!(err, RunContextError::Finalized(FinalStatus::Passed));
    }

    #[test]
    fn test_fail_keeps_partial_stages() {
        let ctx = RunContext::new("topic", 4)
            .with_stage(generation_stage())
            .unwrap()
            .fail("judge exploded", 33);
        assert_eq!(ctx.final_status, FinalStatus::Failed);
        assert!(ctx.generation.is_some());
        assert_eq!(ctx.error.as_deref(), Some("judge exploded"));
        assert!(ctx.summary().contains("judge exploded"));
    }

    #[test]
    fn test_episode_entry_and_stats() {
        let passed = RunContext::new("topic one", 1)
            .with_stage(generation_stage())
            .unwrap()
            .with_stage(consensus_stage(0.876, Vote::Pass))
            .unwrap()
            .finalize(FinalStatus::Passed, 100);
        let failed = RunContext::new("topic two", 2)
            .with_stage(generation_stage())
            .unwrap()
            .with_stage(consensus_stage(0.3, Vote::Fail))
            .unwrap()
            .finalize(FinalStatus::Failed, 100);

        let a = EpisodeHistoryEntry::from_context(&passed);
        let b = EpisodeHistoryEntry::from_context(&failed);
        assert_eq!(a.quality_score, 88);
        assert_eq!(a.issues, 0);
        assert_eq!(b.issues, 1);

        let stats = PipelineStats::from_history(&[a, b], 2, 0);
        assert!((stats.avg_quality - 59.0).abs() < 1e-9);
        assert!((stats.gate_pass_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.status_counts["failed"], 1);
    }

    #[test]
    fn test_duration_estimate() {
        assert_eq!(estimated_duration_seconds(150), 60);
        assert_eq!(estimated_duration_seconds(0), 0);
    }

    #[test]
    fn test_context_json_roundtrip_keeps_stages() {
        let ctx = RunContext::new("topic", 9)
            .with_stage(generation_stage())
            .unwrap()
            .with_stage(consensus_stage(0.6, Vote::Fail))
            .unwrap();
        let json = serde_json::to_string(&ctx).unwrap();
        let back: RunContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, ctx.run_id);
        assert_eq!(back.stages(), ctx.stages());
        assert!(!json.contains("\"mutation\""));
    }
}
