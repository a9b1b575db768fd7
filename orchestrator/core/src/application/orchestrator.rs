// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Pipeline Orchestrator
//!
//! Drives one run through the quality gate:
//!
//! ```text
//! created -> predicted -> generated -> evaluated
//!     evaluated -> passed                       (unanimous, strong consensus)
//!     evaluated -> meta_learned -> passed       (nothing below threshold)
//!     meta_learned -> mutated -> passed         (original vote passed)
//!     mutated -> regenerated -> improved|failed (original vote failed)
//! ```
//!
//! Meta-learning is entered when the final vote fails, any judge votes
//! fail, or consensus strength is below 0.7.
//!
//! Every run is persisted, including runs that end in error: the partial
//! context is saved with `final_status = failed` before the error is
//! returned. Stage progress is published on the event bus; the
//! orchestrator itself never sleeps or prints.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::mutation_engine::{MutationEngine, PartialMutation};
use crate::application::recorder::RunContextRecorder;
use crate::application::strategy::PipelineStages;
use crate::domain::degradation::DegradedReason;
use crate::domain::events::PipelineEvent;
use crate::domain::generation::GenerationMode;
use crate::domain::learning::{LearningSignal, Recommendation, HISTORY_WINDOW};
use crate::domain::mutation::needs_improvement;
use crate::domain::pipeline_config::PipelineConfigSpec;
use crate::domain::primitives::PrimitiveStore;
use crate::domain::repository::{KeyValueStore, RepositoryError};
use crate::domain::run_context::{
    ConsensusStage, FinalStatus, GenerationStage, MetaLearningStage, MutationStage, PredictionStage,
    RegenerationStage, RunContext, RunContextError, Stage, StageResult,
};
use crate::domain::validation::{ConsensusResult, Vote};
use crate::infrastructure::event_bus::EventBus;

/// Topics shorter than this (after trimming) are rejected.
pub const MIN_TOPIC_CHARS: usize = 10;

/// Consensus strength below which a passing run is still analysed.
pub const MIN_CONSENSUS_STRENGTH: f64 = 0.7;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Topic must be at least {min} characters, got {actual}")]
    InvalidTopic { min: usize, actual: usize },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Run context error: {0}")]
    RunContext(#[from] RunContextError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub initial_mode: GenerationMode,
    pub regeneration_mode: GenerationMode,
    pub history_window: usize,
    pub prediction_enabled: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            initial_mode: GenerationMode::Optimized,
            regeneration_mode: GenerationMode::Optimized,
            history_window: HISTORY_WINDOW,
            prediction_enabled: true,
        }
    }
}

impl From<&PipelineConfigSpec> for OrchestratorSettings {
    fn from(spec: &PipelineConfigSpec) -> Self {
        Self {
            initial_mode: spec.generation.initial_mode,
            regeneration_mode: spec.generation.regeneration_mode,
            history_window: spec.meta_learning.history_window,
            prediction_enabled: spec.prediction.enabled,
        }
    }
}

/// Why meta-learning was entered; empty when the run passes outright.
pub fn meta_learning_triggers(consensus: &ConsensusResult) -> Vec<String> {
    let mut triggers = Vec::new();
    if consensus.final_vote == Vote::Fail {
        triggers.push("final_vote_fail".to_string());
    }
    if consensus.has_dissent() {
        triggers.push("judge_dissent".to_string());
    }
    if consensus.consensus_strength < MIN_CONSENSUS_STRENGTH {
        triggers.push("weak_consensus".to_string());
    }
    triggers
}

/// The in-flight context. Recording clones first so a rejected stage
/// leaves the last good context in place for persistence.
struct RunState {
    context: RunContext,
}

impl RunState {
    fn record(&mut self, result: StageResult) -> Result<(), RunContextError> {
        self.context = self.context.clone().with_stage(result)?;
        Ok(())
    }
}

pub struct PipelineOrchestrator {
    stages: PipelineStages,
    primitives: Arc<dyn PrimitiveStore>,
    mutation_engine: MutationEngine,
    recorder: RunContextRecorder,
    event_bus: EventBus,
    settings: OrchestratorSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        stages: PipelineStages,
        primitives: Arc<dyn PrimitiveStore>,
        store: Arc<dyn KeyValueStore>,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            stages,
            mutation_engine: MutationEngine::new(primitives.clone()),
            primitives,
            recorder: RunContextRecorder::new(store),
            event_bus,
            settings,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn recorder(&self) -> &RunContextRecorder {
        &self.recorder
    }

    /// Run one topic through the full pipeline.
    pub async fn run_unified_pipeline(&self, topic: &str) -> Result<RunContext, PipelineError> {
        let topic = topic.trim();
        let actual = topic.chars().count();
        if actual < MIN_TOPIC_CHARS {
            return Err(PipelineError::InvalidTopic {
                min: MIN_TOPIC_CHARS,
                actual,
            });
        }

        let started = Instant::now();
        let episode = self.recorder.next_episode_number().await;
        let mut state = RunState {
            context: RunContext::new(topic, episode),
        };
        let run_id = state.context.run_id;

        info!(run_id = %run_id, episode = state.context.episode_number, topic = %topic, "Pipeline run started");
        self.event_bus.publish(PipelineEvent::RunStarted {
            run_id,
            episode_number: state.context.episode_number,
            topic: topic.to_string(),
            started_at: state.context.timestamp,
        });

        let outcome = self.execute(&mut state).await;
        let total_latency_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("gatecast_run_duration_ms").record(total_latency_ms as f64);

        match outcome {
            Ok(status) => {
                let context = state.context.finalize(status, total_latency_ms);
                self.recorder.save(&context).await;
                self.recorder.record_episode(&context).await;
                metrics::counter!("gatecast_runs_total", "status" => status.as_str()).increment(1);
                info!(run_id = %run_id, status = %status, total_latency_ms, "Pipeline run finalized");
                self.event_bus.publish(PipelineEvent::RunFinalized {
                    run_id,
                    status,
                    total_latency_ms,
                    finalized_at: Utc::now(),
                });
                Ok(context)
            }
            Err(e) => {
                let context = state.context.fail(e.to_string(), total_latency_ms);
                self.recorder.save(&context).await;
                self.recorder.record_episode(&context).await;
                metrics::counter!("gatecast_runs_total", "status" => "error").increment(1);
                error!(run_id = %run_id, error = %e, "Pipeline run failed");
                self.event_bus.publish(PipelineEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    fn completed(&self, state: &RunState, stage: Stage, latency_ms: u64, detail: String) {
        debug!(run_id = %state.context.run_id, stage = %stage, latency_ms, "{}", detail);
        self.event_bus.publish(PipelineEvent::StageCompleted {
            run_id: state.context.run_id,
            stage,
            latency_ms,
            detail,
            completed_at: Utc::now(),
        });
    }

    fn skipped(&self, state: &RunState, stage: Stage, reason: &str) {
        debug!(run_id = %state.context.run_id, stage = %stage, reason, "Stage skipped");
        self.event_bus.publish(PipelineEvent::StageSkipped {
            run_id: state.context.run_id,
            stage,
            reason: reason.to_string(),
        });
    }

    async fn execute(&self, state: &mut RunState) -> Result<FinalStatus, PipelineError> {
        let topic = state.context.topic.clone();
        let weights = self.primitives.get().await?;

        // Prediction
        if self.settings.prediction_enabled {
            let t = Instant::now();
            let prediction = self.stages.predictor.predict(&topic, &weights).await;
            let stage = PredictionStage {
                predicted_pass: prediction.predicted_pass(),
                prediction,
                latency_ms: t.elapsed().as_millis() as u64,
            };
            let detail = format!(
                "predicted quality {:.2} (confidence {:.2})",
                stage.prediction.predicted_quality, stage.prediction.confidence
            );
            let latency = stage.latency_ms;
            state.record(StageResult::Prediction(stage))?;
            self.completed(state, Stage::Prediction, latency, detail);
        } else {
            self.skipped(state, Stage::Prediction, "prediction disabled");
        }

        // Generation
        let mode = self.settings.initial_mode;
        let result = self.stages.generator.generate(&topic, &weights, mode).await;
        let generation = GenerationStage::from_result(result, mode, &weights);
        let script = generation.script.clone();
        let detail = format!(
            "{} words via {}{}",
            generation.word_count,
            generation.model,
            if generation.used_fallback { " (fallback)" } else { "" }
        );
        let latency = generation.latency_ms;
        state.record(StageResult::Generation(generation))?;
        self.completed(state, Stage::Generation, latency, detail);

        // Consensus
        let t = Instant::now();
        let consensus = self.stages.evaluator.evaluate(&script, &topic, &weights).await;
        let latency = t.elapsed().as_millis() as u64;
        let detail = format!(
            "score {:.2} {} ({} of 3 pass, strength {:.2})",
            consensus.consensus_score,
            consensus.final_vote,
            consensus.pass_votes(),
            consensus.consensus_strength
        );
        state.record(StageResult::Consensus(ConsensusStage {
            result: consensus.clone(),
            latency_ms: latency,
        }))?;
        self.completed(state, Stage::Consensus, latency, detail);

        let triggers = meta_learning_triggers(&consensus);
        if triggers.is_empty() {
            self.skipped(state, Stage::MetaLearning, "unanimous pass with strong consensus");
            return Ok(FinalStatus::Passed);
        }

        // Meta-learning
        let t = Instant::now();
        let signal = LearningSignal {
            primary_complaint: consensus.primary_complaint.clone(),
            primitive_scores: consensus.primitive_scores.clone(),
            consensus_score: consensus.consensus_score,
        };
        let recommendation = match self.recorder.load_history(self.settings.history_window).await {
            Ok(history) => self.stages.advisor.recommend(&signal, &history).await,
            Err(e) => {
                let reason = DegradedReason::History(e);
                warn!(reason = %reason, "Meta-learning degraded, using default recommendation");
                metrics::counter!("gatecast_advisor_degraded_total", "reason" => reason.kind()).increment(1);
                Recommendation::fallback(&reason)
            }
        };
        let size = recommendation.recommended_mutation_size;
        let informed = !recommendation.degraded;
        let latency = t.elapsed().as_millis() as u64;
        let detail = format!(
            "mutation size {:.3} (confidence {:.2}) on {}",
            size,
            recommendation.confidence,
            triggers.join(", ")
        );
        state.record(StageResult::MetaLearning(MetaLearningStage {
            recommendation,
            triggers,
            latency_ms: latency,
        }))?;
        self.completed(state, Stage::MetaLearning, latency, detail);

        // Mutation
        if needs_improvement(&consensus.primitive_scores, &weights).is_empty() {
            self.skipped(state, Stage::Mutation, "no primitive below threshold");
            return Ok(FinalStatus::Passed);
        }
        let t = Instant::now();
        let mutations = match self
            .mutation_engine
            .apply(
                &consensus.primitive_scores,
                size,
                &weights,
                consensus.primary_complaint.as_deref(),
                informed,
            )
            .await
        {
            Ok(mutations) => mutations,
            Err(PartialMutation { applied, source, .. }) => {
                // Writes that reached the store stay on the audit record.
                if !applied.is_empty() {
                    let latency = t.elapsed().as_millis() as u64;
                    let detail = format!("{} of the planned writes applied before failure", applied.len());
                    state.record(StageResult::Mutation(MutationStage {
                        total_mutations: applied.len(),
                        expected_improvement: size * 100.0,
                        mutations: applied,
                        latency_ms: latency,
                    }))?;
                    self.completed(state, Stage::Mutation, latency, detail);
                }
                return Err(source.into());
            }
        };
        if mutations.is_empty() {
            self.skipped(state, Stage::Mutation, "no known primitive could be updated");
            return Ok(FinalStatus::Passed);
        }
        let latency = t.elapsed().as_millis() as u64;
        let detail = mutations
            .iter()
            .map(|m| format!("{} {:.2} -> {:.2}", m.primitive, m.old_value, m.new_value))
            .collect::<Vec<_>>()
            .join(", ");
        state.record(StageResult::Mutation(MutationStage {
            total_mutations: mutations.len(),
            expected_improvement: size * 100.0,
            mutations,
            latency_ms: latency,
        }))?;
        self.completed(state, Stage::Mutation, latency, detail);

        // Regeneration
        if consensus.final_vote != Vote::Fail {
            self.skipped(state, Stage::Regeneration, "original vote passed");
            return Ok(FinalStatus::Passed);
        }
        let t = Instant::now();
        let new_weights = self.primitives.get().await?;
        let regenerated = self
            .stages
            .generator
            .generate(&topic, &new_weights, self.settings.regeneration_mode)
            .await;
        let re_evaluated = self
            .stages
            .evaluator
            .evaluate(&regenerated.text, &topic, &new_weights)
            .await;
        let latency = t.elapsed().as_millis() as u64;
        let improvement = (re_evaluated.consensus_score - consensus.consensus_score) * 100.0;
        let status = if re_evaluated.final_vote.is_pass() {
            FinalStatus::Improved
        } else {
            FinalStatus::Failed
        };
        let detail = format!(
            "score {:.2} {} ({:+.1})",
            re_evaluated.consensus_score, re_evaluated.final_vote, improvement
        );
        state.record(StageResult::Regeneration(RegenerationStage {
            new_script: regenerated.text,
            new_quality: re_evaluated.consensus_score,
            new_vote: re_evaluated.final_vote,
            new_consensus_strength: re_evaluated.consensus_strength,
            improvement,
            attempts: 1,
            model: regenerated.model_used,
            used_fallback: regenerated.used_fallback,
            latency_ms: latency,
        }))?;
        self.completed(state, Stage::Regeneration, latency, detail);

        Ok(status)
    }
}
