// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end runs of the pipeline state machine with scripted judges.
//!
//! Judges replay a fixed queue of opinions, so each test pins the exact
//! consensus the orchestrator sees on the first evaluation and, where the
//! run regenerates, on the re-evaluation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use gatecast_core::application::consensus::ConsensusEvaluator;
use gatecast_core::application::{OrchestratorSettings, PipelineError, PipelineOrchestrator, PipelineStages};
use gatecast_core::domain::degradation::DegradedReason;
use gatecast_core::domain::events::PipelineEvent;
use gatecast_core::domain::generation::{GenerationMode, GenerationResult, ScriptGenerator};
use gatecast_core::domain::learning::{LearningHistory, LearningSignal, MutationAdvisor, Recommendation};
use gatecast_core::domain::prediction::{QualityPrediction, QualityPredictor};
use gatecast_core::domain::primitives::{PrimitiveStore, Primitives};
use gatecast_core::domain::repository::{KeyValueStore, RepositoryError};
use gatecast_core::domain::run_context::{FinalStatus, Stage};
use gatecast_core::domain::validation::{EvaluatorOpinion, Judge, JudgePersona, ValidationError, Vote};
use gatecast_core::infrastructure::event_bus::{EventBus, EventBusError};
use gatecast_core::infrastructure::kv::InMemoryKeyValueStore;
use gatecast_core::infrastructure::repositories::InMemoryPrimitiveStore;

// ============================================================================
// Scripted collaborators
// ============================================================================

struct ScriptedJudge {
    persona: JudgePersona,
    opinions: Mutex<VecDeque<EvaluatorOpinion>>,
}

impl ScriptedJudge {
    /// The last opinion repeats once the queue is drained.
    fn new(persona: JudgePersona, verdicts: &[(Vote, f64, &[(&str, f64)])]) -> Arc<dyn Judge> {
        let opinions = verdicts
            .iter()
            .map(|(vote, score, primitives)| EvaluatorOpinion {
                persona,
                score: *score,
                vote: *vote,
                rationale: format!("{} judge: {} at {:.2}", persona, vote, score),
                examples: Vec::new(),
                primitive_scores: primitives.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                confidence: 0.9,
                degraded: false,
            })
            .collect();
        Arc::new(Self {
            persona,
            opinions: Mutex::new(opinions),
        })
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn persona(&self) -> JudgePersona {
        self.persona
    }

    async fn evaluate(&self, _: &str, _: &str, _: &Primitives) -> Result<EvaluatorOpinion, ValidationError> {
        let mut queue = self.opinions.lock();
        let opinion = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        opinion.ok_or_else(|| ValidationError::Parse("no scripted opinion".to_string()))
    }
}

/// Records the weights every generation saw.
#[derive(Default)]
struct RecordingGenerator {
    seen: Mutex<Vec<(Primitives, GenerationMode)>>,
}

#[async_trait]
impl ScriptGenerator for RecordingGenerator {
    async fn generate(&self, topic: &str, weights: &Primitives, mode: GenerationMode) -> GenerationResult {
        let mut seen = self.seen.lock();
        seen.push((weights.clone(), mode));
        let text = format!(
            "Draft {} about {}. The ministry confirmed the figures on Monday, according to its statement.",
            seen.len(),
            topic
        );
        GenerationResult {
            tokens_out_est: 20,
            text,
            model_requested: "scripted-writer".to_string(),
            model_used: "scripted-writer".to_string(),
            used_fallback: false,
            failure_chain: Vec::new(),
            latency_ms: 3,
            status_code: Some(200),
            prompt_hash: "000000000000".to_string(),
            prompt_chars: 120,
        }
    }
}

struct FixedAdvisor(Option<f64>);

#[async_trait]
impl MutationAdvisor for FixedAdvisor {
    async fn try_recommend(&self, _: &LearningSignal, _: &LearningHistory) -> Result<Recommendation, DegradedReason> {
        match self.0 {
            Some(size) => Ok(Recommendation {
                recommended_mutation_size: size,
                reasoning: "scripted".to_string(),
                confidence: 0.8,
                patterns_matched: vec!["scripted pattern".to_string()],
                historical_effectiveness: Vec::new(),
                correlations_analyzed: 0,
                degraded: false,
            }),
            None => Err(DegradedReason::Parse("advisor returned prose".to_string())),
        }
    }
}

struct FixedPredictor;

#[async_trait]
impl QualityPredictor for FixedPredictor {
    async fn try_predict(&self, _: &str, _: &Primitives) -> Result<QualityPrediction, DegradedReason> {
        Ok(QualityPrediction {
            predicted_quality: 0.66,
            confidence: 0.7,
            risk_factors: Vec::new(),
            recommended_adjustments: Vec::new(),
            degraded: false,
        })
    }
}

struct BrokenPrimitiveStore;

#[async_trait]
impl PrimitiveStore for BrokenPrimitiveStore {
    async fn get(&self) -> Result<Primitives, RepositoryError> {
        Err(RepositoryError::Database("primitive table unavailable".to_string()))
    }

    async fn set(&self, _: &str, _: f64) -> Result<bool, RepositoryError> {
        Err(RepositoryError::Database("primitive table unavailable".to_string()))
    }

    async fn reset(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Fails the `fail_on`-th write and every write after it.
struct FlakyPrimitiveStore {
    inner: InMemoryPrimitiveStore,
    fail_on: usize,
    writes: Mutex<usize>,
}

impl FlakyPrimitiveStore {
    fn failing_on(fail_on: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryPrimitiveStore::new(),
            fail_on,
            writes: Mutex::new(0),
        })
    }
}

#[async_trait]
impl PrimitiveStore for FlakyPrimitiveStore {
    async fn get(&self) -> Result<Primitives, RepositoryError> {
        self.inner.get().await
    }

    async fn set(&self, name: &str, value: f64) -> Result<bool, RepositoryError> {
        let write = {
            let mut writes = self.writes.lock();
            *writes += 1;
            *writes
        };
        if write >= self.fail_on {
            return Err(RepositoryError::Database("write lost".to_string()));
        }
        self.inner.set(name, value).await
    }

    async fn reset(&self) -> Result<(), RepositoryError> {
        self.inner.reset().await
    }
}

/// Key-value store whose counters are down; lists and strings still work.
#[derive(Default)]
struct CounterOutageStore(InMemoryKeyValueStore);

#[async_trait]
impl KeyValueStore for CounterOutageStore {
    async fn push(&self, key: &str, value: String) -> Result<usize, RepositoryError> {
        self.0.push(key, value).await
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), RepositoryError> {
        self.0.trim(key, start, stop).await
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RepositoryError> {
        self.0.range(key, start, stop).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        self.0.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), RepositoryError> {
        self.0.set(key, value).await
    }

    async fn incr_by(&self, _: &str, _: i64) -> Result<i64, RepositoryError> {
        Err(RepositoryError::Database("counter backend down".to_string()))
    }
}

type Verdicts<'a> = [(Vote, f64, &'a [(&'a str, f64)])];

struct Harness {
    orchestrator: PipelineOrchestrator,
    generator: Arc<RecordingGenerator>,
    primitives: Arc<dyn PrimitiveStore>,
}

fn harness(
    strict: &Verdicts,
    balanced: &Verdicts,
    lenient: &Verdicts,
    advisor_size: Option<f64>,
    primitives: Arc<dyn PrimitiveStore>,
) -> Harness {
    harness_with_store(
        strict,
        balanced,
        lenient,
        advisor_size,
        primitives,
        Arc::new(InMemoryKeyValueStore::new()),
    )
}

fn harness_with_store(
    strict: &Verdicts,
    balanced: &Verdicts,
    lenient: &Verdicts,
    advisor_size: Option<f64>,
    primitives: Arc<dyn PrimitiveStore>,
    store: Arc<dyn KeyValueStore>,
) -> Harness {
    let generator = Arc::new(RecordingGenerator::default());
    let evaluator = ConsensusEvaluator::new(
        ScriptedJudge::new(JudgePersona::Strict, strict),
        ScriptedJudge::new(JudgePersona::Balanced, balanced),
        ScriptedJudge::new(JudgePersona::Lenient, lenient),
        Duration::from_secs(5),
    );
    let stages = PipelineStages {
        predictor: Arc::new(FixedPredictor),
        generator: generator.clone(),
        evaluator: Arc::new(evaluator),
        advisor: Arc::new(FixedAdvisor(advisor_size)),
    };
    Harness {
        orchestrator: PipelineOrchestrator::new(
            stages,
            primitives.clone(),
            store,
            EventBus::new(64),
            OrchestratorSettings::default(),
        ),
        generator,
        primitives,
    }
}

fn default_primitives() -> Arc<dyn PrimitiveStore> {
    Arc::new(InMemoryPrimitiveStore::new())
}

const TOPIC: &str = "Regional rail strike enters third day";
const NONE: &[(&str, f64)] = &[];

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_unanimous_strong_pass_finalizes_immediately() {
    let strict: &[(&str, f64)] = &[("anti_hyperbole", 0.9)];
    let balanced: &[(&str, f64)] = &[("anti_hyperbole", 0.85)];
    let lenient: &[(&str, f64)] = &[("anti_hyperbole", 0.95)];
    let h = harness(
        &[(Vote::Pass, 0.9, strict)],
        &[(Vote::Pass, 0.85, balanced)],
        &[(Vote::Pass, 0.88, lenient)],
        Some(0.1),
        default_primitives(),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    assert_eq!(context.final_status, FinalStatus::Passed);
    assert_eq!(context.stages(), vec![Stage::Prediction, Stage::Generation, Stage::Consensus]);
    assert!(context.meta_learning.is_none());
    assert!(context.mutation.is_none());
    assert!(context.regeneration.is_none());
    assert_eq!(h.generator.seen.lock().len(), 1);

    let consensus = &context.consensus.as_ref().unwrap().result;
    assert!((consensus.consensus_score - 0.874).abs() < 1e-9);
    assert!(consensus.consensus_strength > 0.99);
}

#[tokio::test]
async fn test_failed_vote_mutates_and_regenerates_to_improved() {
    let weak: &[(&str, f64)] = &[("anti_hyperbole", 0.3), ("brevity", 0.9)];
    let fixed: &[(&str, f64)] = &[("anti_hyperbole", 0.9), ("brevity", 0.9)];
    let h = harness(
        &[(Vote::Fail, 0.2, weak), (Vote::Pass, 0.8, fixed)],
        &[(Vote::Fail, 0.4, weak), (Vote::Pass, 0.82, fixed)],
        &[(Vote::Pass, 0.6, weak), (Vote::Pass, 0.85, fixed)],
        Some(0.1),
        default_primitives(),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    assert_eq!(context.final_status, FinalStatus::Improved);
    assert_eq!(
        context.stages(),
        vec![
            Stage::Prediction,
            Stage::Generation,
            Stage::Consensus,
            Stage::MetaLearning,
            Stage::Mutation,
            Stage::Regeneration
        ]
    );

    let consensus = &context.consensus.as_ref().unwrap().result;
    assert_eq!(consensus.final_vote, Vote::Fail);
    assert!((consensus.consensus_score - 0.40).abs() < 1e-9);
    assert!(consensus.primary_complaint.as_deref().unwrap().starts_with("strict judge"));

    let meta = context.meta_learning.as_ref().unwrap();
    assert!(meta.triggers.contains(&"final_vote_fail".to_string()));
    assert!(meta.triggers.contains(&"judge_dissent".to_string()));

    let mutation = context.mutation.as_ref().unwrap();
    assert_eq!(mutation.total_mutations, 1);
    let record = &mutation.mutations[0];
    assert_eq!(record.primitive, "anti_hyperbole");
    assert!((record.new_value - 0.95).abs() < 1e-9);
    assert!((record.severity - 0.7).abs() < 1e-9);
    assert!(record.meta_learning_informed);
    assert!((mutation.expected_improvement - 10.0).abs() < 1e-9);

    // Regeneration used the freshly mutated weights.
    let seen = h.generator.seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0.get("anti_hyperbole"), Some(0.85));
    assert!((seen[1].0.get("anti_hyperbole").unwrap() - 0.95).abs() < 1e-9);

    let regeneration = context.regeneration.as_ref().unwrap();
    assert_eq!(regeneration.new_vote, Vote::Pass);
    assert!((regeneration.improvement - (regeneration.new_quality - 0.40) * 100.0).abs() < 1e-9);
    assert_eq!(regeneration.attempts, 1);
    assert_eq!(context.final_script(), Some(regeneration.new_script.as_str()));
}

#[tokio::test]
async fn test_failed_vote_that_stays_failed() {
    let weak: &[(&str, f64)] = &[("temporal_accuracy", 0.2), ("source_attribution", 0.5)];
    let h = harness(
        &[(Vote::Fail, 0.2, weak)],
        &[(Vote::Fail, 0.4, weak)],
        &[(Vote::Pass, 0.6, weak)],
        Some(0.05),
        default_primitives(),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    assert_eq!(context.final_status, FinalStatus::Failed);
    assert!(context.error.is_none());
    let mutation = context.mutation.as_ref().unwrap();
    let names: Vec<_> = mutation.mutations.iter().map(|m| m.primitive.as_str()).collect();
    assert_eq!(names, vec!["temporal_accuracy", "source_attribution"]);
    assert_eq!(context.regeneration.as_ref().unwrap().new_vote, Vote::Fail);

    let weights = h.primitives.get().await.unwrap();
    assert!((weights.get("temporal_accuracy").unwrap() - 0.75).abs() < 1e-9);
    assert!((weights.get("source_attribution").unwrap() - 0.89).abs() < 1e-9);
}

#[tokio::test]
async fn test_dissenting_pass_mutates_without_regeneration() {
    let scores: &[(&str, f64)] = &[("source_attribution", 0.6), ("brevity", 0.9)];
    let h = harness(
        &[(Vote::Pass, 0.9, scores)],
        &[(Vote::Pass, 0.85, scores)],
        &[(Vote::Fail, 0.5, scores)],
        Some(0.1),
        default_primitives(),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    assert_eq!(context.final_status, FinalStatus::Passed);
    assert_eq!(context.consensus.as_ref().unwrap().result.final_vote, Vote::Pass);
    assert_eq!(
        context.meta_learning.as_ref().unwrap().triggers,
        vec!["judge_dissent".to_string()]
    );
    assert_eq!(context.mutation.as_ref().unwrap().total_mutations, 1);
    assert!(context.regeneration.is_none());
    assert_eq!(h.generator.seen.lock().len(), 1);

    let weights = h.primitives.get().await.unwrap();
    assert!((weights.get("source_attribution").unwrap() - 0.94).abs() < 1e-9);
}

#[tokio::test]
async fn test_weak_consensus_without_weak_primitives_passes() {
    let h = harness(
        &[(Vote::Pass, 0.95, NONE)],
        &[(Vote::Pass, 0.75, NONE)],
        &[(Vote::Pass, 0.1, NONE)],
        Some(0.1),
        default_primitives(),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    assert_eq!(context.final_status, FinalStatus::Passed);
    assert_eq!(
        context.meta_learning.as_ref().unwrap().triggers,
        vec!["weak_consensus".to_string()]
    );
    assert!(context.mutation.is_none());
    assert_eq!(h.primitives.get().await.unwrap(), Primitives::defaults());
}

#[tokio::test]
async fn test_degraded_advisor_applies_default_size() {
    let weak: &[(&str, f64)] = &[("fact_verification", 0.4)];
    let h = harness(
        &[(Vote::Fail, 0.3, weak)],
        &[(Vote::Fail, 0.35, weak)],
        &[(Vote::Fail, 0.45, weak)],
        None,
        default_primitives(),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    let meta = context.meta_learning.as_ref().unwrap();
    assert!(meta.recommendation.degraded);
    assert!((meta.recommendation.recommended_mutation_size - 0.10).abs() < 1e-9);

    let record = &context.mutation.as_ref().unwrap().mutations[0];
    assert!(!record.meta_learning_informed);
    assert!((record.new_value - 0.80).abs() < 1e-9);
}

#[tokio::test]
async fn test_repository_failure_persists_partial_context() {
    let h = harness(
        &[(Vote::Pass, 0.9, NONE)],
        &[(Vote::Pass, 0.9, NONE)],
        &[(Vote::Pass, 0.9, NONE)],
        Some(0.1),
        Arc::new(BrokenPrimitiveStore),
    );
    let mut events = h.orchestrator.event_bus().subscribe();

    let err = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap_err();
    assert!(matches!(err, PipelineError::Repository(_)));

    let runs = h.orchestrator.recorder().recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].final_status, FinalStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("primitive table unavailable"));
    assert!(runs[0].generation.is_none());

    let history = h.orchestrator.recorder().episode_history(10).await.unwrap();
    assert_eq!(history[0].issues, 1);

    let mut last = None;
    loop {
        match events.try_recv() {
            Ok(event) => last = Some(event),
            Err(EventBusError::Empty) => break,
            Err(e) => panic!("unexpected bus error: {e}"),
        }
    }
    assert!(matches!(last, Some(PipelineEvent::RunFailed { .. })));
}

#[tokio::test]
async fn test_counter_outage_does_not_stop_the_run() {
    let h = harness_with_store(
        &[(Vote::Pass, 0.9, NONE)],
        &[(Vote::Pass, 0.85, NONE)],
        &[(Vote::Pass, 0.88, NONE)],
        Some(0.1),
        default_primitives(),
        Arc::new(CounterOutageStore::default()),
    );

    let context = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();

    assert_eq!(context.final_status, FinalStatus::Passed);
    assert_eq!(context.episode_number, 0);
    assert_eq!(context.stages(), vec![Stage::Prediction, Stage::Generation, Stage::Consensus]);

    let runs = h.orchestrator.recorder().recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].final_status, FinalStatus::Passed);
    assert!(runs[0].error.is_none());
}

#[tokio::test]
async fn test_failed_mutation_write_keeps_applied_records() {
    let weak: &[(&str, f64)] = &[("anti_hyperbole", 0.2), ("brevity", 0.3)];
    let h = harness(
        &[(Vote::Fail, 0.2, weak)],
        &[(Vote::Fail, 0.3, weak)],
        &[(Vote::Fail, 0.4, weak)],
        Some(0.2),
        FlakyPrimitiveStore::failing_on(2),
    );

    let err = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap_err();
    assert!(matches!(err, PipelineError::Repository(_)));
    assert!(err.to_string().contains("write lost"));

    // The first write reached the store, the second did not.
    let weights = h.primitives.get().await.unwrap();
    assert_eq!(weights.get("anti_hyperbole"), Some(1.0));
    assert_eq!(weights.get("brevity"), Some(0.40));

    let runs = h.orchestrator.recorder().recent_runs(10).await.unwrap();
    assert_eq!(runs[0].final_status, FinalStatus::Failed);
    let mutation = runs[0].mutation.as_ref().expect("applied writes are recorded");
    assert_eq!(mutation.total_mutations, 1);
    assert_eq!(mutation.mutations[0].primitive, "anti_hyperbole");
    assert!((mutation.mutations[0].new_value - 1.0).abs() < 1e-9);
    assert!(runs[0].regeneration.is_none());
    assert_eq!(h.generator.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_short_topic_never_starts_a_run() {
    let h = harness(
        &[(Vote::Pass, 0.9, NONE)],
        &[(Vote::Pass, 0.9, NONE)],
        &[(Vote::Pass, 0.9, NONE)],
        Some(0.1),
        default_primitives(),
    );

    let err = h.orchestrator.run_unified_pipeline("   AI news ").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTopic { min: 10, actual: 7 }));
    assert!(h.orchestrator.recorder().recent_runs(10).await.unwrap().is_empty());
    assert_eq!(h.orchestrator.recorder().stats().await.unwrap().total_episodes, 0);
}

#[tokio::test]
async fn test_episode_bookkeeping_across_runs() {
    let weak: &[(&str, f64)] = &[("anti_hyperbole", 0.3)];
    let h = harness(
        &[(Vote::Fail, 0.2, weak), (Vote::Pass, 0.8, NONE)],
        &[(Vote::Fail, 0.4, weak), (Vote::Pass, 0.8, NONE)],
        &[(Vote::Pass, 0.6, weak), (Vote::Pass, 0.8, NONE)],
        Some(0.1),
        default_primitives(),
    );

    let first = h.orchestrator.run_unified_pipeline(TOPIC).await.unwrap();
    let second = h
        .orchestrator
        .run_unified_pipeline("Harbour authority approves new ferry route")
        .await
        .unwrap();

    assert_eq!(first.episode_number, 1);
    assert_eq!(second.episode_number, 2);
    assert_eq!(first.final_status, FinalStatus::Improved);
    assert_eq!(second.final_status, FinalStatus::Passed);

    let recorder = h.orchestrator.recorder();
    let stats = recorder.stats().await.unwrap();
    assert_eq!(stats.total_episodes, 2);
    assert_eq!(stats.total_mutations, 1);
    assert!((stats.gate_pass_rate - 1.0).abs() < 1e-9);

    let history = recorder.episode_history(10).await.unwrap();
    assert_eq!(history[0].episode_id, 2);
    assert_eq!(history[1].episode_id, 1);
    assert_eq!(history[1].mutations, 1);
    assert_eq!(history[1].quality_score, 80);

    let correlations = recorder.load_correlations().await.unwrap();
    assert!(!correlations.is_empty());
}
