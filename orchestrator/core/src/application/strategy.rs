// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pipeline Strategies
//!
//! A strategy decides which collaborators fill the four pipeline roles. The
//! orchestrator's state machine is the same for every strategy.
//!
//! - **LiveStrategy** - LLM adapters resolved through the provider registry
//! - **MockStrategy** - deterministic offline collaborators

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::advisor::{HistoricalAdvisor, LlmMetaLearningAdvisor};
use crate::application::consensus::ConsensusEvaluator;
use crate::application::generation_gateway::GenerationGateway;
use crate::application::predictor::{DefaultPredictor, LlmQualityPredictor};
use crate::domain::generation::ScriptGenerator;
use crate::domain::learning::MutationAdvisor;
use crate::domain::pipeline_config::{PipelineConfigManifest, PipelineConfigSpec, StrategyKind};
use crate::domain::prediction::QualityPredictor;
use crate::domain::validation::{Judge, JudgePersona, ScriptEvaluator};
use crate::infrastructure::llm::ProviderRegistry;
use crate::infrastructure::mock::{MockJudge, MockQualityPredictor, MockScriptGenerator};

/// The four pluggable roles of a run.
#[derive(Clone)]
pub struct PipelineStages {
    pub predictor: Arc<dyn QualityPredictor>,
    pub generator: Arc<dyn ScriptGenerator>,
    pub evaluator: Arc<dyn ScriptEvaluator>,
    pub advisor: Arc<dyn MutationAdvisor>,
}

pub trait PipelineStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn stages(&self) -> Result<PipelineStages>;
}

pub struct LiveStrategy {
    registry: Arc<ProviderRegistry>,
    spec: PipelineConfigSpec,
}

impl LiveStrategy {
    pub fn new(registry: Arc<ProviderRegistry>, spec: PipelineConfigSpec) -> Self {
        Self { registry, spec }
    }
}

impl PipelineStrategy for LiveStrategy {
    fn name(&self) -> &'static str {
        "live"
    }

    fn stages(&self) -> Result<PipelineStages> {
        let generator = GenerationGateway::from_registry(&self.registry, self.spec.generation.clone());

        let judge_provider = self
            .registry
            .provider(&self.spec.consensus.judge_model)
            .with_context(|| format!("judge model alias '{}' is not available", self.spec.consensus.judge_model))?;
        let evaluator = ConsensusEvaluator::with_llm(
            judge_provider,
            Duration::from_millis(self.spec.consensus.judge_timeout_ms),
        );

        let advisor: Arc<dyn MutationAdvisor> = match self.registry.provider(&self.spec.meta_learning.advisor_model) {
            Ok(provider) => Arc::new(LlmMetaLearningAdvisor::new(provider, &self.spec.meta_learning)),
            Err(e) => {
                warn!(error = %e, "Advisor model unavailable, using historical advisor");
                Arc::new(HistoricalAdvisor::new())
            }
        };

        let predictor: Arc<dyn QualityPredictor> = match self.registry.provider(&self.spec.prediction.predictor_model) {
            Ok(provider) if self.spec.prediction.enabled => Arc::new(LlmQualityPredictor::new(
                provider,
                Duration::from_millis(self.spec.prediction.timeout_ms),
            )),
            _ => Arc::new(DefaultPredictor),
        };

        Ok(PipelineStages {
            predictor,
            generator: Arc::new(generator),
            evaluator: Arc::new(evaluator),
            advisor,
        })
    }
}

pub struct MockStrategy {
    judge_timeout: Duration,
}

impl MockStrategy {
    pub fn new(judge_timeout: Duration) -> Self {
        Self { judge_timeout }
    }
}

impl Default for MockStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl PipelineStrategy for MockStrategy {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn stages(&self) -> Result<PipelineStages> {
        let judge = |persona| Arc::new(MockJudge::new(persona)) as Arc<dyn Judge>;
        Ok(PipelineStages {
            predictor: Arc::new(MockQualityPredictor::new()),
            generator: Arc::new(MockScriptGenerator::new()),
            evaluator: Arc::new(ConsensusEvaluator::new(
                judge(JudgePersona::Strict),
                judge(JudgePersona::Balanced),
                judge(JudgePersona::Lenient),
                self.judge_timeout,
            )),
            advisor: Arc::new(HistoricalAdvisor::new()),
        })
    }
}

/// Strategy selected by `spec.strategy`.
pub fn strategy_from_config(manifest: &PipelineConfigManifest) -> Result<Box<dyn PipelineStrategy>> {
    let spec = &manifest.spec;
    let strategy: Box<dyn PipelineStrategy> = match spec.strategy {
        StrategyKind::Live => {
            let registry = ProviderRegistry::from_config(manifest)?;
            Box::new(LiveStrategy::new(Arc::new(registry), spec.clone()))
        }
        StrategyKind::Mock => Box::new(MockStrategy::new(Duration::from_millis(spec.consensus.judge_timeout_ms))),
    };
    info!(strategy = strategy.name(), "Pipeline strategy selected");
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::{GenerationOptions, GenerationResponse, LLMError, LLMProvider};
    use async_trait::async_trait;

    struct NullProvider;

    #[async_trait]
    impl LLMProvider for NullProvider {
        async fn generate(&self, _: &str, _: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
            Err(LLMError::Network("offline".into()))
        }

        fn model(&self) -> &str {
            "null"
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    #[test]
    fn test_mock_strategy_builds_offline() {
        let stages = MockStrategy::default().stages();
        assert!(stages.is_ok());
    }

    #[test]
    fn test_live_strategy_requires_judge_alias() {
        let registry = ProviderRegistry::from_providers(vec![(
            "primary".to_string(),
            Arc::new(NullProvider) as Arc<dyn LLMProvider>,
        )]);
        let strategy = LiveStrategy::new(Arc::new(registry), PipelineConfigSpec::default());
        let err = strategy.stages().err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("judge model alias 'judge'"));
    }

    #[test]
    fn test_live_strategy_with_judge_alias() {
        let registry = ProviderRegistry::from_providers(vec![
            ("judge".to_string(), Arc::new(NullProvider) as Arc<dyn LLMProvider>),
        ]);
        let strategy = LiveStrategy::new(Arc::new(registry), PipelineConfigSpec::default());
        assert!(strategy.stages().is_ok());
    }

    #[test]
    fn test_strategy_from_mock_config() {
        let mut manifest = PipelineConfigManifest::default();
        manifest.spec.strategy = StrategyKind::Mock;
        assert_eq!(strategy_from_config(&manifest).unwrap().name(), "mock");
    }
}
