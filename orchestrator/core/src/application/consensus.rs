// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::judge::LlmJudge;
use crate::domain::llm::LLMProvider;
use crate::domain::primitives::Primitives;
use crate::domain::validation::{
    ConsensusResult, EvaluatorOpinion, Judge, JudgePersona, ScriptEvaluator, ValidationError,
};

/// Runs the three persona judges concurrently and folds their opinions.
///
/// A judge that errors or exceeds `judge_timeout` is replaced by a neutral
/// opinion (0.5, fail, zero confidence), so evaluation always completes.
pub struct ConsensusEvaluator {
    strict: Arc<dyn Judge>,
    balanced: Arc<dyn Judge>,
    lenient: Arc<dyn Judge>,
    judge_timeout: Duration,
}

impl ConsensusEvaluator {
    pub fn new(
        strict: Arc<dyn Judge>,
        balanced: Arc<dyn Judge>,
        lenient: Arc<dyn Judge>,
        judge_timeout: Duration,
    ) -> Self {
        Self {
            strict,
            balanced,
            lenient,
            judge_timeout,
        }
    }

    /// Three LLM judges sharing one provider.
    pub fn with_llm(provider: Arc<dyn LLMProvider>, judge_timeout: Duration) -> Self {
        let judge = |persona| Arc::new(LlmJudge::new(provider.clone(), persona)) as Arc<dyn Judge>;
        Self::new(
            judge(JudgePersona::Strict),
            judge(JudgePersona::Balanced),
            judge(JudgePersona::Lenient),
            judge_timeout,
        )
    }

    async fn run_judge(
        &self,
        judge: &Arc<dyn Judge>,
        persona: JudgePersona,
        script: &str,
        topic: &str,
        weights: &Primitives,
    ) -> EvaluatorOpinion {
        let timeout_ms = self.judge_timeout.as_millis() as u64;
        let outcome = match tokio::time::timeout(self.judge_timeout, judge.evaluate(script, topic, weights)).await {
            Ok(result) => result,
            Err(_) => Err(ValidationError::Timeout(timeout_ms)),
        };

        match outcome {
            Ok(mut opinion) => {
                // The slot defines the persona, whatever the judge reported.
                opinion.persona = persona;
                debug!(persona = %persona, score = opinion.score, vote = %opinion.vote, "Judge opinion received");
                opinion
            }
            Err(e) => {
                warn!(persona = %persona, error = %e, "Judge failed, substituting neutral opinion");
                metrics::counter!("gatecast_judge_fallbacks_total", "persona" => persona.as_str()).increment(1);
                EvaluatorOpinion::neutral(persona, e.to_string())
            }
        }
    }
}

#[async_trait]
impl ScriptEvaluator for ConsensusEvaluator {
    async fn evaluate(&self, script: &str, topic: &str, weights: &Primitives) -> ConsensusResult {
        let (strict, balanced, lenient) = tokio::join!(
            self.run_judge(&self.strict, JudgePersona::Strict, script, topic, weights),
            self.run_judge(&self.balanced, JudgePersona::Balanced, script, topic, weights),
            self.run_judge(&self.lenient, JudgePersona::Lenient, script, topic, weights),
        );

        let result = ConsensusResult::from_opinions(strict, balanced, lenient);
        info!(
            score = result.consensus_score,
            vote = %result.final_vote,
            strength = result.consensus_strength,
            degraded_judges = result.degraded_judges(),
            "Consensus reached"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::Vote;
    use std::collections::BTreeMap;

    struct FixedJudge {
        persona: JudgePersona,
        score: f64,
        vote: Vote,
    }

    #[async_trait]
    impl Judge for FixedJudge {
        fn persona(&self) -> JudgePersona {
            self.persona
        }

        async fn evaluate(&self, _: &str, _: &str, _: &Primitives) -> Result<EvaluatorOpinion, ValidationError> {
            Ok(EvaluatorOpinion {
                persona: self.persona,
                score: self.score,
                vote: self.vote,
                rationale: format!("{} rationale", self.persona),
                examples: vec![],
                primitive_scores: BTreeMap::from([("anti_hyperbole".to_string(), self.score)]),
                confidence: 0.9,
                degraded: false,
            })
        }
    }

    struct BrokenJudge;

    #[async_trait]
    impl Judge for BrokenJudge {
        fn persona(&self) -> JudgePersona {
            JudgePersona::Balanced
        }

        async fn evaluate(&self, _: &str, _: &str, _: &Primitives) -> Result<EvaluatorOpinion, ValidationError> {
            Err(ValidationError::Parse("not json".into()))
        }
    }

    struct SlowJudge;

    #[async_trait]
    impl Judge for SlowJudge {
        fn persona(&self) -> JudgePersona {
            JudgePersona::Lenient
        }

        async fn evaluate(&self, _: &str, _: &str, _: &Primitives) -> Result<EvaluatorOpinion, ValidationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ValidationError::Parse("unreachable".into()))
        }
    }

    fn fixed(persona: JudgePersona, score: f64, vote: Vote) -> Arc<dyn Judge> {
        Arc::new(FixedJudge { persona, score, vote })
    }

    #[tokio::test]
    async fn test_failed_judge_becomes_neutral() {
        let evaluator = ConsensusEvaluator::new(
            fixed(JudgePersona::Strict, 0.8, Vote::Pass),
            Arc::new(BrokenJudge),
            fixed(JudgePersona::Lenient, 0.9, Vote::Pass),
            Duration::from_secs(5),
        );
        let result = evaluator.evaluate("script", "topic", &Primitives::defaults()).await;

        assert!(result.balanced.degraded);
        assert_eq!(result.balanced.score, 0.5);
        assert_eq!(result.balanced.vote, Vote::Fail);
        assert_eq!(result.balanced.confidence, 0.0);
        assert_eq!(result.final_vote, Vote::Pass);
        assert!((result.consensus_score - (0.24 + 0.2 + 0.27)).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_judge_times_out() {
        let evaluator = ConsensusEvaluator::new(
            fixed(JudgePersona::Strict, 0.3, Vote::Fail),
            fixed(JudgePersona::Balanced, 0.4, Vote::Fail),
            Arc::new(SlowJudge),
            Duration::from_millis(30_000),
        );
        let result = evaluator.evaluate("script", "topic", &Primitives::defaults()).await;

        assert!(result.lenient.degraded);
        assert!(result.lenient.rationale.contains("timed out after 30000ms"));
        assert_eq!(result.final_vote, Vote::Fail);
        assert_eq!(result.primary_complaint.as_deref(), Some("strict rationale"));
    }
}
