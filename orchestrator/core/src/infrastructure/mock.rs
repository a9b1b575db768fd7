// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deterministic Pipeline Collaborators
//!
//! Offline stand-ins for the writer, the judges and the predictor, used by
//! the `mock` strategy and by tests. They are keyword driven and react to
//! the primitive weights, so a mutation on one run visibly changes the
//! output of the next.
//!
//! | Topic contains | Draft problem | Gated by |
//! |----------------|---------------|----------|
//! | `insane`, `hyperbole` | hype language | `anti_hyperbole >= 0.93` |
//! | `vague`, `reports` | unnamed sources, vague timing | `source_attribution >= 0.92` |
//! | `lebron`, `nfl` | fabricated sports claim | `fact_verification >= 0.78` |
//! | anything else | none | - |
//!
//! Raw mode ignores the gates: without constraints the writer always
//! produces the problem draft.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::domain::degradation::DegradedReason;
use crate::domain::generation::{
    build_prompt, estimate_tokens, prompt_hash, GenerationMode, GenerationResult, ScriptGenerator,
};
use crate::domain::prediction::{
    QualityPrediction, QualityPredictor, RecommendedAdjustment, RiskFactor, RiskLevel,
};
use crate::domain::primitives::Primitives;
use crate::domain::validation::{EvaluatorOpinion, Judge, JudgePersona, ValidationError, Vote};

pub const MOCK_WRITER_MODEL: &str = "mock-writer";

const HYPE_WORDS: [&str; 9] = [
    "won't believe",
    "crushed",
    "insane",
    "mind-blowing",
    "human history",
    "revolution",
    "stunning",
    "game-changer",
    "unbelievable",
];
const NAMED_SOURCE_MARKERS: [&str; 3] = ["according to", "said", "statement"];
const VAGUE_SOURCE_MARKERS: [&str; 3] = ["some people", "experts think", "reportedly"];
const DATE_MARKERS: [&str; 14] = [
    "january", "february", "march", "april", "may ", "june", "july", "august", "september",
    "october", "november", "december", "monday", "friday",
];
const VAGUE_TIME_MARKERS: [&str; 4] = ["recently", "soon", "last night", "lately"];

/// Failure pattern a mock topic exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockScenario {
    Hyperbole,
    VagueSourcing,
    FactMismatch,
    Clean,
}

impl MockScenario {
    pub fn from_topic(topic: &str) -> Self {
        let lower = topic.to_lowercase();
        if lower.contains("hyperbole") || lower.contains("insane") {
            MockScenario::Hyperbole
        } else if lower.contains("vague") || lower.contains("reports") {
            MockScenario::VagueSourcing
        } else if lower.contains("lebron") || lower.contains("nfl") {
            MockScenario::FactMismatch
        } else {
            MockScenario::Clean
        }
    }

    /// Primitive and weight at which the writer stops making the mistake.
    pub fn gate(&self) -> Option<(&'static str, f64)> {
        match self {
            MockScenario::Hyperbole => Some(("anti_hyperbole", 0.93)),
            MockScenario::VagueSourcing => Some(("source_attribution", 0.92)),
            MockScenario::FactMismatch => Some(("fact_verification", 0.78)),
            MockScenario::Clean => None,
        }
    }

    fn is_corrected(&self, weights: &Primitives, mode: GenerationMode) -> bool {
        match self.gate() {
            None => true,
            Some(_) if mode == GenerationMode::Raw => false,
            Some((primitive, threshold)) => weights.get(primitive).unwrap_or(0.0) >= threshold,
        }
    }

    fn draft(&self, corrected: bool) -> &'static str {
        match (self, corrected) {
            (MockScenario::Hyperbole, false) => {
                "YO! You won't BELIEVE this! The lab just CRUSHED every expectation! This is the most INSANE, \
                 mind-blowing tech in HUMAN HISTORY! Don't miss out on this REVOLUTION!"
            }
            (MockScenario::VagueSourcing, false) => {
                "Some people are saying sales were down this quarter. Experts think this might be because of \
                 things, but it's hard to tell for sure, and more could come soon."
            }
            (MockScenario::FactMismatch, false) => {
                "In a stunning crossover, LeBron James led the Dallas Cowboys to a Super Bowl victory last night, \
                 scoring three touchdowns in the final quarter."
            }
            (MockScenario::Hyperbole, true) => {
                "Researchers reported a measured advance in qubit stability on March 4, according to a statement \
                 from the lab. Analysts said the result is a notable but incremental step, and independent \
                 replication is still pending."
            }
            (MockScenario::VagueSourcing, true) => {
                "According to the third-quarter report from Vanguard Analytics published on October 14, enterprise \
                 software sales decreased by 4.2 percent. Senior analyst Sarah Jenkins said longer procurement \
                 cycles in the public sector drove most of the dip."
            }
            (MockScenario::FactMismatch, true) => {
                "LeBron James continues to lead the Los Angeles Lakers this season, according to team statistics \
                 released on January 12. Separately, the Dallas Cowboys are preparing for their divisional playoff \
                 game."
            }
            (MockScenario::Clean, _) => {
                "The company confirmed the update in a statement on Monday. According to the announcement, the \
                 rollout begins next quarter, and analysts said pricing details will follow with the launch."
            }
        }
    }
}

/// Writer that never touches the network.
#[derive(Debug, Clone, Default)]
pub struct MockScriptGenerator;

impl MockScriptGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScriptGenerator for MockScriptGenerator {
    async fn generate(&self, topic: &str, weights: &Primitives, mode: GenerationMode) -> GenerationResult {
        let scenario = MockScenario::from_topic(topic);
        let text = scenario.draft(scenario.is_corrected(weights, mode)).to_string();
        let prompt = build_prompt(topic, weights, mode);
        GenerationResult {
            tokens_out_est: estimate_tokens(&text),
            text,
            model_requested: MOCK_WRITER_MODEL.to_string(),
            model_used: MOCK_WRITER_MODEL.to_string(),
            used_fallback: false,
            failure_chain: Vec::new(),
            latency_ms: 0,
            status_code: Some(200),
            prompt_hash: prompt_hash(&prompt),
            prompt_chars: prompt.chars().count(),
        }
    }
}

/// Keyword-scoring judge. Every persona sees the same primitive scores and
/// shifts the overall score by its bias.
#[derive(Debug, Clone)]
pub struct MockJudge {
    persona: JudgePersona,
}

impl MockJudge {
    pub fn new(persona: JudgePersona) -> Self {
        Self { persona }
    }

    fn bias(&self) -> f64 {
        match self.persona {
            JudgePersona::Strict => -0.1,
            JudgePersona::Balanced => 0.0,
            JudgePersona::Lenient => 0.1,
        }
    }

    fn pass_threshold(&self) -> f64 {
        match self.persona {
            JudgePersona::Strict => 0.72,
            JudgePersona::Balanced => 0.70,
            JudgePersona::Lenient => 0.60,
        }
    }

    /// Score the writer's own words; the topic text is removed first.
    pub fn score_primitives(script: &str, topic: &str) -> (BTreeMap<String, f64>, Vec<String>) {
        let mut text = script.to_lowercase();
        let topic = topic.trim().to_lowercase();
        if !topic.is_empty() {
            text = text.replace(&topic, " ");
        }

        let hype: Vec<String> = HYPE_WORDS
            .iter()
            .filter(|w| text.contains(*w))
            .map(|w| format!("\"{}\"", w))
            .collect();
        let anti_hyperbole = (1.0 - 0.3 * hype.len() as f64).max(0.0);

        let source_attribution = if VAGUE_SOURCE_MARKERS.iter().any(|m| text.contains(m)) {
            0.4
        } else if NAMED_SOURCE_MARKERS.iter().any(|m| text.contains(m)) {
            0.9
        } else {
            0.8
        };

        let temporal_accuracy = if VAGUE_TIME_MARKERS.iter().any(|m| text.contains(m)) {
            0.5
        } else if DATE_MARKERS.iter().any(|m| text.contains(m)) {
            0.9
        } else {
            0.8
        };

        let fabricated = text.contains("lebron") && (text.contains("touchdown") || text.contains("super bowl"));
        let fact_verification = if fabricated { 0.1 } else { 0.85 };

        let brevity = if text.split_whitespace().count() <= 150 { 0.9 } else { 0.5 };

        let scores = [
            ("anti_hyperbole", anti_hyperbole),
            ("source_attribution", source_attribution),
            ("temporal_accuracy", temporal_accuracy),
            ("fact_verification", fact_verification),
            ("entertainment_value", 0.8),
            ("brevity", brevity),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        (scores, hype)
    }

    fn rationale(&self, scores: &BTreeMap<String, f64>, vote: Vote) -> String {
        let weakest = scores.iter().min_by(|a, b| a.1.total_cmp(b.1));
        match (self.persona, weakest) {
            (JudgePersona::Strict, Some((name, score))) if vote == Vote::Fail => {
                format!("Weak {} ({:.2}); not broadcast ready", name, score)
            }
            (JudgePersona::Strict, _) => "Meets editorial standards".to_string(),
            (JudgePersona::Balanced, Some((name, score))) => {
                format!("Solid overall; weakest area is {} at {:.2}", name, score)
            }
            (JudgePersona::Balanced, None) => "Nothing to assess".to_string(),
            (JudgePersona::Lenient, _) => "Clear and easy to follow on air".to_string(),
        }
    }
}

#[async_trait]
impl Judge for MockJudge {
    fn persona(&self) -> JudgePersona {
        self.persona
    }

    async fn evaluate(
        &self,
        script: &str,
        topic: &str,
        _weights: &Primitives,
    ) -> Result<EvaluatorOpinion, ValidationError> {
        let (primitive_scores, hype) = Self::score_primitives(script, topic);
        let mean = primitive_scores.values().sum::<f64>() / primitive_scores.len() as f64;
        let score = (mean + self.bias()).clamp(0.0, 1.0);
        let vote = if score >= self.pass_threshold() {
            Vote::Pass
        } else {
            Vote::Fail
        };

        Ok(EvaluatorOpinion {
            persona: self.persona,
            score,
            vote,
            rationale: self.rationale(&primitive_scores, vote),
            examples: if self.persona == JudgePersona::Strict { hype } else { Vec::new() },
            primitive_scores,
            confidence: 0.9,
            degraded: false,
        })
    }
}

/// Forecast from topic keywords and the current gate weight.
#[derive(Debug, Clone, Default)]
pub struct MockQualityPredictor;

impl MockQualityPredictor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QualityPredictor for MockQualityPredictor {
    async fn try_predict(&self, topic: &str, weights: &Primitives) -> Result<QualityPrediction, DegradedReason> {
        let scenario = MockScenario::from_topic(topic);
        let Some((primitive, threshold)) = scenario.gate() else {
            return Ok(QualityPrediction {
                predicted_quality: 0.85,
                confidence: 0.8,
                risk_factors: Vec::new(),
                recommended_adjustments: Vec::new(),
                degraded: false,
            });
        };

        let current = weights.get(primitive).unwrap_or(0.0);
        if current >= threshold {
            return Ok(QualityPrediction {
                predicted_quality: 0.82,
                confidence: 0.75,
                risk_factors: Vec::new(),
                recommended_adjustments: Vec::new(),
                degraded: false,
            });
        }

        let (predicted_quality, reason) = match scenario {
            MockScenario::Hyperbole => (0.45, "Extreme marketing language likely"),
            MockScenario::VagueSourcing => (0.55, "Vague attribution likely"),
            _ => (0.30, "High-risk entities and claims in topic"),
        };
        Ok(QualityPrediction {
            predicted_quality,
            confidence: 0.9,
            risk_factors: vec![RiskFactor {
                primitive: primitive.to_string(),
                risk_level: RiskLevel::High,
                reason: reason.to_string(),
            }],
            recommended_adjustments: vec![RecommendedAdjustment {
                primitive: primitive.to_string(),
                current,
                recommended: threshold,
                expected_improvement: ((threshold - current) * 100.0).round(),
            }],
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn judge_all(script: &str, topic: &str) -> Vec<EvaluatorOpinion> {
        let mut out = Vec::new();
        for persona in JudgePersona::ALL {
            out.push(
                MockJudge::new(persona)
                    .evaluate(script, topic, &Primitives::defaults())
                    .await
                    .unwrap(),
            );
        }
        out
    }

    #[test]
    fn test_scenario_from_topic() {
        assert_eq!(MockScenario::from_topic("An INSANE quantum leap"), MockScenario::Hyperbole);
        assert_eq!(MockScenario::from_topic("Vague retail numbers"), MockScenario::VagueSourcing);
        assert_eq!(MockScenario::from_topic("NFL trade deadline news"), MockScenario::FactMismatch);
        assert_eq!(MockScenario::from_topic("Chip export rules tighten"), MockScenario::Clean);
    }

    #[tokio::test]
    async fn test_generator_respects_gate_weight() {
        let generator = MockScriptGenerator::new();
        let topic = "Insane quantum breakthrough";
        let mut weights = Primitives::defaults();

        let draft = generator.generate(topic, &weights, GenerationMode::Optimized).await;
        assert!(draft.text.contains("INSANE"));
        assert_eq!(draft.prompt_hash.len(), 12);

        weights.set("anti_hyperbole", 0.96);
        let fixed = generator.generate(topic, &weights, GenerationMode::Optimized).await;
        assert!(!fixed.text.contains("INSANE"));

        let raw = generator.generate(topic, &weights, GenerationMode::Raw).await;
        assert!(raw.text.contains("INSANE"));
    }

    #[tokio::test]
    async fn test_hype_draft_fails_consensus() {
        let script = MockScenario::Hyperbole.draft(false);
        let opinions = judge_all(script, "Insane quantum breakthrough").await;
        assert_eq!(opinions[0].vote, Vote::Fail);
        assert_eq!(opinions[1].vote, Vote::Fail);
        assert_eq!(opinions[2].vote, Vote::Pass);
        assert_eq!(opinions[0].primitive_scores["anti_hyperbole"], 0.0);
        assert!(!opinions[0].examples.is_empty());
    }

    #[tokio::test]
    async fn test_corrected_drafts_pass_unanimously() {
        for scenario in [
            MockScenario::Hyperbole,
            MockScenario::VagueSourcing,
            MockScenario::FactMismatch,
            MockScenario::Clean,
        ] {
            let opinions = judge_all(scenario.draft(true), "Some topic").await;
            assert!(
                opinions.iter().all(|o| o.vote == Vote::Pass),
                "{:?} corrected draft should pass",
                scenario
            );
        }
    }

    #[tokio::test]
    async fn test_vague_draft_passes_with_dissent() {
        let opinions = judge_all(MockScenario::VagueSourcing.draft(false), "Vague retail numbers").await;
        assert_eq!(opinions[0].vote, Vote::Fail);
        assert_eq!(opinions[1].vote, Vote::Pass);
        assert_eq!(opinions[2].vote, Vote::Pass);
    }

    #[test]
    fn test_topic_words_are_not_scored() {
        let (scores, hype) = MockJudge::score_primitives("Insane quantum breakthrough: more at noon.", "Insane quantum breakthrough");
        assert!(hype.is_empty());
        assert_eq!(scores["anti_hyperbole"], 1.0);
    }

    #[tokio::test]
    async fn test_predictor_flags_risky_topics() {
        let predictor = MockQualityPredictor::new();
        let risky = predictor.predict("LeBron joins the NFL", &Primitives::defaults()).await;
        assert!(!risky.predicted_pass());
        assert_eq!(risky.risk_factors[0].primitive, "fact_verification");

        let calm = predictor.predict("Chip export rules tighten", &Primitives::defaults()).await;
        assert!(calm.predicted_pass());
    }
}
