// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::llm::{extract_json, GenerationOptions, LLMProvider};
use crate::domain::primitives::{clamp_weight, Primitives};
use crate::domain::validation::{EvaluatorOpinion, Judge, JudgePersona, ValidationError, Vote};

/// Wire shape every persona is asked to return. The rationale arrives under
/// a persona-specific key; models sometimes send more than one of them.
#[derive(Debug, Deserialize)]
struct JudgeResponse {
    score: f64,
    vote: String,
    #[serde(default)]
    complaint: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    praise: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    primitive_scores: BTreeMap<String, f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl JudgeResponse {
    /// The persona's own field first, then any other rationale key.
    fn take_rationale(&mut self, persona: JudgePersona) -> String {
        let own = match persona {
            JudgePersona::Strict => self.complaint.take(),
            JudgePersona::Balanced => self.reasoning.take(),
            JudgePersona::Lenient => self.praise.take(),
        };
        own.or_else(|| self.rationale.take())
            .or_else(|| self.complaint.take())
            .or_else(|| self.reasoning.take())
            .or_else(|| self.praise.take())
            .unwrap_or_default()
    }
}

fn parse_vote(raw: &str) -> Result<Vote, ValidationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pass" => Ok(Vote::Pass),
        "fail" => Ok(Vote::Fail),
        other => Err(ValidationError::Schema(format!("unknown vote '{}'", other))),
    }
}

/// LLM-backed judge speaking as one persona
pub struct LlmJudge {
    llm_provider: Arc<dyn LLMProvider>,
    persona: JudgePersona,
    max_tokens: u32,
}

impl LlmJudge {
    pub fn new(llm_provider: Arc<dyn LLMProvider>, persona: JudgePersona) -> Self {
        Self {
            llm_provider,
            persona,
            max_tokens: 600,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// System instruction for the persona
    pub fn system_instruction(persona: JudgePersona) -> String {
        let voice = match persona {
            JudgePersona::Strict => {
                "You are the STRICT CRITIC - a cynical, pedantic broadcast editor who hates hype.\nFind every flaw. Be harsh."
            }
            JudgePersona::Balanced => {
                "You are the BALANCED JUDGE - fair, neutral, and objective.\nProvide a balanced assessment."
            }
            JudgePersona::Lenient => {
                "You are the OPTIMISTIC REVIEWER - an enthusiastic listener.\nLook for what works. Be generous."
            }
        };
        let examples = if persona == JudgePersona::Strict {
            "\n  \"examples\": [\"...\"],"
        } else {
            ""
        };

        format!(
            r#"{voice}
Return JSON only:
{{
  "score": 0.XX,
  "vote": "pass" | "fail",
  "{field}": "...",{examples}
  "primitive_scores": {{
     "fact_verification": 0.X,
     "anti_hyperbole": 0.X,
     "source_attribution": 0.X,
     "temporal_accuracy": 0.X,
     "entertainment_value": 0.X,
     "brevity": 0.X
  }}
}}"#,
            voice = voice,
            field = persona.rationale_field(),
            examples = examples,
        )
    }

    fn build_prompt(script: &str, topic: &str, weights: &Primitives) -> String {
        let weights_json = serde_json::to_string(weights.as_map()).unwrap_or_default();
        format!(
            "Evaluate: \"{}\" for Topic: \"{}\". Primitives: {}",
            script, topic, weights_json
        )
    }

    /// Parse and validate a raw judge reply into an opinion.
    pub fn parse_opinion(persona: JudgePersona, text: &str) -> Result<EvaluatorOpinion, ValidationError> {
        let json = extract_json(text).unwrap_or_else(|| text.to_string());
        let mut parsed: JudgeResponse = serde_json::from_str(&json)
            .map_err(|e| ValidationError::Parse(format!("{}: {}", e, truncate(text, 200))))?;

        if !parsed.score.is_finite() || !(0.0..=1.0).contains(&parsed.score) {
            return Err(ValidationError::Schema(format!(
                "score {} outside [0, 1]",
                parsed.score
            )));
        }

        let vote = parse_vote(&parsed.vote)?;
        let rationale = parsed.take_rationale(persona);

        let primitive_scores = parsed
            .primitive_scores
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k, clamp_weight(v)))
            .collect();

        Ok(EvaluatorOpinion {
            persona,
            score: parsed.score,
            vote,
            rationale,
            examples: parsed.examples,
            primitive_scores,
            confidence: clamp_weight(parsed.confidence.unwrap_or(1.0)),
            degraded: false,
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn persona(&self) -> JudgePersona {
        self.persona
    }

    async fn evaluate(
        &self,
        script: &str,
        topic: &str,
        weights: &Primitives,
    ) -> Result<EvaluatorOpinion, ValidationError> {
        let options = GenerationOptions {
            temperature: Some(self.persona.temperature()),
            max_tokens: Some(self.max_tokens),
            system: Some(Self::system_instruction(self.persona)),
            json_response: true,
            ..Default::default()
        };

        let prompt = Self::build_prompt(script, topic, weights);
        let response = self.llm_provider.generate(&prompt, &options).await?;

        Self::parse_opinion(self.persona, &response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strict_opinion() {
        let raw = r#"{"score": 0.35, "vote": "fail", "complaint": "Too much hype", "examples": ["insane"], "primitive_scores": {"anti_hyperbole": 0.2}}"#;
        let o = LlmJudge::parse_opinion(JudgePersona::Strict, raw).unwrap();
        assert_eq!(o.vote, Vote::Fail);
        assert_eq!(o.rationale, "Too much hype");
        assert_eq!(o.examples, vec!["insane".to_string()]);
        assert_eq!(o.primitive_scores["anti_hyperbole"], 0.2);
        assert_eq!(o.confidence, 1.0);
        assert!(!o.degraded);
    }

    #[test]
    fn test_parse_fenced_lenient_opinion() {
        let raw = "```json\n{\"score\": 0.9, \"vote\": \"pass\", \"praise\": \"Lively\", \"primitive_scores\": {\"brevity\": 1.4}}\n```";
        let o = LlmJudge::parse_opinion(JudgePersona::Lenient, raw).unwrap();
        assert_eq!(o.rationale, "Lively");
        assert_eq!(o.primitive_scores["brevity"], 1.0);
    }

    #[test]
    fn test_parse_rejects_out_of_range_score() {
        let raw = r#"{"score": 7, "vote": "pass", "reasoning": "ok"}"#;
        let err = LlmJudge::parse_opinion(JudgePersona::Balanced, raw).unwrap_err();
        assert!(matches!(err, ValidationError::Schema(_)));
    }

    #[test]
    fn test_parse_keeps_own_field_when_several_are_sent() {
        let raw = r#"{"score": 0.7, "vote": "pass", "complaint": "Minor hype", "reasoning": "Solid sourcing", "praise": "Good pace"}"#;
        let o = LlmJudge::parse_opinion(JudgePersona::Balanced, raw).unwrap();
        assert_eq!(o.rationale, "Solid sourcing");
        assert_eq!(o.score, 0.7);

        let o = LlmJudge::parse_opinion(JudgePersona::Strict, raw).unwrap();
        assert_eq!(o.rationale, "Minor hype");

        let raw = r#"{"score": 0.8, "vote": "pass", "reasoning": "Fine"}"#;
        let o = LlmJudge::parse_opinion(JudgePersona::Lenient, raw).unwrap();
        assert_eq!(o.rationale, "Fine");
    }

    #[test]
    fn test_parse_vote_ignores_case() {
        let raw = r#"{"score": 0.8, "vote": "Pass", "praise": "Nice"}"#;
        assert_eq!(LlmJudge::parse_opinion(JudgePersona::Lenient, raw).unwrap().vote, Vote::Pass);

        let raw = r#"{"score": 0.3, "vote": " FAIL ", "complaint": "Vague"}"#;
        assert_eq!(LlmJudge::parse_opinion(JudgePersona::Strict, raw).unwrap().vote, Vote::Fail);

        let raw = r#"{"score": 0.3, "vote": "maybe", "complaint": "Vague"}"#;
        let err = LlmJudge::parse_opinion(JudgePersona::Strict, raw).unwrap_err();
        assert!(matches!(err, ValidationError::Schema(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = LlmJudge::parse_opinion(JudgePersona::Balanced, "I liked it").unwrap_err();
        assert!(matches!(err, ValidationError::Parse(_)));
    }

    #[test]
    fn test_system_instruction_names_persona_field() {
        assert!(LlmJudge::system_instruction(JudgePersona::Strict).contains("\"complaint\""));
        assert!(LlmJudge::system_instruction(JudgePersona::Balanced).contains("\"reasoning\""));
        assert!(LlmJudge::system_instruction(JudgePersona::Lenient).contains("\"praise\""));
    }
}
