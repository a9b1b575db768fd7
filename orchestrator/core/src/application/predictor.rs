// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::degradation::DegradedReason;
use crate::domain::llm::{extract_json, GenerationOptions, LLMError, LLMProvider};
use crate::domain::prediction::{QualityPrediction, QualityPredictor};
use crate::domain::primitives::Primitives;

/// Pre-generation quality forecast from a reasoning model.
pub struct LlmQualityPredictor {
    llm_provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LlmQualityPredictor {
    pub fn new(llm_provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { llm_provider, timeout }
    }

    fn build_prompt(topic: &str, weights: &Primitives) -> String {
        let weights_json = serde_json::to_string(weights.as_map()).unwrap_or_default();
        format!(
            r#"PREDICTIVE ENGINE: Forecast quality for topic "{topic}".
PRIMITIVES: {weights}

Analyze complexity and risk.
Return JSON:
{{
  "predicted_quality": 0.XX,
  "confidence": 0.XX,
  "risk_factors": [ {{ "primitive": "...", "risk_level": "low|medium|high", "reason": "..." }} ],
  "recommended_adjustments": [ {{ "primitive": "...", "current": 0.X, "recommended": 0.X, "expected_improvement": X.X }} ]
}}"#,
            topic = topic,
            weights = weights_json,
        )
    }

    pub fn parse_prediction(text: &str) -> Result<QualityPrediction, DegradedReason> {
        let json = extract_json(text).unwrap_or_else(|| text.to_string());
        let mut prediction: QualityPrediction =
            serde_json::from_str(&json).map_err(|e| DegradedReason::Parse(e.to_string()))?;
        prediction.degraded = false;
        prediction.validated()
    }
}

#[async_trait]
impl QualityPredictor for LlmQualityPredictor {
    async fn try_predict(&self, topic: &str, weights: &Primitives) -> Result<QualityPrediction, DegradedReason> {
        let options = GenerationOptions {
            temperature: Some(0.2),
            max_tokens: Some(600),
            json_response: true,
            ..Default::default()
        };
        let prompt = Self::build_prompt(topic, weights);

        let response = match tokio::time::timeout(self.timeout, self.llm_provider.generate(&prompt, &options)).await {
            Ok(result) => result?,
            Err(_) => return Err(DegradedReason::Timeout(self.timeout.as_millis() as u64)),
        };
        Self::parse_prediction(&response.text)
    }
}

/// Stands in when prediction is disabled or no model is available.
#[derive(Debug, Clone, Default)]
pub struct DefaultPredictor;

#[async_trait]
impl QualityPredictor for DefaultPredictor {
    async fn try_predict(&self, _topic: &str, _weights: &Primitives) -> Result<QualityPrediction, DegradedReason> {
        Err(DegradedReason::Provider(LLMError::ModelNotFound(
            "no predictor model configured".to_string(),
        )))
    }
}
