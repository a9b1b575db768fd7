// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::degradation::DegradedReason;
use crate::domain::primitives::{clamp_weight, Primitives};

/// Predicted quality at or above this is expected to pass the gate.
pub const PREDICTED_PASS_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub primitive: String,
    pub risk_level: RiskLevel,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAdjustment {
    pub primitive: String,
    pub current: f64,
    pub recommended: f64,
    pub expected_improvement: f64,
}

/// Pre-generation quality forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityPrediction {
    pub predicted_quality: f64,
    pub confidence: f64,
    #[serde(default)]
    pub risk_factors: Vec<RiskFactor>,
    #[serde(default)]
    pub recommended_adjustments: Vec<RecommendedAdjustment>,
    #[serde(default)]
    pub degraded: bool,
}

impl QualityPrediction {
    pub fn fallback() -> Self {
        Self {
            predicted_quality: 0.75,
            confidence: 0.5,
            risk_factors: Vec::new(),
            recommended_adjustments: Vec::new(),
            degraded: true,
        }
    }

    pub fn predicted_pass(&self) -> bool {
        self.predicted_quality >= PREDICTED_PASS_THRESHOLD
    }

    pub fn validated(mut self) -> Result<Self, DegradedReason> {
        if !self.predicted_quality.is_finite() || !(0.0..=1.0).contains(&self.predicted_quality) {
            return Err(DegradedReason::Schema(format!(
                "predicted_quality {} outside [0, 1]",
                self.predicted_quality
            )));
        }
        self.confidence = clamp_weight(self.confidence);
        Ok(self)
    }
}

/// Forecasts script quality before generation. Telemetry only: the
/// pipeline never branches on the forecast.
#[async_trait]
pub trait QualityPredictor: Send + Sync {
    async fn try_predict(&self, topic: &str, weights: &Primitives) -> Result<QualityPrediction, DegradedReason>;

    async fn predict(&self, topic: &str, weights: &Primitives) -> QualityPrediction {
        match self.try_predict(topic, weights).await {
            Ok(prediction) => prediction,
            Err(reason) => {
                tracing::warn!(reason = %reason, "Quality prediction degraded, using default forecast");
                QualityPrediction::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_prediction_passes_threshold() {
        let p = QualityPrediction::fallback();
        assert_eq!(p.predicted_quality, 0.75);
        assert_eq!(p.confidence, 0.5);
        assert!(p.predicted_pass());
        assert!(p.degraded);
    }

    #[test]
    fn test_prediction_schema_parse() {
        let raw = r#"{
            "predicted_quality": 0.62,
            "confidence": 0.8,
            "risk_factors": [{"primitive": "anti_hyperbole", "risk_level": "high", "reason": "sports hype"}],
            "recommended_adjustments": [{"primitive": "anti_hyperbole", "current": 0.85, "recommended": 0.95, "expected_improvement": 8.0}]
        }"#;
        let p: QualityPrediction = serde_json::from_str(raw).unwrap();
        let p = p.validated().unwrap();
        assert!(!p.predicted_pass());
        assert_eq!(p.risk_factors[0].risk_level, RiskLevel::High);
        assert!(!p.degraded);
    }

    #[test]
    fn test_prediction_rejects_out_of_range() {
        let p = QualityPrediction {
            predicted_quality: 75.0,
            ..QualityPrediction::fallback()
        };
        assert!(p.validated().is_err());
    }
}
