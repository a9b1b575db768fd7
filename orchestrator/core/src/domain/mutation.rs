// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::primitives::{clamp_weight, Primitives};

/// Primitives scoring below this consensus value need improvement.
pub const NEEDS_IMPROVEMENT_THRESHOLD: f64 = 0.75;

/// Provenance of one weight change.
///
/// `new_value == clamp(old_value + delta, 0, 1)` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub primitive: String,
    pub old_value: f64,
    pub new_value: f64,
    pub delta: f64,
    pub severity: f64,
    pub reason: String,
    pub meta_learning_informed: bool,
}

/// Scored primitives below threshold that exist in `weights`, ascending by score.
pub fn needs_improvement(primitive_scores: &BTreeMap<String, f64>, weights: &Primitives) -> Vec<(String, f64)> {
    let mut out: Vec<(String, f64)> = primitive_scores
        .iter()
        .filter(|(name, score)| **score < NEEDS_IMPROVEMENT_THRESHOLD && weights.contains(name))
        .map(|(name, score)| (name.clone(), *score))
        .collect();
    out.sort_by(|a, b| a.1.total_cmp(&b.1));
    out
}

/// Plan the weight changes for every primitive needing improvement.
pub fn plan_mutations(
    primitive_scores: &BTreeMap<String, f64>,
    recommended_size: f64,
    weights: &Primitives,
    primary_complaint: Option<&str>,
    meta_learning_informed: bool,
) -> Vec<MutationRecord> {
    let complaint = primary_complaint.unwrap_or("Dissenting opinion");
    needs_improvement(primitive_scores, weights)
        .into_iter()
        .filter_map(|(name, score)| {
            let old_value = weights.get(&name)?;
            let new_value = clamp_weight(old_value + recommended_size);
            Some(MutationRecord {
                reason: format!("{} - Meta-learning recommended {:.3}", complaint, recommended_size),
                primitive: name,
                old_value,
                new_value,
                delta: recommended_size,
                severity: 1.0 - score,
                meta_learning_informed,
            })
        })
        .collect()
}
