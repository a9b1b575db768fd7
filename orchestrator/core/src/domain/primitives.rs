// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Behavioral Primitives
//!
//! Named editorial weights in `[0, 1]` that steer generation and are the
//! target of mutation. The set of names is fixed: a primitive is never
//! created or deleted at runtime, only re-weighted.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Weight vector value object and its store contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::domain::repository::RepositoryError;

/// Default weight vector, in display order.
pub const PRIMITIVE_DEFAULTS: [(&str, f64); 14] = [
    ("fact_verification", 0.70),
    ("anti_hyperbole", 0.85),
    ("source_attribution", 0.84),
    ("temporal_accuracy", 0.70),
    ("entertainment_value", 0.80),
    ("brevity", 0.40),
    ("audience_targeting", 0.75),
    ("controversy_sensitivity", 0.90),
    ("statistical_depth", 0.65),
    ("local_context_awareness", 0.70),
    ("sponsor_compliance", 0.95),
    ("accessibility_optimization", 0.60),
    ("real_time_momentum", 0.80),
    ("player_privacy_protection", 0.85),
];

pub fn is_known_primitive(name: &str) -> bool {
    PRIMITIVE_DEFAULTS.iter().any(|(n, _)| *n == name)
}

/// Clamp a weight into `[0, 1]`. NaN collapses to 0.
pub fn clamp_weight(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Snapshot of the primitive weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Primitives(BTreeMap<String, f64>);

impl Primitives {
    pub fn defaults() -> Self {
        Self(
            PRIMITIVE_DEFAULTS
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        )
    }

    /// Build a vector from stored values, keeping only known names and
    /// filling missing ones from the defaults.
    pub fn from_stored(stored: BTreeMap<String, f64>) -> Self {
        let mut primitives = Self::defaults();
        for (name, value) in stored {
            primitives.set(&name, value);
        }
        primitives
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Clamped write. Returns `false` and leaves the vector untouched for
    /// unknown names.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match self.0.get_mut(name) {
            Some(slot) => {
                *slot = clamp_weight(value);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Short stable digest of the vector, used to correlate runs that
    /// generated under identical weights.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.0 {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(format!("{:.4}", value).as_bytes());
            hasher.update(b";");
        }
        let digest = hex::encode(hasher.finalize());
        digest[..12].to_string()
    }
}

impl Default for Primitives {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Process-wide primitive state.
///
/// Writers race under last-writer-wins; no versioning is applied.
#[async_trait]
pub trait PrimitiveStore: Send + Sync {
    /// Copy of the current vector.
    async fn get(&self) -> Result<Primitives, RepositoryError>;

    /// Clamped write of a single weight. Unknown names are a no-op and
    /// return `Ok(false)`.
    async fn set(&self, name: &str, value: f64) -> Result<bool, RepositoryError>;

    /// Restore the default vector.
    async fn reset(&self) -> Result<(), RepositoryError>;
}
