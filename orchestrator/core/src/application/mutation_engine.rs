// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::domain::mutation::{plan_mutations, MutationRecord};
use crate::domain::primitives::{PrimitiveStore, Primitives};
use crate::domain::repository::RepositoryError;

/// A store write failed after `applied` had already been written.
#[derive(Debug, Error)]
#[error("mutation stopped after {} of {planned} writes: {source}", .applied.len())]
pub struct PartialMutation {
    pub applied: Vec<MutationRecord>,
    pub planned: usize,
    pub source: RepositoryError,
}

/// Applies planned weight changes to the primitive store.
pub struct MutationEngine {
    store: Arc<dyn PrimitiveStore>,
}

impl MutationEngine {
    pub fn new(store: Arc<dyn PrimitiveStore>) -> Self {
        Self { store }
    }

    /// Move every primitive scored below threshold by `recommended_size`.
    ///
    /// `weights` is the snapshot the script was generated with; each record's
    /// `old_value` comes from it. Returns an empty list when nothing needs
    /// improvement. Stops at the first failed write and hands back the
    /// records that already reached the store.
    pub async fn apply(
        &self,
        primitive_scores: &BTreeMap<String, f64>,
        recommended_size: f64,
        weights: &Primitives,
        primary_complaint: Option<&str>,
        meta_learning_informed: bool,
    ) -> Result<Vec<MutationRecord>, PartialMutation> {
        let planned = plan_mutations(
            primitive_scores,
            recommended_size,
            weights,
            primary_complaint,
            meta_learning_informed,
        );

        let total = planned.len();
        let mut applied = Vec::with_capacity(total);
        for record in planned {
            match self.store.set(&record.primitive, record.new_value).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(source) => {
                    error!(
                        primitive = %record.primitive,
                        applied = applied.len(),
                        error = %source,
                        "Primitive write failed, stopping mutation"
                    );
                    return Err(PartialMutation {
                        applied,
                        planned: total,
                        source,
                    });
                }
            }
            info!(
                primitive = %record.primitive,
                old = record.old_value,
                new = record.new_value,
                "Primitive mutated"
            );
            metrics::counter!("gatecast_mutations_total", "primitive" => record.primitive.clone()).increment(1);
            applied.push(record);
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryPrimitiveStore;

    #[tokio::test]
    async fn test_apply_writes_back_to_store() {
        let store = Arc::new(InMemoryPrimitiveStore::new());
        let engine = MutationEngine::new(store.clone());
        let weights = store.get().await.unwrap();

        let scores = BTreeMap::from([
            ("fact_verification".to_string(), 0.5),
            ("brevity".to_string(), 0.95),
            ("unknown_metric".to_string(), 0.1),
        ]);
        let records = engine
            .apply(&scores, 0.15, &weights, Some("Unverified claim"), true)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].primitive, "fact_verification");
        let after = store.get().await.unwrap();
        assert!((after.get("fact_verification").unwrap() - 0.85).abs() < 1e-9);
        assert_eq!(after.get("brevity"), weights.get("brevity"));
    }

    /// Fails every write after the first `ok_writes`.
    struct FlakyStore {
        inner: InMemoryPrimitiveStore,
        ok_writes: usize,
        writes: parking_lot::Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl PrimitiveStore for FlakyStore {
        async fn get(&self) -> Result<Primitives, RepositoryError> {
            self.inner.get().await
        }

        async fn set(&self, name: &str, value: f64) -> Result<bool, RepositoryError> {
            let write = {
                let mut writes = self.writes.lock();
                *writes += 1;
                *writes
            };
            if write > self.ok_writes {
                return Err(RepositoryError::Database("write lost".into()));
            }
            self.inner.set(name, value).await
        }

        async fn reset(&self) -> Result<(), RepositoryError> {
            self.inner.reset().await
        }
    }

    #[tokio::test]
    async fn test_failed_write_returns_applied_records() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryPrimitiveStore::new(),
            ok_writes: 1,
            writes: parking_lot::Mutex::new(0),
        });
        let engine = MutationEngine::new(store.clone());
        let weights = store.get().await.unwrap();
        let scores = BTreeMap::from([
            ("anti_hyperbole".to_string(), 0.2),
            ("brevity".to_string(), 0.3),
        ]);

        let partial = engine
            .apply(&scores, 0.2, &weights, Some("Too much hype"), true)
            .await
            .unwrap_err();

        assert_eq!(partial.planned, 2);
        assert_eq!(partial.applied.len(), 1);
        assert_eq!(partial.applied[0].primitive, "anti_hyperbole");
        let after = store.get().await.unwrap();
        assert_eq!(after.get("anti_hyperbole"), Some(partial.applied[0].new_value));
        assert_eq!(after.get("brevity"), weights.get("brevity"));
        assert!(partial.to_string().contains("1 of 2 writes"));
    }

    #[tokio::test]
    async fn test_apply_with_nothing_to_improve() {
        let store = Arc::new(InMemoryPrimitiveStore::new());
        let engine = MutationEngine::new(store.clone());
        let weights = store.get().await.unwrap();
        let scores = BTreeMap::from([("brevity".to_string(), 0.9)]);

        let records = engine.apply(&scores, 0.1, &weights, None, false).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(store.get().await.unwrap(), weights);
    }
}
