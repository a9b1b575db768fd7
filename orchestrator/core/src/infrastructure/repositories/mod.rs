// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Primitive Store Implementations
//!
//! Infrastructure implementations of `domain::primitives::PrimitiveStore`.
//!
//! - **InMemoryPrimitiveStore** - `parking_lot`-guarded vector owned by the process
//! - **KvPrimitiveStore** - JSON map under the `primitives` key of any
//!   `KeyValueStore`, so weights survive restarts
//!
//! Both are last-writer-wins: two concurrent mutations of the same
//! primitive keep whichever wrote last.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::primitives::{is_known_primitive, PrimitiveStore, Primitives};
use crate::domain::repository::{KeyValueStore, RepositoryError, PRIMITIVES_KEY};

#[derive(Clone, Default)]
pub struct InMemoryPrimitiveStore {
    primitives: Arc<RwLock<Primitives>>,
}

impl InMemoryPrimitiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primitives(primitives: Primitives) -> Self {
        Self {
            primitives: Arc::new(RwLock::new(primitives)),
        }
    }
}

#[async_trait]
impl PrimitiveStore for InMemoryPrimitiveStore {
    async fn get(&self) -> Result<Primitives, RepositoryError> {
        Ok(self.primitives.read().clone())
    }

    async fn set(&self, name: &str, value: f64) -> Result<bool, RepositoryError> {
        Ok(self.primitives.write().set(name, value))
    }

    async fn reset(&self) -> Result<(), RepositoryError> {
        *self.primitives.write() = Primitives::defaults();
        Ok(())
    }
}

pub struct KvPrimitiveStore {
    store: Arc<dyn KeyValueStore>,
}

impl KvPrimitiveStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PrimitiveStore for KvPrimitiveStore {
    async fn get(&self) -> Result<Primitives, RepositoryError> {
        match self.store.get(PRIMITIVES_KEY).await? {
            Some(raw) => {
                let stored: BTreeMap<String, f64> = serde_json::from_str(&raw)?;
                Ok(Primitives::from_stored(stored))
            }
            None => Ok(Primitives::defaults()),
        }
    }

    async fn set(&self, name: &str, value: f64) -> Result<bool, RepositoryError> {
        if !is_known_primitive(name) {
            debug!(primitive = name, "Ignoring write to unknown primitive");
            return Ok(false);
        }
        let mut primitives = self.get().await?;
        primitives.set(name, value);
        self.store
            .set(PRIMITIVES_KEY, serde_json::to_string(primitives.as_map())?)
            .await?;
        Ok(true)
    }

    async fn reset(&self) -> Result<(), RepositoryError> {
        let defaults = Primitives::defaults();
        self.store
            .set(PRIMITIVES_KEY, serde_json::to_string(defaults.as_map())?)
            .await
    }
}
