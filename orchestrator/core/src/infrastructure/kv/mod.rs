// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Key-Value Store Implementations
//!
//! Infrastructure implementations of `domain::repository::KeyValueStore`.
//!
//! - **InMemoryKeyValueStore** - `parking_lot`-guarded maps, for tests and
//!   throwaway runs
//! - **SledKeyValueStore** - embedded on-disk store, the default backend

pub mod memory;
pub mod sled_store;

pub use memory::InMemoryKeyValueStore;
pub use sled_store::SledKeyValueStore;

use std::sync::Arc;

use crate::domain::pipeline_config::{PersistenceBackend, PersistenceConfig};
use crate::domain::repository::{KeyValueStore, RepositoryError};

/// Open the store selected by configuration.
pub fn open_store(config: &PersistenceConfig) -> Result<Arc<dyn KeyValueStore>, RepositoryError> {
    match config.backend {
        PersistenceBackend::Memory => Ok(Arc::new(InMemoryKeyValueStore::new())),
        PersistenceBackend::Sled => {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RepositoryError::Database(e.to_string()))?;
            }
            Ok(Arc::new(SledKeyValueStore::open(&config.path)?))
        }
    }
}
