// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Persistence Interfaces
//!
//! Storage contracts used by the pipeline. The interface is defined in the
//! domain layer and implemented in `crate::infrastructure::kv`.
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|----------------|
//! | `KeyValueStore` | lists, strings and counters | `InMemoryKeyValueStore`, `SledKeyValueStore` |
//! | `PrimitiveStore` | primitive weight vector | `InMemoryPrimitiveStore`, `KvPrimitiveStore` |
//!
//! ## Key Layout
//!
//! | Key | Shape | Bound |
//! |-----|-------|-------|
//! | `run_contexts` | list of JSON `RunContext`, newest first | 100 |
//! | `episode_history` | list of JSON `EpisodeHistoryEntry`, newest first | 50 |
//! | `total_episodes` | counter | - |
//! | `total_mutations` | counter | - |
//! | `meta:correlations` | JSON `CorrelationSummary` | - |
//! | `primitives` | JSON primitive map | - |
//!
//! List indexes follow Redis `LRANGE`/`LTRIM` semantics: inclusive bounds,
//! negative indexes count from the tail.

use async_trait::async_trait;

pub const RUN_CONTEXTS_KEY: &str = "run_contexts";
pub const EPISODE_HISTORY_KEY: &str = "episode_history";
pub const TOTAL_EPISODES_KEY: &str = "total_episodes";
pub const TOTAL_MUTATIONS_KEY: &str = "total_mutations";
pub const CORRELATIONS_KEY: &str = "meta:correlations";
pub const PRIMITIVES_KEY: &str = "primitives";

pub const MAX_RUN_CONTEXTS: usize = 100;
pub const MAX_EPISODE_HISTORY: usize = 50;

/// Minimal list/string/counter store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Prepend `value` to the list at `key`, returning the new length.
    async fn push(&self, key: &str, value: String) -> Result<usize, RepositoryError>;

    /// Keep only the elements in `start..=stop`.
    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), RepositoryError>;

    /// Elements in `start..=stop`. Missing keys yield an empty list.
    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RepositoryError>;

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;

    async fn set(&self, key: &str, value: String) -> Result<(), RepositoryError>;

    /// Atomically increment the counter at `key` by one and return the new value.
    async fn incr(&self, key: &str) -> Result<i64, RepositoryError> {
        self.incr_by(key, 1).await
    }

    /// Atomically increment the counter at `key` by `delta` and return the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, RepositoryError>;
}

/// Resolve Redis-style inclusive bounds against a list of `len` elements.
///
/// Returns `None` when the resolved range is empty.
pub fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let start = if start < 0 { (len_i + start).max(0) } else { start };
    let stop = if stop < 0 { len_i + stop } else { stop.min(len_i - 1) };
    if start > stop || start >= len_i || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<std::num::ParseIntError> for RepositoryError {
    fn from(err: std::num::ParseIntError) -> Self {
        RepositoryError::Serialization(format!("counter is not an integer: {}", err))
    }
}
