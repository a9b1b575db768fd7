// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::domain::repository::{resolve_range, KeyValueStore, RepositoryError};

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, String>,
}

/// Process-local store for tests and `backend: memory`.
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn push(&self, key: &str, value: String) -> Result<usize, RepositoryError> {
        let mut inner = self.inner.write();
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(value);
        Ok(list.len())
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write();
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(());
        };
        match resolve_range(list.len(), start, stop) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => {
                inner.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RepositoryError> {
        let inner = self.inner.read();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.inner.read().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), RepositoryError> {
        self.inner.write().values.insert(key.to_string(), value);
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, RepositoryError> {
        let mut inner = self.inner.write();
        let current = match inner.values.get(key) {
            Some(raw) => raw.parse::<i64>()?,
            None => 0,
        };
        let next = current + delta;
        inner.values.insert(key.to_string(), next.to_string());
        Ok(next)
    }
}
