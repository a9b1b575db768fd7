// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Sled-backed key-value store
//
// Lists are stored as JSON arrays in the `lists` tree, strings and counters
// as UTF-8 in the `values` tree. Every read-modify-write goes through
// `update_and_fetch`, which is atomic per key.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::domain::repository::{resolve_range, KeyValueStore, RepositoryError};

pub struct SledKeyValueStore {
    db: sled::Db,
    lists: sled::Tree,
    values: sled::Tree,
}

impl SledKeyValueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        debug!("Opening sled store at {:?}", path);
        let db = sled::open(path).map_err(db_error)?;
        Self::from_db(db)
    }

    /// Throwaway store that lives only as long as the handle.
    pub fn temporary() -> Result<Self, RepositoryError> {
        let db = sled::Config::new().temporary(true).open().map_err(db_error)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, RepositoryError> {
        let lists = db.open_tree("lists").map_err(db_error)?;
        let values = db.open_tree("values").map_err(db_error)?;
        Ok(Self { db, lists, values })
    }

    async fn flush(&self) -> Result<(), RepositoryError> {
        self.db.flush_async().await.map_err(db_error)?;
        Ok(())
    }

    fn decode_list(raw: &[u8]) -> Result<Vec<String>, RepositoryError> {
        Ok(serde_json::from_slice(raw)?)
    }

    fn encode_list(list: &[String]) -> Result<Vec<u8>, RepositoryError> {
        Ok(serde_json::to_vec(list)?)
    }

    /// Atomically rewrite the list at `key`. `f` returns `None` to delete it.
    fn update_list<F>(&self, key: &str, mut f: F) -> Result<Option<Vec<String>>, RepositoryError>
    where
        F: FnMut(Vec<String>) -> Option<Vec<String>>,
    {
        let mut failure: Option<RepositoryError> = None;
        let mut result: Option<Vec<String>> = None;

        self.lists
            .update_and_fetch(key, |old| {
                failure = None;
                let current = match old.map(Self::decode_list).transpose() {
                    Ok(list) => list.unwrap_or_default(),
                    Err(e) => {
                        failure = Some(e);
                        return old.map(|o| o.to_vec());
                    }
                };
                let next = f(current);
                result = next.clone();
                match next {
                    Some(list) => match Self::encode_list(&list) {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            failure = Some(e);
                            old.map(|o| o.to_vec())
                        }
                    },
                    None => None,
                }
            })
            .map_err(db_error)?;

        match failure {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }
}

fn db_error(err: sled::Error) -> RepositoryError {
    RepositoryError::Database(err.to_string())
}

#[async_trait]
impl KeyValueStore for SledKeyValueStore {
    async fn push(&self, key: &str, value: String) -> Result<usize, RepositoryError> {
        let updated = self.update_list(key, |mut list| {
            list.insert(0, value.clone());
            Some(list)
        })?;
        self.flush().await?;
        Ok(updated.map(|l| l.len()).unwrap_or(0))
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), RepositoryError> {
        self.update_list(key, |list| {
            let (from, to) = resolve_range(list.len(), start, stop)?;
            Some(list[from..=to].to_vec())
        })?;
        self.flush().await
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, RepositoryError> {
        let Some(raw) = self.lists.get(key).map_err(db_error)? else {
            return Ok(Vec::new());
        };
        let list = Self::decode_list(&raw)?;
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let Some(raw) = self.values.get(key).map_err(db_error)? else {
            return Ok(None);
        };
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), RepositoryError> {
        self.values.insert(key, value.as_bytes()).map_err(db_error)?;
        self.flush().await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, RepositoryError> {
        let mut failure: Option<RepositoryError> = None;

        let updated = self
            .values
            .update_and_fetch(key, |old| {
                failure = None;
                let current = match old {
                    None => 0,
                    Some(raw) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok()) {
                        Some(n) => n,
                        None => {
                            failure = Some(RepositoryError::Serialization(format!(
                                "counter '{}' is not an integer",
                                key
                            )));
                            return Some(raw.to_vec());
                        }
                    },
                };
                Some((current + delta).to_string().into_bytes())
            })
            .map_err(db_error)?;

        if let Some(e) = failure {
            return Err(e);
        }
        self.flush().await?;

        let raw = updated.ok_or_else(|| RepositoryError::Unknown(format!("counter '{}' vanished", key)))?;
        let text = std::str::from_utf8(&raw).map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        Ok(text.parse::<i64>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sled_list_semantics() {
        let store = SledKeyValueStore::temporary().unwrap();
        for i in 0..5 {
            store.push("runs", format!("r{}", i)).await.unwrap();
        }
        assert_eq!(store.range("runs", 0, 1).await.unwrap(), vec!["r4", "r3"]);
        store.trim("runs", 0, 2).await.unwrap();
        assert_eq!(store.range("runs", 0, -1).await.unwrap(), vec!["r4", "r3", "r2"]);
    }

    #[tokio::test]
    async fn test_sled_counters_and_values() {
        let store = SledKeyValueStore::temporary().unwrap();
        assert_eq!(store.incr("episodes").await.unwrap(), 1);
        assert_eq!(store.incr_by("episodes", 4).await.unwrap(), 5);
        store.set("meta:correlations", "{}".into()).await.unwrap();
        assert_eq!(store.get("meta:correlations").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_sled_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledKeyValueStore::open(dir.path()).unwrap();
            store.push("episode_history", "e1".into()).await.unwrap();
            store.incr("total_episodes").await.unwrap();
        }
        let store = SledKeyValueStore::open(dir.path()).unwrap();
        assert_eq!(store.range("episode_history", 0, -1).await.unwrap(), vec!["e1"]);
        assert_eq!(store.get("total_episodes").await.unwrap().as_deref(), Some("1"));
    }
}
