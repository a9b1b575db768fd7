// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run Context Recorder
//!
//! Persists run contexts and episode bookkeeping to the key-value store.
//!
//! | Key | Shape | Bound |
//! |-----|-------|-------|
//! | `run_contexts` | list of `RunContext` JSON, newest first | 100 |
//! | `episode_history` | list of `EpisodeHistoryEntry` JSON, newest first | 50 |
//! | `total_episodes` | counter | - |
//! | `total_mutations` | counter | - |
//! | `meta:correlations` | `CorrelationSummary` JSON | - |
//!
//! Write paths never fail the caller: errors are logged and counted.
//! Read paths return `RepositoryError` so callers can decide.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::learning::{CorrelationSummary, LearningHistory};
use crate::domain::repository::{
    KeyValueStore, RepositoryError, CORRELATIONS_KEY, EPISODE_HISTORY_KEY, MAX_EPISODE_HISTORY,
    MAX_RUN_CONTEXTS, RUN_CONTEXTS_KEY, TOTAL_EPISODES_KEY, TOTAL_MUTATIONS_KEY,
};
use crate::domain::run_context::{EpisodeHistoryEntry, PipelineStats, RunContext};

pub struct RunContextRecorder {
    store: Arc<dyn KeyValueStore>,
}

impl RunContextRecorder {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Claim the next episode number.
    ///
    /// A failed increment is logged and counted; the run then uses the last
    /// readable count plus one, or 0 when the counter cannot be read either.
    pub async fn next_episode_number(&self) -> u64 {
        match self.store.incr(TOTAL_EPISODES_KEY).await {
            Ok(n) => n.max(0) as u64,
            Err(e) => {
                error!(error = %e, "Failed to claim episode number");
                metrics::counter!("gatecast_persistence_failures_total", "key" => TOTAL_EPISODES_KEY).increment(1);
                self.last_episode_number().await.map(|n| n + 1).unwrap_or(0)
            }
        }
    }

    async fn last_episode_number(&self) -> Option<u64> {
        let raw = self.store.get(TOTAL_EPISODES_KEY).await.ok()??;
        raw.parse::<i64>().ok().map(|n| n.max(0) as u64)
    }

    /// Push the context to the front of `run_contexts`, keeping the newest 100.
    pub async fn save(&self, context: &RunContext) {
        if let Err(e) = self.try_save(context).await {
            error!(run_id = %context.run_id, error = %e, "Failed to persist run context");
            metrics::counter!("gatecast_persistence_failures_total", "key" => RUN_CONTEXTS_KEY).increment(1);
        }
    }

    async fn try_save(&self, context: &RunContext) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(context)?;
        self.store.push(RUN_CONTEXTS_KEY, payload).await?;
        self.store
            .trim(RUN_CONTEXTS_KEY, 0, MAX_RUN_CONTEXTS as i64 - 1)
            .await?;
        debug!(run_id = %context.run_id, "Run context persisted");
        Ok(())
    }

    /// Episode history entry, mutation counter and correlation cache.
    pub async fn record_episode(&self, context: &RunContext) {
        if let Err(e) = self.try_record_episode(context).await {
            error!(run_id = %context.run_id, error = %e, "Failed to record episode");
            metrics::counter!("gatecast_persistence_failures_total", "key" => EPISODE_HISTORY_KEY).increment(1);
        }
    }

    async fn try_record_episode(&self, context: &RunContext) -> Result<(), RepositoryError> {
        let entry = EpisodeHistoryEntry::from_context(context);
        self.store
            .push(EPISODE_HISTORY_KEY, serde_json::to_string(&entry)?)
            .await?;
        self.store
            .trim(EPISODE_HISTORY_KEY, 0, MAX_EPISODE_HISTORY as i64 - 1)
            .await?;

        let mutations = context.mutation_count();
        if mutations > 0 {
            self.store.incr_by(TOTAL_MUTATIONS_KEY, mutations as i64).await?;
        }

        if context.mutation.is_some() && context.regeneration.is_some() {
            let mut correlations = self.load_correlations().await.unwrap_or_else(|e| {
                warn!(error = %e, "Correlation cache unreadable, rebuilding");
                CorrelationSummary::default()
            });
            correlations.observe(context);
            self.store
                .set(CORRELATIONS_KEY, serde_json::to_string(&correlations)?)
                .await?;
        }
        Ok(())
    }

    pub async fn load_correlations(&self) -> Result<CorrelationSummary, RepositoryError> {
        match self.store.get(CORRELATIONS_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(CorrelationSummary::default()),
        }
    }

    /// Most recent `limit` run contexts, newest first. Entries that no
    /// longer deserialize are skipped.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunContext>, RepositoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.range(RUN_CONTEXTS_KEY, 0, limit as i64 - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|item| match serde_json::from_str::<RunContext>(item) {
                Ok(context) => Some(context),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable run context");
                    None
                }
            })
            .collect())
    }

    /// Advisor input: last `window` runs plus the correlation cache.
    pub async fn load_history(&self, window: usize) -> Result<LearningHistory, RepositoryError> {
        let runs = self.recent_runs(window).await?;
        let correlations = self.load_correlations().await.unwrap_or_else(|e| {
            warn!(error = %e, "Correlation cache unreadable, ignoring");
            CorrelationSummary::default()
        });
        Ok(LearningHistory { runs, correlations })
    }

    pub async fn episode_history(&self, limit: usize) -> Result<Vec<EpisodeHistoryEntry>, RepositoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.range(EPISODE_HISTORY_KEY, 0, limit as i64 - 1).await?;
        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(RepositoryError::from))
            .collect()
    }

    pub async fn stats(&self) -> Result<PipelineStats, RepositoryError> {
        let history = self.episode_history(MAX_EPISODE_HISTORY).await?;
        let total_episodes = self.counter(TOTAL_EPISODES_KEY).await?;
        let total_mutations = self.counter(TOTAL_MUTATIONS_KEY).await?;
        Ok(PipelineStats::from_history(&history, total_episodes, total_mutations))
    }

    async fn counter(&self, key: &str) -> Result<i64, RepositoryError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(raw.parse::<i64>()?),
            None => Ok(0),
        }
    }
}
