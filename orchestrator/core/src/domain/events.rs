// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::run_context::{FinalStatus, RunId, Stage};

/// Progress of a pipeline run, published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: RunId,
        episode_number: u64,
        topic: String,
        started_at: DateTime<Utc>,
    },
    StageCompleted {
        run_id: RunId,
        stage: Stage,
        latency_ms: u64,
        /// One-line outcome, e.g. "fail 0.41 (strength 0.62)"
        detail: String,
        completed_at: DateTime<Utc>,
    },
    StageSkipped {
        run_id: RunId,
        stage: Stage,
        reason: String,
    },
    RunFinalized {
        run_id: RunId,
        status: FinalStatus,
        total_latency_ms: u64,
        finalized_at: DateTime<Utc>,
    },
    RunFailed {
        run_id: RunId,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::StageSkipped { run_id, .. }
            | PipelineEvent::RunFinalized { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. } => *run_id,
        }
    }

    /// Whether this is the last event a run emits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::RunFinalized { .. } | PipelineEvent::RunFailed { .. })
    }
}
