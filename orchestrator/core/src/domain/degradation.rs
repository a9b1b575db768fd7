// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

use crate::domain::llm::LLMError;
use crate::domain::repository::RepositoryError;

/// Why a best-effort stage fell back to its default output.
///
/// Stages that must always yield a value return `Result<T, DegradedReason>`
/// internally and substitute their documented default at the public edge.
#[derive(Debug, Error)]
pub enum DegradedReason {
    #[error("provider call failed: {0}")]
    Provider(#[from] LLMError),

    #[error("response could not be parsed: {0}")]
    Parse(String),

    #[error("response rejected: {0}")]
    Schema(String),

    #[error("history unavailable: {0}")]
    History(#[from] RepositoryError),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl DegradedReason {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DegradedReason::Provider(_) => "provider",
            DegradedReason::Parse(_) => "parse",
            DegradedReason::Schema(_) => "schema",
            DegradedReason::History(_) => "history",
            DegradedReason::Timeout(_) => "timeout",
        }
    }
}
