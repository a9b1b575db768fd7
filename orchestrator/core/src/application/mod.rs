// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod advisor;
pub mod consensus;
pub mod generation_gateway;
pub mod mutation_engine;
pub mod orchestrator;
pub mod predictor;
pub mod recorder;
pub mod strategy;

pub use orchestrator::{OrchestratorSettings, PipelineError, PipelineOrchestrator};
pub use strategy::{strategy_from_config, LiveStrategy, MockStrategy, PipelineStages, PipelineStrategy};
