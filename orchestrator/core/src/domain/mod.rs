// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, invariants and collaborator contracts of the pipeline.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and traits shared by application services and adapters

pub mod degradation;
pub mod events;
pub mod generation;
pub mod judge;
pub mod learning;
pub mod llm;
pub mod mutation;
pub mod pipeline_config;
pub mod prediction;
pub mod primitives;
pub mod repository;
pub mod run_context;
pub mod validation;
