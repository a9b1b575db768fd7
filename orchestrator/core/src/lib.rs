// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gatecast Core
//!
//! Adaptive, quality-gated generation of short broadcast scripts.
//!
//! # Architecture
//!
//! - **domain** - value objects, traits and pure rules
//! - **application** - gateway, consensus, advisors, mutation, recorder, orchestrator
//! - **infrastructure** - LLM adapters, key-value stores, event bus, offline collaborators

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
