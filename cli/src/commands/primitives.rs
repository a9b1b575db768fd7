// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Operator override of primitive weights
//!
//! Commands: show, set, reset

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use gatecast_core::domain::primitives::{clamp_weight, is_known_primitive, Primitives, PRIMITIVE_DEFAULTS};

use crate::embedded::EmbeddedPipeline;

#[derive(Subcommand)]
pub enum PrimitivesCommand {
    /// Show current weights next to their defaults
    Show,

    /// Set one weight (clamped to [0, 1])
    Set {
        #[arg(value_name = "NAME")]
        name: String,

        #[arg(value_name = "VALUE")]
        value: f64,
    },

    /// Restore every weight to its default
    Reset,
}

pub async fn handle_command(command: PrimitivesCommand, pipeline: &EmbeddedPipeline) -> Result<()> {
    match command {
        PrimitivesCommand::Show => show(pipeline).await,
        PrimitivesCommand::Set { name, value } => set(pipeline, &name, value).await,
        PrimitivesCommand::Reset => reset(pipeline).await,
    }
}

async fn show(pipeline: &EmbeddedPipeline) -> Result<()> {
    let weights = pipeline
        .primitives()
        .get()
        .await
        .context("Failed to load primitives")?;
    print!("{}", format_weights(&weights));
    Ok(())
}

pub fn format_weights(weights: &Primitives) -> String {
    let mut out = format!("{:<22} {:>7} {:>8}\n", "PRIMITIVE", "WEIGHT", "DEFAULT");
    for (name, default) in PRIMITIVE_DEFAULTS {
        let value = weights.get(name).unwrap_or(default);
        let marker = if (value - default).abs() > f64::EPSILON { "*" } else { "" };
        out.push_str(&format!("{:<22} {:>7.3} {:>8.2}{}\n", name, value, default, marker));
    }
    out
}

async fn set(pipeline: &EmbeddedPipeline, name: &str, value: f64) -> Result<()> {
    if !is_known_primitive(name) {
        let known: Vec<&str> = PRIMITIVE_DEFAULTS.iter().map(|(n, _)| *n).collect();
        anyhow::bail!("Unknown primitive '{}'. Known primitives: {}", name, known.join(", "));
    }

    pipeline
        .primitives()
        .set(name, value)
        .await
        .with_context(|| format!("Failed to set primitive '{}'", name))?;

    let stored = clamp_weight(value);
    if stored != value {
        println!(
            "{}",
            format!("Value {} clamped to {:.2}", value, stored).yellow()
        );
    }
    println!("{}", format!("✓ {} = {:.3}", name, stored).green());
    Ok(())
}

async fn reset(pipeline: &EmbeddedPipeline) -> Result<()> {
    pipeline
        .primitives()
        .reset()
        .await
        .context("Failed to reset primitives")?;
    println!("{}", "✓ Primitives reset to defaults".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_marks_overrides() {
        let mut weights = Primitives::defaults();
        weights.set("brevity", 0.9);
        let table = format_weights(&weights);
        assert!(table.contains("brevity"));
        let brevity = table.lines().find(|l| l.starts_with("brevity")).unwrap();
        assert!(brevity.ends_with('*'));
        let hype = table.lines().find(|l| l.starts_with("anti_hyperbole")).unwrap();
        assert!(!hype.ends_with('*'));
    }
}
