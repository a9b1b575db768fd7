// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use gatecast_core::domain::pipeline_config::{PersistenceBackend, PipelineConfigManifest};

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./gatecast.yaml")]
        output: PathBuf,

        /// Full live configuration with comments instead of the offline one
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate {
            output,
            examples,
            force,
        } => generate(output, examples, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = PipelineConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. GATECAST_CONFIG_PATH: {}",
            std::env::var("GATECAST_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./gatecast.yaml");
        println!("  4. ~/.gatecast/config.yaml");
        println!("  5. /etc/gatecast/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Strategy: {:?}", spec.strategy);
    println!();

    println!("{}", "LLM Providers:".bold());
    for provider in &spec.llm_providers {
        let state = if provider.enabled { "" } else { " (disabled)" };
        println!("  {} ({}){}", provider.name.bold(), provider.provider_type, state);
        println!("    Endpoint: {}", provider.endpoint);
        for model in &provider.models {
            println!("      - {} → {}", model.alias, model.model);
        }
    }
    println!();

    println!("{}", "Stages:".bold());
    println!(
        "  Generation: {} → {} ({}ms, {} / {})",
        spec.generation.primary_model,
        spec.generation.fallback_model,
        spec.generation.timeout_ms,
        spec.generation.initial_mode,
        spec.generation.regeneration_mode
    );
    println!(
        "  Consensus: {} ({}ms)",
        spec.consensus.judge_model, spec.consensus.judge_timeout_ms
    );
    println!(
        "  Meta-learning: {} (window {}, retries {})",
        spec.meta_learning.advisor_model, spec.meta_learning.history_window, spec.meta_learning.max_retries
    );
    if spec.prediction.enabled {
        println!("  Prediction: {}", spec.prediction.predictor_model);
    } else {
        println!("  Prediction: {}", "(disabled)".dimmed());
    }
    println!();

    println!("{}", "Persistence:".bold());
    match spec.persistence.backend {
        PersistenceBackend::Memory => println!("  Backend: memory"),
        PersistenceBackend::Sled => println!("  Backend: sled at {}", spec.persistence.path.display()),
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PipelineConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", output.display());
    }

    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
