// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Gatecast CLI
//!
//! The `gatecast` binary runs topics through the quality-gated script
//! pipeline in-process and inspects what the pipeline has learned.
//!
//! ## Commands
//!
//! - `gatecast run <topic> [--json]` - Run one topic
//! - `gatecast batch <file>` - Run one topic per line
//! - `gatecast history|stats|runs` - Inspect persisted episodes
//! - `gatecast primitives show|set|reset` - Operator override of weights
//! - `gatecast config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use gatecast_cli::commands::{self, ConfigCommand, PrimitivesCommand};
use gatecast_cli::embedded::EmbeddedPipeline;
use gatecast_core::domain::pipeline_config::{PipelineConfigManifest, StrategyKind};

/// Gatecast - quality-gated broadcast script generation
#[derive(Parser)]
#[command(name = "gatecast")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GATECAST_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, global = true, env = "GATECAST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the config value
    #[arg(long, global = true, env = "GATECAST_LOG_FORMAT")]
    log_format: Option<String>,

    /// Pipeline strategy (live, mock)
    #[arg(long, global = true)]
    strategy: Option<StrategyKind>,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "GATECAST_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one topic through the pipeline
    #[command(name = "run")]
    Run {
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Print the run context as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },

    /// Run every topic in a file, one per line
    #[command(name = "batch")]
    Batch {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Recent episode history
    #[command(name = "history")]
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Aggregate pipeline statistics
    #[command(name = "stats")]
    Stats,

    /// Summaries of recent runs
    #[command(name = "runs")]
    Runs {
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Primitive weight management
    #[command(name = "primitives")]
    Primitives {
        #[command(subcommand)]
        command: PrimitivesCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Config commands reload their own file; a broken config must not block them.
    let manifest = PipelineConfigManifest::load_or_default(cli.config.clone());
    let logging = manifest.as_ref().ok().map(|m| m.spec.observability.logging.clone());
    let level = cli
        .log_level
        .clone()
        .or_else(|| logging.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| logging.as_ref().map(|l| l.format.clone()))
        .unwrap_or_else(|| "text".to_string());
    init_logging(&level, &format)?;

    let Some(command) = cli.command else {
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        std::process::exit(1);
    };

    let (strategy, metrics_port) = (cli.strategy, cli.metrics_port);
    let open = move || open_pipeline(manifest, strategy, metrics_port);

    match command {
        Commands::Run { topic, json } => commands::run::run(&open()?, &topic, json).await,
        Commands::Batch { file } => commands::run::batch(&open()?, &file).await,
        Commands::History { limit } => commands::history::history(&open()?, limit).await,
        Commands::Stats => commands::history::stats(&open()?).await,
        Commands::Runs { limit } => commands::history::runs(&open()?, limit).await,
        Commands::Primitives { command } => commands::primitives::handle_command(command, &open()?).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Apply CLI overrides, start metrics and open the pipeline store.
fn open_pipeline(
    manifest: Result<PipelineConfigManifest>,
    strategy: Option<StrategyKind>,
    metrics_port: Option<u16>,
) -> Result<EmbeddedPipeline> {
    let mut manifest = manifest.context("Failed to load configuration")?;
    if let Some(strategy) = strategy {
        info!(strategy = ?strategy, "CLI override: strategy");
        manifest.spec.strategy = strategy;
    }

    let metrics = &manifest.spec.observability.metrics;
    if let Some(port) = metrics_port.or(metrics.enabled.then_some(metrics.port)) {
        init_metrics(port)?;
    }

    EmbeddedPipeline::open(manifest)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        "text" => builder.compact().init(),
        other => {
            builder.compact().init();
            warn!("Unknown log format '{}', using text", other);
        }
    }

    Ok(())
}

/// Install the Prometheus exporter on all interfaces.
fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics exporter on {}", addr))?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}
