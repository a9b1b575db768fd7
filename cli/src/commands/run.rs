// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pipeline run commands
//!
//! Commands: run, batch

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tracing::{info, warn};

use gatecast_core::application::PipelineOrchestrator;
use gatecast_core::domain::run_context::{FinalStatus, RunContext};

use crate::embedded::EmbeddedPipeline;
use crate::render::{colored_status, print_run, ProgressPrinter};

pub async fn run(pipeline: &EmbeddedPipeline, topic: &str, json: bool) -> Result<()> {
    let orchestrator = pipeline.orchestrator()?;

    if json {
        let context = orchestrator
            .run_unified_pipeline(topic)
            .await
            .context("Pipeline run failed")?;
        println!("{}", serde_json::to_string_pretty(&context)?);
        return Ok(());
    }

    let context = run_with_progress(&orchestrator, topic).await?;
    print_run(&context);
    Ok(())
}

async fn run_with_progress(orchestrator: &PipelineOrchestrator, topic: &str) -> Result<RunContext> {
    let printer = ProgressPrinter::spawn(orchestrator.event_bus());
    let result = orchestrator.run_unified_pipeline(topic).await;
    printer.finish().await;
    result.context("Pipeline run failed")
}

/// Topics from a file, one per line. Blank lines and `#` comments are skipped.
pub fn read_topics(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub async fn batch(pipeline: &EmbeddedPipeline, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read topics from {}", file.display()))?;
    let topics = read_topics(&content);
    if topics.is_empty() {
        anyhow::bail!("No topics found in {}", file.display());
    }

    info!(count = topics.len(), "Starting batch run");
    let orchestrator = pipeline.orchestrator()?;
    let mut outcomes: Vec<(String, Option<FinalStatus>)> = Vec::with_capacity(topics.len());

    for (i, topic) in topics.iter().enumerate() {
        println!();
        println!("{}", format!("[{}/{}]", i + 1, topics.len()).dimmed());
        match run_with_progress(&orchestrator, topic).await {
            Ok(context) => outcomes.push((topic.clone(), Some(context.final_status))),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Batch topic failed");
                eprintln!("{} {:#}", "Error:".red(), e);
                outcomes.push((topic.clone(), None));
            }
        }
    }

    println!();
    println!("{}", "Batch summary:".bold());
    for (topic, status) in &outcomes {
        let status = match status {
            Some(status) => colored_status(*status).to_string(),
            None => "error".red().to_string(),
        };
        println!("  {:<10} {}", status, topic);
    }

    let errors = outcomes.iter().filter(|(_, status)| status.is_none()).count();
    if errors == outcomes.len() {
        anyhow::bail!("All {} batch topics failed", errors);
    }
    Ok(())
}
