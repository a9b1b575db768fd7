// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Read-only views over persisted runs
//!
//! Commands: history, stats, runs

use anyhow::{Context, Result};
use colored::Colorize;

use crate::embedded::EmbeddedPipeline;
use crate::render::colored_status;

pub async fn history(pipeline: &EmbeddedPipeline, limit: usize) -> Result<()> {
    let entries = pipeline
        .recorder()
        .episode_history(limit)
        .await
        .context("Failed to read episode history")?;

    if entries.is_empty() {
        println!("{}", "No episodes recorded yet".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:>7}  {:<10} {:>7} {:>9}  {:<19}  {}",
            "EPISODE", "STATUS", "QUALITY", "MUTATIONS", "TIMESTAMP", "TOPIC"
        )
        .bold()
    );
    for entry in entries {
        println!(
            "{:>7}  {:<10} {:>7} {:>9}  {:<19}  {}",
            entry.episode_id,
            colored_status(entry.final_status),
            entry.quality_score,
            entry.mutations,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.topic
        );
    }
    Ok(())
}

pub async fn stats(pipeline: &EmbeddedPipeline) -> Result<()> {
    let stats = pipeline
        .recorder()
        .stats()
        .await
        .context("Failed to compute pipeline stats")?;

    println!("{}", "Pipeline statistics:".bold());
    println!("  Total episodes:   {}", stats.total_episodes);
    println!("  Total mutations:  {}", stats.total_mutations);
    println!("  Episodes in view: {}", stats.episodes_in_window);
    println!("  Average quality:  {:.1}", stats.avg_quality);
    println!("  Gate pass rate:   {:.1}%", stats.gate_pass_rate * 100.0);
    if !stats.status_counts.is_empty() {
        println!("  Outcomes:");
        for (status, count) in &stats.status_counts {
            println!("    {:<10} {}", status, count);
        }
    }
    Ok(())
}

pub async fn runs(pipeline: &EmbeddedPipeline, limit: usize) -> Result<()> {
    let runs = pipeline
        .recorder()
        .recent_runs(limit)
        .await
        .context("Failed to read run contexts")?;

    if runs.is_empty() {
        println!("{}", "No runs recorded yet".dimmed());
        return Ok(());
    }

    for context in runs {
        print!("{}", context.summary());
        println!();
    }
    Ok(())
}
