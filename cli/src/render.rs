// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Terminal rendering of pipeline events and run contexts

use colored::Colorize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gatecast_core::domain::events::PipelineEvent;
use gatecast_core::domain::run_context::{FinalStatus, RunContext};
use gatecast_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};

/// One progress line per event.
pub fn format_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::RunStarted {
            episode_number,
            topic,
            ..
        } => format!("{} Episode {}: {}", "▶".cyan(), episode_number, topic.bold()),
        PipelineEvent::StageCompleted {
            stage,
            latency_ms,
            detail,
            ..
        } => format!(
            "  {} {:<14} {:>6}ms  {}",
            "✓".green(),
            stage.as_str(),
            latency_ms,
            detail
        ),
        PipelineEvent::StageSkipped { stage, reason, .. } => {
            format!("  {} {:<14} {}", "-".dimmed(), stage.as_str(), reason.dimmed())
        }
        PipelineEvent::RunFinalized {
            status,
            total_latency_ms,
            ..
        } => format!("{} {} in {}ms", "■".cyan(), colored_status(*status), total_latency_ms),
        PipelineEvent::RunFailed { error, .. } => format!("{} {}", "✗".red(), error.red()),
    }
}

pub fn colored_status(status: FinalStatus) -> colored::ColoredString {
    match status {
        FinalStatus::Passed => status.as_str().green().bold(),
        FinalStatus::Improved => status.as_str().cyan().bold(),
        FinalStatus::Failed => status.as_str().red().bold(),
        FinalStatus::InProgress => status.as_str().yellow(),
    }
}

/// Prints bus events until cancelled, then drains what is buffered.
pub struct ProgressPrinter {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressPrinter {
    pub fn spawn(event_bus: &EventBus) -> Self {
        let token = CancellationToken::new();
        let receiver = event_bus.subscribe();
        let handle = tokio::spawn(print_events(receiver, token.child_token()));
        Self { token, handle }
    }

    pub async fn finish(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

async fn print_events(mut receiver: EventReceiver, token: CancellationToken) {
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => println!("{}", format_event(&event)),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return,
            },
            _ = token.cancelled() => break,
        }
    }

    loop {
        match receiver.try_recv() {
            Ok(event) => println!("{}", format_event(&event)),
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

/// Context summary followed by the broadcast script.
pub fn print_run(context: &RunContext) {
    println!();
    print!("{}", context.summary());
    if let Some(script) = context.final_script() {
        println!();
        println!("{}", "Script:".bold());
        println!("{}", script);
    }
}
