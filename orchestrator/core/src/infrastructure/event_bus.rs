// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for pipeline events
//
// In-memory fan-out over a tokio broadcast channel. Events are not
// persisted; the run context is the durable record.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::PipelineEvent;
use crate::domain::run_context::RunId;

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<PipelineEvent>>,
}

impl EventBus {
    /// Capacity is the number of events buffered before slow receivers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: PipelineEvent) {
        debug!(run_id = %event.run_id(), "Publishing event: {:?}", event);
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single run.
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventReceiver {
        RunEventReceiver {
            receiver: self.sender.subscribe(),
            run_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

pub struct RunEventReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    run_id: RunId,
}

impl RunEventReceiver {
    /// Next event for this run; events of other runs are skipped.
    pub async fn recv(&mut self) -> Result<PipelineEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.run_id() == self.run_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run_context::{FinalStatus, Stage};
    use chrono::Utc;

    fn started(run_id: RunId) -> PipelineEvent {
        PipelineEvent::RunStarted {
            run_id,
            episode_number: 1,
            topic: "Chip export rules tighten".into(),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let run_id = RunId::new();

        bus.publish(started(run_id));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
        assert!(matches!(rx.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_run_receiver_filters_other_runs() {
        let bus = EventBus::new(10);
        let mine = RunId::new();
        let mut rx = bus.subscribe_run(mine);

        bus.publish(started(RunId::new()));
        bus.publish(PipelineEvent::StageSkipped {
            run_id: mine,
            stage: Stage::Prediction,
            reason: "disabled".into(),
        });
        bus.publish(PipelineEvent::RunFinalized {
            run_id: mine,
            status: FinalStatus::Passed,
            total_latency_ms: 12,
            finalized_at: Utc::now(),
        });

        assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::StageSkipped { .. }));
        assert!(rx.recv().await.unwrap().is_terminal());
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(started(RunId::new()));
    }
}
