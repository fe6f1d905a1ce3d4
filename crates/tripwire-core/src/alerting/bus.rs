//! Observer interface for orchestrator output
//!
//! Subscribers (console panels, loggers, dashboards) receive notices through
//! an [`EventBus`] handed to the orchestrator at construction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{AlertEvent, DispatchReport};

use super::orchestrator::CycleSummary;

/// Something the orchestrator reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertNotice {
    /// A level transition and its dispatch outcome
    Transition {
        /// The recorded event
        event: AlertEvent,
        /// Per-channel results; `None` when dispatch was suppressed
        dispatch: Option<DispatchReport>,
        /// Whether dispatch was suppressed by a snooze
        snoozed: bool,
    },
    /// A cycle finished
    CycleCompleted(CycleSummary),
}

/// Receives orchestrator notices. Implementations must not fail the caller.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver a notice
    async fn publish(&self, notice: &AlertNotice);
}

/// Discards every notice
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBus;

#[async_trait]
impl EventBus for NoopBus {
    async fn publish(&self, _notice: &AlertNotice) {}
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<AlertNotice>,
}

impl BroadcastBus {
    /// Create a bus that buffers up to `capacity` notices per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future notices
    pub fn subscribe(&self) -> broadcast::Receiver<AlertNotice> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, notice: &AlertNotice) {
        // no subscribers is not an error
        if self.tx.send(notice.clone()).is_err() {
            trace!("No bus subscribers");
        }
    }
}

/// Publishes to several buses in order
#[derive(Clone, Default)]
pub struct FanoutBus {
    buses: Vec<Arc<dyn EventBus>>,
}

impl FanoutBus {
    /// Create an empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bus
    #[must_use]
    pub fn with(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.buses.push(bus);
        self
    }
}

#[async_trait]
impl EventBus for FanoutBus {
    async fn publish(&self, notice: &AlertNotice) {
        for bus in &self.buses {
            bus.publish(notice).await;
        }
    }
}
