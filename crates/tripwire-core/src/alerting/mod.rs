//! Alerting engine
//!
//! Threshold evaluation, persistence, metric feeds and the cycle driver that
//! ties them to notification dispatch.

mod bus;
mod evaluator;
pub mod feed;
mod importer;
mod orchestrator;
mod repository;

pub use bus::{AlertNotice, BroadcastBus, EventBus, FanoutBus, NoopBus};
pub use evaluator::{evaluate, evaluate_at, Evaluation};
pub use feed::{HttpMetricFeed, MetricFeedAdapter, StaticMetricFeed};
pub use importer::{ConfigImporter, ImportSummary};
pub use orchestrator::{
    AlertOrchestrator, AlertOutcome, ChannelCounts, ChannelResolver, CycleReport, CycleSummary,
    OrchestratorState, SkipReason, set_snooze,
};
pub use repository::{AlertRepository, MemoryAlertRepository};
