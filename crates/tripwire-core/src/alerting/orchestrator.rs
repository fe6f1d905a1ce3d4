//! Evaluation cycle driver
//!
//! One [`AlertOrchestrator::run_cycle`] call walks every configured alert:
//! fetch metric, evaluate, persist state, record the event and dispatch it.
//! A failure anywhere in one alert's pipeline is recorded as a skipped
//! outcome and never stops the remaining alerts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::models::{
    AlertConfig, AlertEvent, AlertState, Channel, ChannelMap, ChannelOutcome, DispatchReport,
    NotificationType,
};
use crate::notify::NotificationRouter;

use super::bus::{AlertNotice, EventBus, NoopBus};
use super::evaluator::evaluate_at;
use super::feed::MetricFeedAdapter;
use super::repository::AlertRepository;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    /// Waiting for the next cycle
    Idle,
    /// A cycle is iterating alerts
    CycleRunning,
}

/// Why an alert was skipped this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Invalid threshold
    ConfigError,
    /// The feed produced no usable value
    MetricUnavailable,
    /// A repository operation failed
    StorageError,
}

impl SkipReason {
    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigError => "config_error",
            Self::MetricUnavailable => "metric_unavailable",
            Self::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one alert in a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// Evaluated, level unchanged, no event
    Unchanged {
        /// Alert id
        alert_id: String,
    },
    /// Level changed; the event was recorded
    Transitioned {
        /// Recorded event
        event: AlertEvent,
        /// Per-channel results; `None` when snoozed
        dispatch: Option<DispatchReport>,
        /// Dispatch suppressed by a snooze
        snoozed: bool,
    },
    /// Not evaluated or not recorded
    Skipped {
        /// Alert id
        alert_id: String,
        /// Named reason
        reason: SkipReason,
        /// Underlying error text
        detail: String,
    },
}

impl AlertOutcome {
    fn skipped(alert_id: &str, reason: SkipReason, err: &Error) -> Self {
        Self::Skipped {
            alert_id: alert_id.to_string(),
            reason,
            detail: err.to_string(),
        }
    }

    /// Alert this outcome belongs to
    pub fn alert_id(&self) -> &str {
        match self {
            Self::Unchanged { alert_id } | Self::Skipped { alert_id, .. } => alert_id,
            Self::Transitioned { event, .. } => &event.alert_id,
        }
    }
}

/// Per-channel outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    /// Delivered
    pub ok: usize,
    /// Not attempted
    pub skipped: usize,
    /// Attempted and failed
    pub failed: usize,
}

/// Aggregate numbers for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Alerts that were evaluated (not skipped)
    pub evaluated: usize,
    /// Transition events recorded
    pub events: usize,
    /// Events whose dispatch was suppressed by a snooze
    pub snoozed: usize,
    /// Skipped alerts by reason
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Channel outcomes across all dispatches
    pub channels: BTreeMap<Channel, ChannelCounts>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl CycleSummary {
    /// Total skipped alerts
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    fn record(&mut self, outcome: &AlertOutcome) {
        match outcome {
            AlertOutcome::Unchanged { .. } => self.evaluated += 1,
            AlertOutcome::Transitioned {
                dispatch, snoozed, ..
            } => {
                self.evaluated += 1;
                self.events += 1;
                if *snoozed {
                    self.snoozed += 1;
                }
                for result in dispatch.iter().flat_map(|d| d.results.values()) {
                    let counts = self.channels.entry(result.channel).or_default();
                    match result.outcome() {
                        ChannelOutcome::Ok => counts.ok += 1,
                        ChannelOutcome::Skipped => counts.skipped += 1,
                        ChannelOutcome::Failed => counts.failed += 1,
                    }
                }
            }
            AlertOutcome::Skipped { reason, .. } => {
                *self.skipped.entry(*reason).or_default() += 1;
            }
        }
    }
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Aggregate numbers
    pub summary: CycleSummary,
    /// One outcome per alert, in repository order
    pub outcomes: Vec<AlertOutcome>,
}

impl CycleReport {
    /// Events recorded this cycle
    pub fn events(&self) -> impl Iterator<Item = &AlertEvent> {
        self.outcomes.iter().filter_map(|o| match o {
            AlertOutcome::Transitioned { event, .. } => Some(event),
            _ => None,
        })
    }

    /// Outcome for an alert
    pub fn outcome(&self, alert_id: &str) -> Option<&AlertOutcome> {
        self.outcomes.iter().find(|o| o.alert_id() == alert_id)
    }
}

/// Picks the channel map for an alert
#[derive(Debug, Clone, Default)]
pub struct ChannelResolver {
    by_class: HashMap<String, ChannelMap>,
}

impl ChannelResolver {
    /// Create a resolver from per-`alert_class` maps. Class names match
    /// case-insensitively.
    pub fn new(by_class: HashMap<String, ChannelMap>) -> Self {
        Self {
            by_class: by_class
                .into_iter()
                .map(|(class, map)| (class.to_ascii_lowercase(), map))
                .collect(),
        }
    }

    /// Configured map for the alert class, else the one implied by
    /// `notification_type`
    pub fn for_config(&self, config: &AlertConfig) -> ChannelMap {
        if let Some(map) = self.by_class.get(&config.alert_class.to_ascii_lowercase()) {
            return *map;
        }
        match config.notification_type {
            NotificationType::Sms => ChannelMap::from_channels(&[Channel::Sms, Channel::System]),
            NotificationType::Windows => ChannelMap::from_channels(&[Channel::System]),
        }
    }
}

/// Clears the running flag even if the cycle future is dropped
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives evaluation cycles across all configured alerts
pub struct AlertOrchestrator {
    repo: Arc<dyn AlertRepository>,
    feed: Arc<dyn MetricFeedAdapter>,
    router: Arc<NotificationRouter>,
    bus: Arc<dyn EventBus>,
    channels: ChannelResolver,
    running: AtomicBool,
}

impl AlertOrchestrator {
    /// Create an orchestrator with no bus and notification-type channel maps
    pub fn new(
        repo: Arc<dyn AlertRepository>,
        feed: Arc<dyn MetricFeedAdapter>,
        router: Arc<NotificationRouter>,
    ) -> Self {
        Self {
            repo,
            feed,
            router,
            bus: Arc::new(NoopBus),
            channels: ChannelResolver::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Publish notices on a bus
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Use per-class channel maps
    #[must_use]
    pub fn with_channels(mut self, channels: ChannelResolver) -> Self {
        self.channels = channels;
        self
    }

    /// Current phase
    pub fn state(&self) -> OrchestratorState {
        if self.running.load(Ordering::Acquire) {
            OrchestratorState::CycleRunning
        } else {
            OrchestratorState::Idle
        }
    }

    /// Run one evaluation cycle.
    ///
    /// Fails only if a cycle is already running or the repository cannot
    /// list alerts.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Cycle requested while another is running");
            return Err(Error::CycleInProgress);
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        let alerts = self.repo.iterate_configs_with_state().await.map_err(|e| {
            error!(error = %e, "Failed to list alerts");
            metrics::counter!("tripwire_cycle_failures_total").increment(1);
            e
        })?;

        debug!(count = alerts.len(), "Starting evaluation cycle");

        let mut summary = CycleSummary::default();
        let mut outcomes = Vec::with_capacity(alerts.len());

        for (config, state) in alerts {
            let outcome = self.process_alert(&config, &state, Utc::now()).await;
            summary.record(&outcome);
            outcomes.push(outcome);
        }

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        record_metrics(&summary);

        info!(
            evaluated = summary.evaluated,
            events = summary.events,
            snoozed = summary.snoozed,
            skipped = summary.skipped_total(),
            channels = ?summary.channels,
            duration_ms = summary.duration_ms,
            "Cycle complete"
        );

        self.bus
            .publish(&AlertNotice::CycleCompleted(summary.clone()))
            .await;

        Ok(CycleReport { summary, outcomes })
    }

    async fn process_alert(
        &self,
        config: &AlertConfig,
        state: &AlertState,
        now: DateTime<Utc>,
    ) -> AlertOutcome {
        let value = match self.feed.metric_for(config).await {
            Ok(v) if v.is_finite() => v,
            Ok(v) => {
                let err = Error::metric_unavailable(&config.id, format!("non-finite value {v}"));
                warn!(alert_id = %config.id, error = %err, "Skipping alert");
                return AlertOutcome::skipped(&config.id, SkipReason::MetricUnavailable, &err);
            }
            Err(err) => {
                warn!(alert_id = %config.id, error = %err, "Metric unavailable");
                return AlertOutcome::skipped(&config.id, SkipReason::MetricUnavailable, &err);
            }
        };

        let threshold = match self
            .repo
            .thresholds_for(&config.alert_type, &config.alert_class, config.condition)
            .await
        {
            Ok(t) => t,
            Err(err) => {
                error!(alert_id = %config.id, error = %err, "Threshold lookup failed");
                return AlertOutcome::skipped(&config.id, SkipReason::StorageError, &err);
            }
        };

        if let Some(threshold) = &threshold {
            if let Err(err) = threshold.validate() {
                warn!(alert_id = %config.id, error = %err, "Invalid threshold");
                return AlertOutcome::skipped(&config.id, SkipReason::ConfigError, &err);
            }
        } else {
            debug!(alert_id = %config.id, "No threshold configured");
        }

        let evaluation = evaluate_at(config, state, value, threshold.as_ref(), now);

        if let Err(err) = self.repo.save_state(&evaluation.state).await {
            error!(alert_id = %config.id, error = %err, "Failed to save alert state");
            return AlertOutcome::skipped(&config.id, SkipReason::StorageError, &err);
        }

        let Some(event) = evaluation.event else {
            debug!(alert_id = %config.id, value, level = ?state.last_level, "Level unchanged");
            return AlertOutcome::Unchanged {
                alert_id: config.id.clone(),
            };
        };

        if let Err(err) = self.repo.append_event(&event).await {
            error!(alert_id = %config.id, error = %err, "Failed to record alert event");
            // Put the previous level back so the transition is raised again next cycle
            if let Err(rollback) = self.repo.save_state(state).await {
                error!(alert_id = %config.id, error = %rollback, "Failed to restore alert state");
            }
            return AlertOutcome::skipped(&config.id, SkipReason::StorageError, &err);
        }

        info!(
            alert_id = %config.id,
            event_id = %event.id,
            from = %event.previous_level,
            to = %event.level,
            value,
            breach = event.breach,
            "Alert level changed"
        );

        let snoozed = state.is_snoozed(now);
        let dispatch = if snoozed {
            info!(alert_id = %config.id, until = ?state.snoozed_until, "Alert snoozed, not dispatching");
            None
        } else {
            let channels = self.channels.for_config(config);
            let report = self.router.dispatch(&event, &channels).await;
            info!(
                alert_id = %config.id,
                event_id = %event.id,
                success = report.success,
                results = %serde_json::to_string(&report.results).unwrap_or_default(),
                "Dispatch report"
            );
            Some(report)
        };

        self.bus
            .publish(&AlertNotice::Transition {
                event: event.clone(),
                dispatch: dispatch.clone(),
                snoozed,
            })
            .await;

        AlertOutcome::Transitioned {
            event,
            dispatch,
            snoozed,
        }
    }
}

/// Suppress dispatch for an alert until `until`, or clear with `None`
pub async fn set_snooze(
    repo: &dyn AlertRepository,
    alert_id: &str,
    until: Option<DateTime<Utc>>,
) -> Result<AlertState> {
    let mut state = repo.get_state(alert_id).await?;
    state.snoozed_until = until;
    state.updated_at = Utc::now();
    repo.save_state(&state).await?;
    info!(alert_id, until = ?until, "Snooze updated");
    Ok(state)
}

fn record_metrics(summary: &CycleSummary) {
    metrics::counter!("tripwire_cycles_total").increment(1);
    metrics::counter!("tripwire_alerts_evaluated_total").increment(summary.evaluated as u64);
    metrics::counter!("tripwire_alert_events_total").increment(summary.events as u64);
    for (reason, count) in &summary.skipped {
        metrics::counter!("tripwire_alerts_skipped_total", "reason" => reason.as_str())
            .increment(*count as u64);
    }
    metrics::histogram!("tripwire_cycle_duration_seconds")
        .record(summary.duration_ms as f64 / 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    use crate::alerting::{BroadcastBus, MemoryAlertRepository, StaticMetricFeed};
    use crate::models::{AlertLevel, Condition, Threshold};
    use crate::notify::{ChannelRoute, ChannelTransport, SendResult};

    struct Recorder;

    #[async_trait]
    impl ChannelTransport for Recorder {
        fn provider(&self) -> &str {
            "recorder"
        }

        async fn send(&self, _event: &AlertEvent, _recipient: Option<&str>) -> SendResult {
            Ok(None)
        }
    }

    fn config(id: &str, alert_type: &str) -> AlertConfig {
        AlertConfig {
            id: id.to_string(),
            description: String::new(),
            alert_type: alert_type.to_string(),
            alert_class: "Position".to_string(),
            condition: Condition::Above,
            trigger_value: 25.0,
            notification_type: NotificationType::Windows,
            position_reference_id: None,
            created_at: Utc::now(),
        }
    }

    fn threshold(alert_type: &str, low: f64, medium: f64, high: f64) -> Threshold {
        Threshold {
            id: format!("{alert_type}-tiers"),
            alert_type: alert_type.to_string(),
            alert_class: "Position".to_string(),
            metric_key: String::new(),
            condition: Condition::Above,
            low,
            medium,
            high,
            tier_order: None,
            enabled: true,
            last_modified: Utc::now(),
        }
    }

    async fn setup(values: &[(&str, f64)]) -> (Arc<MemoryAlertRepository>, AlertOrchestrator) {
        let repo = Arc::new(MemoryAlertRepository::new());
        repo.add_config(&config("profit", "Profit")).await.unwrap();
        repo.add_threshold(&threshold("Profit", 10.0, 20.0, 25.0))
            .await
            .unwrap();

        let feed = StaticMetricFeed::new(
            values
                .iter()
                .map(|(k, v)| ((*k).to_string(), *v))
                .collect(),
        );
        let router = NotificationRouter::new(Duration::from_secs(1))
            .with_route(Channel::System, ChannelRoute::new(Channel::System, Arc::new(Recorder)));

        let orchestrator = AlertOrchestrator::new(repo.clone(), Arc::new(feed), Arc::new(router));
        (repo, orchestrator)
    }

    #[tokio::test]
    async fn test_transition_is_recorded_and_dispatched() {
        let (repo, orchestrator) = setup(&[("profit", 30.0)]).await;
        let bus = BroadcastBus::new(8);
        let mut rx = bus.subscribe();
        let orchestrator = orchestrator.with_bus(Arc::new(bus));

        let report = orchestrator.run_cycle().await.unwrap();

        assert_eq!(report.summary.events, 1);
        assert_eq!(report.summary.channels[&Channel::System].ok, 1);
        match report.outcome("profit").unwrap() {
            AlertOutcome::Transitioned {
                event,
                dispatch,
                snoozed,
            } => {
                assert_eq!(event.level, AlertLevel::High);
                assert!(!snoozed);
                assert!(dispatch.as_ref().unwrap().success);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(repo.list_recent_events(10, None).await.unwrap().len(), 1);
        assert!(matches!(rx.recv().await.unwrap(), AlertNotice::Transition { .. }));
        assert!(matches!(rx.recv().await.unwrap(), AlertNotice::CycleCompleted(_)));
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);
    }

    #[tokio::test]
    async fn test_missing_metric_skips_only_that_alert() {
        let (repo, orchestrator) = setup(&[("profit", 30.0)]).await;
        repo.add_config(&config("orphan", "Profit")).await.unwrap();

        let report = orchestrator.run_cycle().await.unwrap();

        assert_eq!(report.summary.events, 1);
        assert_eq!(report.summary.skipped[&SkipReason::MetricUnavailable], 1);
        assert!(matches!(
            report.outcome("orphan"),
            Some(AlertOutcome::Skipped {
                reason: SkipReason::MetricUnavailable,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_non_finite_metric_is_unavailable() {
        let (_, orchestrator) = setup(&[("profit", f64::NAN)]).await;

        let report = orchestrator.run_cycle().await.unwrap();

        assert_eq!(report.summary.skipped[&SkipReason::MetricUnavailable], 1);
        assert_eq!(report.summary.events, 0);
    }

    #[tokio::test]
    async fn test_invalid_threshold_is_config_error() {
        let (repo, orchestrator) = setup(&[("broken", 5.0)]).await;
        repo.add_config(&config("broken", "Heat")).await.unwrap();
        repo.add_threshold(&threshold("Heat", 30.0, 20.0, 10.0))
            .await
            .unwrap();

        let report = orchestrator.run_cycle().await.unwrap();

        assert!(matches!(
            report.outcome("broken"),
            Some(AlertOutcome::Skipped {
                reason: SkipReason::ConfigError,
                ..
            })
        ));
        assert_eq!(
            repo.get_state("broken").await.unwrap().last_level,
            AlertLevel::Normal
        );
    }

    #[tokio::test]
    async fn test_alert_without_threshold_is_inert() {
        let (repo, orchestrator) = setup(&[("profit", 1.0), ("lonely", 999.0)]).await;
        repo.add_config(&config("lonely", "Unthresholded")).await.unwrap();

        let report = orchestrator.run_cycle().await.unwrap();

        assert!(matches!(
            report.outcome("lonely"),
            Some(AlertOutcome::Unchanged { .. })
        ));
        assert_eq!(report.summary.events, 0);
    }

    #[tokio::test]
    async fn test_snoozed_transition_is_recorded_not_dispatched() {
        let (repo, orchestrator) = setup(&[("profit", 30.0)]).await;
        set_snooze(
            repo.as_ref(),
            "profit",
            Some(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

        let report = orchestrator.run_cycle().await.unwrap();

        assert_eq!(report.summary.events, 1);
        assert_eq!(report.summary.snoozed, 1);
        assert!(report.summary.channels.is_empty());
        assert!(matches!(
            report.outcome("profit"),
            Some(AlertOutcome::Transitioned {
                dispatch: None,
                snoozed: true,
                ..
            })
        ));
        assert_eq!(repo.list_recent_events(10, None).await.unwrap().len(), 1);
    }

    #[test]
    fn test_channel_resolver_falls_back_to_notification_type() {
        let mut by_class = HashMap::new();
        by_class.insert(
            "Portfolio".to_string(),
            ChannelMap::from_channels(&[Channel::Voice, Channel::Tts]),
        );
        let resolver = ChannelResolver::new(by_class);

        let mut cfg = config("a", "Profit");
        assert_eq!(
            resolver.for_config(&cfg),
            ChannelMap::from_channels(&[Channel::System])
        );

        cfg.notification_type = NotificationType::Sms;
        assert_eq!(
            resolver.for_config(&cfg),
            ChannelMap::from_channels(&[Channel::Sms, Channel::System])
        );

        cfg.alert_class = "Portfolio".to_string();
        assert_eq!(
            resolver.for_config(&cfg),
            ChannelMap::from_channels(&[Channel::Voice, Channel::Tts])
        );
    }
}
