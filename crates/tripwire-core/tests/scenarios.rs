//! End-to-end cycles over the in-memory repository

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use tripwire::alerting::{
    AlertOrchestrator, AlertOutcome, AlertRepository, ChannelResolver, MemoryAlertRepository,
    MetricFeedAdapter, SkipReason,
};
use tripwire::models::{
    AlertConfig, AlertEvent, AlertLevel, AlertState, Channel, ChannelMap, Condition,
    NotificationType, Threshold, TransportError,
};
use tripwire::notify::{
    ChannelRoute, ChannelTransport, CredentialProbe, NotificationRouter, SendResult,
};
use tripwire::{Error, Result};

/// Feed whose values can change between cycles
#[derive(Default)]
struct SettableFeed {
    values: Mutex<HashMap<String, f64>>,
}

impl SettableFeed {
    fn set(&self, alert_id: &str, value: f64) {
        self.values.lock().insert(alert_id.to_string(), value);
    }
}

#[async_trait]
impl MetricFeedAdapter for SettableFeed {
    async fn metric_for(&self, config: &AlertConfig) -> Result<f64> {
        self.values
            .lock()
            .get(&config.id)
            .copied()
            .ok_or_else(|| Error::metric_unavailable(&config.id, "no value"))
    }
}

/// Repository that fails `save_state` for one alert and the first
/// `append_failures` calls to `append_event`
struct FlakyRepository {
    inner: MemoryAlertRepository,
    broken: String,
    append_failures: AtomicUsize,
}

impl FlakyRepository {
    fn new(broken: &str, append_failures: usize) -> Self {
        Self {
            inner: MemoryAlertRepository::new(),
            broken: broken.to_string(),
            append_failures: AtomicUsize::new(append_failures),
        }
    }
}

#[async_trait]
impl AlertRepository for FlakyRepository {
    async fn ensure_schema(&self) -> Result<()> {
        self.inner.ensure_schema().await
    }

    async fn add_config(&self, config: &AlertConfig) -> Result<()> {
        self.inner.add_config(config).await
    }

    async fn delete_config(&self, id: &str) -> Result<bool> {
        self.inner.delete_config(id).await
    }

    async fn get_config(&self, id: &str) -> Result<AlertConfig> {
        self.inner.get_config(id).await
    }

    async fn get_state(&self, alert_id: &str) -> Result<AlertState> {
        self.inner.get_state(alert_id).await
    }

    async fn iterate_configs_with_state(&self) -> Result<Vec<(AlertConfig, AlertState)>> {
        self.inner.iterate_configs_with_state().await
    }

    async fn save_state(&self, state: &AlertState) -> Result<()> {
        if state.alert_id == self.broken {
            return Err(Error::storage("disk full"));
        }
        self.inner.save_state(state).await
    }

    async fn add_threshold(&self, threshold: &Threshold) -> Result<()> {
        self.inner.add_threshold(threshold).await
    }

    async fn thresholds_for(
        &self,
        alert_type: &str,
        alert_class: &str,
        condition: Condition,
    ) -> Result<Option<Threshold>> {
        self.inner
            .thresholds_for(alert_type, alert_class, condition)
            .await
    }

    async fn append_event(&self, event: &AlertEvent) -> Result<()> {
        let remaining = self.append_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.append_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::storage("connection reset"));
        }
        self.inner.append_event(event).await
    }

    async fn list_recent_events(
        &self,
        limit: usize,
        alert_id: Option<&str>,
    ) -> Result<Vec<AlertEvent>> {
        self.inner.list_recent_events(limit, alert_id).await
    }
}

struct CountingTransport {
    provider: &'static str,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingTransport {
    fn new(provider: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            provider,
            fail,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelTransport for CountingTransport {
    fn provider(&self) -> &str {
        self.provider
    }

    async fn send(&self, _event: &AlertEvent, _recipient: Option<&str>) -> SendResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(TransportError::new("20003", "Authenticate"))
        } else {
            Ok(None)
        }
    }
}

struct Probe(bool);

impl CredentialProbe for Probe {
    fn has_credentials(&self, _channel: Channel) -> bool {
        self.0
    }
}

fn profit_config(id: &str) -> AlertConfig {
    AlertConfig {
        id: id.to_string(),
        description: "Position profit".to_string(),
        alert_type: "Profit".to_string(),
        alert_class: "Position".to_string(),
        condition: Condition::Above,
        trigger_value: 25.0,
        notification_type: NotificationType::Windows,
        position_reference_id: None,
        created_at: Utc::now(),
    }
}

fn profit_threshold() -> Threshold {
    Threshold {
        id: "profit-position".to_string(),
        alert_type: "Profit".to_string(),
        alert_class: "Position".to_string(),
        metric_key: "position.profit".to_string(),
        condition: Condition::Above,
        low: 10.0,
        medium: 20.0,
        high: 25.0,
        tier_order: None,
        enabled: true,
        last_modified: Utc::now(),
    }
}

async fn seed(repo: &dyn AlertRepository, ids: &[&str]) {
    repo.add_threshold(&profit_threshold()).await.unwrap();
    for id in ids {
        repo.add_config(&profit_config(id)).await.unwrap();
    }
}

fn system_router(system: Arc<CountingTransport>) -> NotificationRouter {
    NotificationRouter::new(Duration::from_secs(1))
        .with_route(Channel::System, ChannelRoute::new(Channel::System, system))
}

#[tokio::test]
async fn scenario_a_high_breach_raises_one_event() {
    let repo = Arc::new(MemoryAlertRepository::new());
    seed(repo.as_ref(), &["profit-sol"]).await;
    let feed = Arc::new(SettableFeed::default());
    feed.set("profit-sol", 30.0);
    let system = CountingTransport::new("console", false);

    let orchestrator =
        AlertOrchestrator::new(repo.clone(), feed, Arc::new(system_router(system.clone())));
    let report = orchestrator.run_cycle().await.unwrap();

    assert_eq!(report.summary.events, 1);
    let event = report.events().next().unwrap();
    assert_eq!(event.level, AlertLevel::High);
    assert!(event.breach);

    let state = repo.get_state("profit-sol").await.unwrap();
    assert_eq!(state.last_level, AlertLevel::High);
    assert_eq!(state.last_value, Some(30.0));
    assert_eq!(state.last_event_id, Some(event.id));
    assert_eq!(system.calls(), 1);
}

#[tokio::test]
async fn scenario_b_sustained_breach_does_not_flood() {
    let repo = Arc::new(MemoryAlertRepository::new());
    seed(repo.as_ref(), &["profit-sol"]).await;
    let feed = Arc::new(SettableFeed::default());
    let system = CountingTransport::new("console", false);
    let orchestrator = AlertOrchestrator::new(
        repo.clone(),
        feed.clone(),
        Arc::new(system_router(system.clone())),
    );

    feed.set("profit-sol", 30.0);
    orchestrator.run_cycle().await.unwrap();

    feed.set("profit-sol", 32.0);
    let second = orchestrator.run_cycle().await.unwrap();

    assert_eq!(second.summary.events, 0);
    assert!(matches!(
        second.outcome("profit-sol"),
        Some(AlertOutcome::Unchanged { .. })
    ));
    assert_eq!(
        repo.get_state("profit-sol").await.unwrap().last_value,
        Some(32.0)
    );
    assert_eq!(repo.list_recent_events(10, None).await.unwrap().len(), 1);
    assert_eq!(system.calls(), 1);

    // back-to-back with no metric change
    let third = orchestrator.run_cycle().await.unwrap();
    assert_eq!(third.summary.events, 0);
}

#[tokio::test]
async fn scenario_c_missing_credentials_keep_system_channel() {
    let repo = Arc::new(MemoryAlertRepository::new());
    seed(repo.as_ref(), &["profit-sol"]).await;
    let feed = Arc::new(SettableFeed::default());
    feed.set("profit-sol", 30.0);

    let voice = CountingTransport::new("twilio", false);
    let system = CountingTransport::new("console", false);
    let router = NotificationRouter::new(Duration::from_secs(1))
        .with_route(
            Channel::Voice,
            ChannelRoute::new(Channel::Voice, voice.clone()).with_probe(Arc::new(Probe(false))),
        )
        .with_route(Channel::System, ChannelRoute::new(Channel::System, system.clone()));

    let mut by_class = HashMap::new();
    by_class.insert(
        "Position".to_string(),
        ChannelMap::from_channels(&[Channel::Voice, Channel::System]),
    );

    let orchestrator = AlertOrchestrator::new(repo, feed, Arc::new(router))
        .with_channels(ChannelResolver::new(by_class));
    let report = orchestrator.run_cycle().await.unwrap();

    let Some(AlertOutcome::Transitioned {
        dispatch: Some(dispatch),
        ..
    }) = report.outcome("profit-sol")
    else {
        panic!("expected a dispatched transition");
    };

    let voice_result = dispatch.result(Channel::Voice).unwrap();
    assert!(!voice_result.ok);
    assert_eq!(voice_result.skip_reason.as_deref(), Some("twilio_missing_creds"));
    assert!(dispatch.result(Channel::System).unwrap().ok);
    assert_eq!(voice.calls(), 0);

    let counts = report.summary.channels[&Channel::Voice];
    assert_eq!(counts.skipped, 1);
    assert_eq!(report.summary.channels[&Channel::System].ok, 1);
}

#[tokio::test]
async fn failing_alert_does_not_block_the_others() {
    let repo = Arc::new(FlakyRepository::new("profit-b", 0));
    seed(repo.as_ref(), &["profit-a", "profit-b", "profit-c", "profit-d"]).await;

    let feed = Arc::new(SettableFeed::default());
    feed.set("profit-a", 30.0);
    feed.set("profit-b", 30.0);
    feed.set("profit-d", 15.0);

    let system = CountingTransport::new("console", false);
    let orchestrator = AlertOrchestrator::new(
        repo.clone(),
        feed,
        Arc::new(system_router(system.clone())),
    );
    let report = orchestrator.run_cycle().await.unwrap();

    assert!(matches!(
        report.outcome("profit-b"),
        Some(AlertOutcome::Skipped {
            reason: SkipReason::StorageError,
            ..
        })
    ));
    assert!(matches!(
        report.outcome("profit-c"),
        Some(AlertOutcome::Skipped {
            reason: SkipReason::MetricUnavailable,
            ..
        })
    ));
    assert_eq!(report.summary.events, 2);
    assert_eq!(report.summary.skipped_total(), 2);

    // nothing was recorded or dispatched for the alert whose state failed to save
    assert!(repo
        .list_recent_events(10, Some("profit-b"))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(system.calls(), 2);
    assert_eq!(
        repo.get_state("profit-d").await.unwrap().last_level,
        AlertLevel::Low
    );
}

#[tokio::test]
async fn failing_channel_does_not_affect_other_channels() {
    let repo = Arc::new(MemoryAlertRepository::new());
    seed(repo.as_ref(), &["profit-sol"]).await;
    let feed = Arc::new(SettableFeed::default());
    feed.set("profit-sol", 30.0);

    let sms = CountingTransport::new("twilio", true);
    let system = CountingTransport::new("console", false);
    let tts = CountingTransport::new("tts", false);
    let router = NotificationRouter::new(Duration::from_secs(1))
        .with_route(
            Channel::Sms,
            ChannelRoute::new(Channel::Sms, sms.clone()).with_probe(Arc::new(Probe(true))),
        )
        .with_route(Channel::System, ChannelRoute::new(Channel::System, system.clone()))
        .with_route(Channel::Tts, ChannelRoute::new(Channel::Tts, tts.clone()));

    let mut by_class = HashMap::new();
    by_class.insert(
        "Position".to_string(),
        ChannelMap::from_channels(&[Channel::Sms, Channel::System, Channel::Tts]),
    );
    let orchestrator = AlertOrchestrator::new(repo, feed, Arc::new(router))
        .with_channels(ChannelResolver::new(by_class));

    let report = orchestrator.run_cycle().await.unwrap();
    let counts = &report.summary.channels;

    assert_eq!(counts[&Channel::Sms].failed, 1);
    assert_eq!(counts[&Channel::System].ok, 1);
    assert_eq!(counts[&Channel::Tts].ok, 1);
    assert_eq!(counts[&Channel::Voice].skipped, 1);
    assert_eq!(sms.calls(), 1);
}

#[tokio::test]
async fn recovery_emits_non_breach_event() {
    let repo = Arc::new(MemoryAlertRepository::new());
    seed(repo.as_ref(), &["profit-sol"]).await;
    let feed = Arc::new(SettableFeed::default());
    let system = CountingTransport::new("console", false);
    let orchestrator =
        AlertOrchestrator::new(repo.clone(), feed.clone(), Arc::new(system_router(system)));

    feed.set("profit-sol", 26.0);
    orchestrator.run_cycle().await.unwrap();
    feed.set("profit-sol", 2.0);
    let report = orchestrator.run_cycle().await.unwrap();

    let event = report.events().next().unwrap();
    assert_eq!(event.previous_level, AlertLevel::High);
    assert_eq!(event.level, AlertLevel::Normal);
    assert!(!event.breach);

    let events = repo.list_recent_events(10, Some("profit-sol")).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].level, AlertLevel::Normal);
}

#[tokio::test]
async fn failed_event_append_is_retried_next_cycle() {
    let repo = Arc::new(FlakyRepository::new("", 1));
    seed(repo.as_ref(), &["profit-sol"]).await;
    let feed = Arc::new(SettableFeed::default());
    feed.set("profit-sol", 30.0);
    let system = CountingTransport::new("console", false);
    let orchestrator = AlertOrchestrator::new(
        repo.clone(),
        feed,
        Arc::new(system_router(system.clone())),
    );

    let first = orchestrator.run_cycle().await.unwrap();
    assert!(matches!(
        first.outcome("profit-sol"),
        Some(AlertOutcome::Skipped {
            reason: SkipReason::StorageError,
            ..
        })
    ));
    let state = repo.get_state("profit-sol").await.unwrap();
    assert_eq!(state.last_level, AlertLevel::Normal);
    assert_eq!(state.last_event_id, None);
    assert_eq!(system.calls(), 0);

    let second = orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.summary.events, 1);
    let stored = repo.list_recent_events(10, Some("profit-sol")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].level, AlertLevel::High);
    assert_eq!(system.calls(), 1);
}
