//! Multi-channel dispatch with independent per-channel outcomes

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::models::{
    AlertEvent, Channel, ChannelMap, ChannelOutcome, DispatchReport, NotificationChannelResult,
    TransportError,
};

use super::ChannelRoute;

/// Skip reason for a channel that is off, or voice without a breach
pub const SKIP_DISABLED: &str = "disabled";

/// Skip reason for an enabled channel with no registered route
pub const SKIP_NOT_CONFIGURED: &str = "not_configured";

/// Routes alert events to registered channels.
///
/// The router never retries and never fails: every considered channel ends
/// up as one [`NotificationChannelResult`].
pub struct NotificationRouter {
    routes: HashMap<Channel, ChannelRoute>,
    timeout: Duration,
}

impl NotificationRouter {
    /// Create a router with a per-transport timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            timeout,
        }
    }

    /// Register or replace the route for a channel
    #[must_use]
    pub fn with_route(mut self, channel: Channel, route: ChannelRoute) -> Self {
        self.routes.insert(channel, route);
        self
    }

    /// Channels with a registered route
    pub fn configured_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.routes.contains_key(c))
            .collect()
    }

    /// Attempt every channel in the map concurrently and collect the results
    pub async fn dispatch(&self, event: &AlertEvent, channels: &ChannelMap) -> DispatchReport {
        let attempts = Channel::ALL
            .into_iter()
            .map(|channel| self.dispatch_channel(channel, event, channels));

        let results: BTreeMap<Channel, NotificationChannelResult> = join_all(attempts)
            .await
            .into_iter()
            .map(|result| (result.channel, result))
            .collect();

        let success = results.values().any(|r| r.ok);

        for result in results.values() {
            let outcome = match result.outcome() {
                ChannelOutcome::Ok => "ok",
                ChannelOutcome::Skipped => "skipped",
                ChannelOutcome::Failed => "failed",
            };
            metrics::counter!(
                "tripwire_notifications_total",
                "channel" => result.channel.as_str(),
                "outcome" => outcome
            )
            .increment(1);
        }

        debug!(
            event_id = %event.id,
            alert_id = %event.alert_id,
            breach = event.breach,
            success,
            "Dispatch finished"
        );

        DispatchReport {
            event_id: event.id,
            breach: event.breach,
            results,
            success,
        }
    }

    async fn dispatch_channel(
        &self,
        channel: Channel,
        event: &AlertEvent,
        channels: &ChannelMap,
    ) -> NotificationChannelResult {
        if !channels.is_enabled(channel) {
            return NotificationChannelResult::skipped(channel, SKIP_DISABLED);
        }

        let Some(route) = self.routes.get(&channel) else {
            return NotificationChannelResult::skipped(channel, SKIP_NOT_CONFIGURED);
        };

        if route.policy.requires_breach && !event.breach {
            debug!(channel = %channel, alert_id = %event.alert_id, "Channel reserved for breaches");
            return NotificationChannelResult::skipped(channel, SKIP_DISABLED);
        }

        if route.policy.requires_credentials && !probe_passes(route, channel) {
            let reason = format!("{}_missing_creds", route.transport.provider());
            warn!(channel = %channel, alert_id = %event.alert_id, reason = %reason, "Skipping channel");
            return NotificationChannelResult::skipped(channel, reason);
        }

        let send = AssertUnwindSafe(route.transport.send(event, route.recipient.as_deref()))
            .catch_unwind();

        let outcome = match tokio::time::timeout(self.timeout, send).await {
            Err(_) => Err(TransportError::timeout(self.timeout)),
            Ok(Err(panic)) => Err(TransportError::new("panic", panic_message(&*panic))),
            Ok(Ok(result)) => result,
        };

        match outcome {
            Ok(receipt) => {
                info!(
                    channel = %channel,
                    provider = route.transport.provider(),
                    alert_id = %event.alert_id,
                    receipt = receipt.as_deref().unwrap_or("-"),
                    "Notification sent"
                );
                NotificationChannelResult::delivered(channel, receipt)
            }
            Err(mut error) => {
                if error.hint.is_none() {
                    error.hint = error
                        .code
                        .as_deref()
                        .and_then(|code| route.transport.hint(code))
                        .map(String::from);
                }
                warn!(
                    channel = %channel,
                    provider = route.transport.provider(),
                    alert_id = %event.alert_id,
                    error = %error,
                    "Notification failed"
                );
                NotificationChannelResult::failed(channel, error)
            }
        }
    }
}

fn probe_passes(route: &ChannelRoute, channel: Channel) -> bool {
    let Some(probe) = &route.probe else {
        return false;
    };
    std::panic::catch_unwind(AssertUnwindSafe(|| probe.has_credentials(channel))).unwrap_or(false)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "transport panicked".to_string()
    }
}
