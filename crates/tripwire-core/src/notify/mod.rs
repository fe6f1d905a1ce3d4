//! Notification delivery
//!
//! A [`NotificationRouter`] fans an alert event out to independently gated
//! channel routes. Each route pairs a [`ChannelTransport`] with an optional
//! [`CredentialProbe`] and a [`ChannelPolicy`].

mod router;
mod system;
mod tts;
pub mod twilio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::NotificationsConfig;
use crate::error::Result;
use crate::models::{AlertEvent, Channel, TransportError};

pub use router::NotificationRouter;
pub use system::SystemToast;
pub use tts::TtsTransport;
pub use twilio::{TwilioClient, TwilioCredentials, TwilioSms, TwilioVoice};

/// Provider receipt on success (call SID, message SID, ...)
pub type SendResult = std::result::Result<Option<String>, TransportError>;

/// Delivers an event over one provider
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Provider name, used in skip reasons such as `twilio_missing_creds`
    fn provider(&self) -> &str;

    /// Send the event to a recipient
    async fn send(&self, event: &AlertEvent, recipient: Option<&str>) -> SendResult;

    /// Operator hint for a provider error code
    fn hint(&self, _code: &str) -> Option<&'static str> {
        None
    }
}

/// Reports whether a provider is configured well enough to try
pub trait CredentialProbe: Send + Sync {
    /// Whether credentials for the channel are present
    fn has_credentials(&self, channel: Channel) -> bool;
}

/// Gating applied before a transport is called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    /// Only escalations (`event.breach`) may use this channel
    pub requires_breach: bool,
    /// The credential probe must pass before any network call
    pub requires_credentials: bool,
}

impl ChannelPolicy {
    /// Default gating for a channel: voice is breach- and credential-gated,
    /// SMS is credential-gated, system and TTS are ungated.
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Voice => Self {
                requires_breach: true,
                requires_credentials: true,
            },
            Channel::Sms => Self {
                requires_breach: false,
                requires_credentials: true,
            },
            Channel::System | Channel::Tts => Self {
                requires_breach: false,
                requires_credentials: false,
            },
        }
    }
}

/// A registered channel
#[derive(Clone)]
pub struct ChannelRoute {
    /// Delivery implementation
    pub transport: Arc<dyn ChannelTransport>,
    /// Credential check, consulted when the policy requires it
    pub probe: Option<Arc<dyn CredentialProbe>>,
    /// Gating rules
    pub policy: ChannelPolicy,
    /// Recipient passed to the transport
    pub recipient: Option<String>,
}

impl ChannelRoute {
    /// Route with the default policy for `channel` and no probe
    pub fn new(channel: Channel, transport: Arc<dyn ChannelTransport>) -> Self {
        Self {
            transport,
            probe: None,
            policy: ChannelPolicy::for_channel(channel),
            recipient: None,
        }
    }

    /// Attach a credential probe
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn CredentialProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Override the gating policy
    #[must_use]
    pub fn with_policy(mut self, policy: ChannelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the recipient
    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// Build a router with the transports enabled in configuration
pub fn router_from_config(
    config: &NotificationsConfig,
    timeout: Duration,
) -> Result<NotificationRouter> {
    let mut router = NotificationRouter::new(timeout);

    if config.twilio.enabled {
        let client = Arc::new(TwilioClient::from_config(&config.twilio, timeout)?);
        let probe: Arc<dyn CredentialProbe> = client.clone();
        let recipient = client.default_recipient().map(String::from);

        let voice: Arc<dyn ChannelTransport> = Arc::new(TwilioVoice::new(client.clone()));
        let sms: Arc<dyn ChannelTransport> = Arc::new(TwilioSms::new(client.clone()));

        for (channel, transport) in [(Channel::Voice, voice), (Channel::Sms, sms)] {
            let mut route = ChannelRoute::new(channel, transport).with_probe(probe.clone());
            route.recipient.clone_from(&recipient);
            router = router.with_route(channel, route);
        }
    }

    if config.system.enabled {
        router = router.with_route(
            Channel::System,
            ChannelRoute::new(Channel::System, Arc::new(SystemToast::new())),
        );
    }

    if config.tts.enabled {
        router = router.with_route(
            Channel::Tts,
            ChannelRoute::new(Channel::Tts, Arc::new(TtsTransport::from_config(&config.tts))),
        );
    }

    info!(channels = ?router.configured_channels(), "Notification router ready");
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_from_config_registers_enabled_channels() {
        let mut config = NotificationsConfig::default();
        config.tts.enabled = false;

        let router = router_from_config(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(
            router.configured_channels(),
            vec![Channel::Voice, Channel::Sms, Channel::System]
        );

        config.twilio.enabled = false;
        let router = router_from_config(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(router.configured_channels(), vec![Channel::System]);
    }

    #[test]
    fn test_default_policies() {
        assert!(ChannelPolicy::for_channel(Channel::Voice).requires_breach);
        assert!(ChannelPolicy::for_channel(Channel::Sms).requires_credentials);
        assert!(!ChannelPolicy::for_channel(Channel::System).requires_credentials);
    }
}
