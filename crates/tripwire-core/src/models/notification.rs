//! Notification channel models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// A notification delivery mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Phone call
    Voice,
    /// Text message
    Sms,
    /// Local toast/banner
    System,
    /// Text-to-speech on the host
    Tts,
}

impl Channel {
    /// Every known channel, in report order
    pub const ALL: [Channel; 4] = [Self::Voice, Self::Sms, Self::System, Self::Tts];

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Sms => "sms",
            Self::System => "system",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "voice" => Ok(Self::Voice),
            "sms" => Ok(Self::Sms),
            "system" => Ok(Self::System),
            "tts" => Ok(Self::Tts),
            other => Err(Error::validation(format!("unknown channel '{other}'"))),
        }
    }
}

/// Channel enablement map. Channels left out of configuration are disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    /// Phone call
    pub voice: bool,
    /// Text message
    pub sms: bool,
    /// Local toast
    pub system: bool,
    /// Text-to-speech
    pub tts: bool,
}

impl ChannelMap {
    /// Whether a channel is requested
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Voice => self.voice,
            Channel::Sms => self.sms,
            Channel::System => self.system,
            Channel::Tts => self.tts,
        }
    }

    /// Build a map from a list of channel names
    pub fn from_channels(channels: &[Channel]) -> Self {
        let mut map = Self::default();
        for channel in channels {
            match channel {
                Channel::Voice => map.voice = true,
                Channel::Sms => map.sms = true,
                Channel::System => map.system = true,
                Channel::Tts => map.tts = true,
            }
        }
        map
    }

    /// Whether no channel is requested
    pub fn is_empty(&self) -> bool {
        Channel::ALL.iter().all(|c| !self.is_enabled(*c))
    }
}

/// Transport failure for one channel, classified for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{}{}{}", code_prefix(.code), .message, hint_suffix(.hint))]
pub struct TransportError {
    /// Provider or local error code (`timeout`, `20003`, ...)
    pub code: Option<String>,
    /// Compact message
    pub message: String,
    /// Operator-facing hint looked up from the code
    pub hint: Option<String>,
}

fn code_prefix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!("[{c}] ")).unwrap_or_default()
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default()
}

impl TransportError {
    /// Create an error with a code
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            hint: None,
        }
    }

    /// Timed out waiting for the transport
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            "timeout",
            format!("no response after {}", humantime::format_duration(after)),
        )
    }
}

/// Outcome of one channel for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannelResult {
    /// Channel name
    pub channel: Channel,

    /// Whether the transport accepted the notification
    pub ok: bool,

    /// Why no attempt was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Free-form diagnostic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Classified transport failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportError>,
}

impl NotificationChannelResult {
    /// Transport accepted the notification
    pub fn delivered(channel: Channel, detail: Option<String>) -> Self {
        Self {
            channel,
            ok: true,
            skip_reason: None,
            detail,
            error: None,
        }
    }

    /// No attempt was made
    pub fn skipped(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            ok: false,
            skip_reason: Some(reason.into()),
            detail: None,
            error: None,
        }
    }

    /// Attempt failed
    pub fn failed(channel: Channel, error: TransportError) -> Self {
        Self {
            channel,
            ok: false,
            skip_reason: None,
            detail: Some(error.to_string()),
            error: Some(error),
        }
    }

    /// Coarse outcome for counting
    pub fn outcome(&self) -> ChannelOutcome {
        if self.ok {
            ChannelOutcome::Ok
        } else if self.skip_reason.is_some() {
            ChannelOutcome::Skipped
        } else {
            ChannelOutcome::Failed
        }
    }
}

/// Coarse per-channel outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOutcome {
    /// Delivered
    Ok,
    /// Not attempted
    Skipped,
    /// Attempted and failed
    Failed,
}

/// Per-channel results for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Event that was dispatched
    pub event_id: Uuid,

    /// Breach flag of the event
    pub breach: bool,

    /// One result per channel named in the enablement map
    pub results: BTreeMap<Channel, NotificationChannelResult>,

    /// Whether any enabled channel succeeded
    pub success: bool,
}

impl DispatchReport {
    /// Result for one channel
    pub fn result(&self, channel: Channel) -> Option<&NotificationChannelResult> {
        self.results.get(&channel)
    }
}
