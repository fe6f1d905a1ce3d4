//! Alert data models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Direction in which a metric is compared against its thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    /// Higher values are worse
    Above,
    /// Lower values are worse
    Below,
}

impl Condition {
    /// Canonical string form used in storage and config
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Above => "ABOVE",
            Self::Below => "BELOW",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ABOVE" => Ok(Self::Above),
            "BELOW" => Ok(Self::Below),
            other => Err(Error::validation(format!("unknown condition '{other}'"))),
        }
    }
}

/// Severity classification of an alert at a point in time
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    /// No tier reached
    #[default]
    Normal,
    /// Low tier reached
    Low,
    /// Medium tier reached
    Medium,
    /// High tier reached
    High,
}

impl AlertLevel {
    /// Canonical string form used in storage and config
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    /// Levels that require escalation
    pub fn is_breach(self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(Error::validation(format!("unknown alert level '{other}'"))),
        }
    }
}

/// Preferred notification style of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    /// Text message plus local toast
    #[default]
    Sms,
    /// Local toast only
    Windows,
}

impl NotificationType {
    /// Canonical string form used in storage and config
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::Windows => "WINDOWS",
        }
    }
}

impl FromStr for NotificationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SMS" => Ok(Self::Sms),
            "WINDOWS" => Ok(Self::Windows),
            other => Err(Error::validation(format!(
                "unknown notification type '{other}'"
            ))),
        }
    }
}

/// A configured alert rule.
///
/// Immutable once created; an edit replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Unique identifier
    pub id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Metric family, e.g. `Profit` or `TravelPercentLiquid`
    pub alert_type: String,

    /// Scope of the metric, e.g. `Position` or `Portfolio`
    pub alert_class: String,

    /// Comparison direction
    pub condition: Condition,

    /// Trigger value the operator configured
    pub trigger_value: f64,

    /// Notification style
    #[serde(default)]
    pub notification_type: NotificationType,

    /// Position this alert watches, if any
    #[serde(default)]
    pub position_reference_id: Option<String>,

    /// When the config was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Mutable evaluation state, exactly one per [`AlertConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    /// The config this state belongs to
    pub alert_id: String,

    /// Level at the last evaluation
    pub last_level: AlertLevel,

    /// Metric value at the last evaluation
    pub last_value: Option<f64>,

    /// Id of the last transition event
    pub last_event_id: Option<Uuid>,

    /// Transitions before this instant are recorded but not dispatched
    pub snoozed_until: Option<DateTime<Utc>>,

    /// When the state was last written
    pub updated_at: DateTime<Utc>,
}

impl AlertState {
    /// Fresh state at level NORMAL
    pub fn new(alert_id: impl Into<String>) -> Self {
        Self {
            alert_id: alert_id.into(),
            last_level: AlertLevel::Normal,
            last_value: None,
            last_event_id: None,
            snoozed_until: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether dispatch is suppressed at `now`
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }
}

/// A level transition. Append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// The alert that transitioned
    pub alert_id: String,

    /// Level before the transition
    pub previous_level: AlertLevel,

    /// Level after the transition
    pub level: AlertLevel,

    /// Metric snapshot that caused the transition
    pub metric_value: f64,

    /// Human-readable message
    pub message: String,

    /// When the transition was observed
    pub created_at: DateTime<Utc>,

    /// Whether the new level requires escalation
    pub breach: bool,
}
