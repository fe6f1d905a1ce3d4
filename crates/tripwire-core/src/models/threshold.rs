//! Threshold tiers

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::{AlertLevel, Condition};
use crate::error::{Error, Result};

/// Layout of BELOW tiers.
///
/// Each alert type has one convention, see [`TierOrder::for_alert_type`].
/// ABOVE thresholds always ascend and ignore this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierOrder {
    /// `low > medium > high`; a tier is reached at or below its value.
    /// Used for distances where smaller is closer to danger.
    Descending,
    /// `low < medium < high` as depths below zero; a tier is reached at or
    /// below `-tier`. Used for signed travel percentages.
    Depth,
}

impl TierOrder {
    /// BELOW convention for an alert type
    pub fn for_alert_type(alert_type: &str) -> Self {
        if alert_type.eq_ignore_ascii_case("TravelPercent") {
            Self::Depth
        } else {
            Self::Descending
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Descending => "descending",
            Self::Depth => "depth",
        }
    }
}

impl fmt::Display for TierOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "descending" => Ok(Self::Descending),
            "depth" => Ok(Self::Depth),
            other => Err(Error::validation(format!("unknown tier order '{other}'"))),
        }
    }
}

/// Low/medium/high boundaries for one `(alert_type, alert_class, condition)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Unique identifier
    pub id: String,

    /// Metric family this threshold applies to
    pub alert_type: String,

    /// Metric scope this threshold applies to
    pub alert_class: String,

    /// Label of the metric source
    #[serde(default)]
    pub metric_key: String,

    /// Comparison direction
    pub condition: Condition,

    /// Low tier boundary
    pub low: f64,

    /// Medium tier boundary
    pub medium: f64,

    /// High tier boundary
    pub high: f64,

    /// Overrides the alert type's BELOW convention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_order: Option<TierOrder>,

    /// Disabled thresholds are never returned by lookups
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Most recently modified wins on duplicates
    #[serde(default = "Utc::now")]
    pub last_modified: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Threshold {
    /// BELOW convention in effect: the explicit override, else the alert type's
    pub fn effective_tier_order(&self) -> TierOrder {
        self.tier_order
            .unwrap_or_else(|| TierOrder::for_alert_type(&self.alert_type))
    }

    /// Check that tiers are finite and strictly ordered.
    ///
    /// ABOVE requires `low < medium < high`. BELOW follows the effective
    /// [`TierOrder`].
    pub fn validate(&self) -> Result<()> {
        let tiers = [self.low, self.medium, self.high];
        if tiers.iter().any(|t| !t.is_finite()) {
            return Err(Error::config(format!(
                "threshold {} has a non-finite tier",
                self.id
            )));
        }

        let ascending = self.low < self.medium && self.medium < self.high;
        let ordered = match (self.condition, self.effective_tier_order()) {
            (Condition::Above, _) | (Condition::Below, TierOrder::Depth) => ascending,
            (Condition::Below, TierOrder::Descending) => {
                self.low > self.medium && self.medium > self.high
            }
        };
        if !ordered {
            return Err(Error::config(format!(
                "threshold {} tiers are not strictly ordered for {} {} (low={}, medium={}, high={})",
                self.id,
                self.condition,
                self.effective_tier_order(),
                self.low,
                self.medium,
                self.high
            )));
        }

        Ok(())
    }

    /// Classify a metric value into a level
    pub fn classify(&self, value: f64) -> AlertLevel {
        let reached = |tier: f64| match self.condition {
            Condition::Above => value >= self.cutoff(tier),
            Condition::Below => value <= self.cutoff(tier),
        };

        if reached(self.high) {
            AlertLevel::High
        } else if reached(self.medium) {
            AlertLevel::Medium
        } else if reached(self.low) {
            AlertLevel::Low
        } else {
            AlertLevel::Normal
        }
    }

    /// Value the metric is compared against for a level, `None` for NORMAL
    pub fn boundary(&self, level: AlertLevel) -> Option<f64> {
        let tier = match level {
            AlertLevel::Normal => return None,
            AlertLevel::Low => self.low,
            AlertLevel::Medium => self.medium,
            AlertLevel::High => self.high,
        };
        Some(self.cutoff(tier))
    }

    fn cutoff(&self, tier: f64) -> f64 {
        match (self.condition, self.effective_tier_order()) {
            (Condition::Below, TierOrder::Depth) => -tier,
            _ => tier,
        }
    }
}
