//! Alert evaluation
//!
//! Pure classification of a metric snapshot against threshold tiers. No I/O,
//! no clock reads beyond the convenience wrapper [`evaluate`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AlertConfig, AlertEvent, AlertLevel, AlertState, Condition, Threshold};

/// Namespace for deterministic event ids
const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_4d0a_8e55_1c0f_7a2b_d913);

/// Result of evaluating one alert
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// State to persist
    pub state: AlertState,
    /// Transition event, if the level changed
    pub event: Option<AlertEvent>,
}

impl Evaluation {
    /// Whether the level changed
    pub fn transitioned(&self) -> bool {
        self.event.is_some()
    }
}

/// Evaluate an alert at the current time
pub fn evaluate(
    config: &AlertConfig,
    state: &AlertState,
    metric_value: f64,
    threshold: Option<&Threshold>,
) -> Evaluation {
    evaluate_at(config, state, metric_value, threshold, Utc::now())
}

/// Evaluate an alert at an explicit instant.
///
/// Identical inputs always produce identical outputs, including the event id.
pub fn evaluate_at(
    config: &AlertConfig,
    state: &AlertState,
    metric_value: f64,
    threshold: Option<&Threshold>,
    now: DateTime<Utc>,
) -> Evaluation {
    let Some(threshold) = threshold.filter(|t| t.enabled) else {
        return Evaluation {
            state: state.clone(),
            event: None,
        };
    };

    let level = threshold.classify(metric_value);

    let mut new_state = state.clone();
    new_state.last_value = Some(metric_value);
    new_state.updated_at = now;

    if level == state.last_level {
        return Evaluation {
            state: new_state,
            event: None,
        };
    }

    let event = AlertEvent {
        id: event_id(&config.id, state.last_level, level, now),
        alert_id: config.id.clone(),
        previous_level: state.last_level,
        level,
        metric_value,
        message: format_message(config, threshold, level, metric_value),
        created_at: now,
        breach: level.is_breach(),
    };

    new_state.last_level = level;
    new_state.last_event_id = Some(event.id);

    Evaluation {
        state: new_state,
        event: Some(event),
    }
}

fn event_id(alert_id: &str, from: AlertLevel, to: AlertLevel, now: DateTime<Utc>) -> Uuid {
    let name = format!(
        "{alert_id}:{from}:{to}:{}",
        now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros())
    );
    Uuid::new_v5(&EVENT_NAMESPACE, name.as_bytes())
}

/// Format the human-readable event message
fn format_message(
    config: &AlertConfig,
    threshold: &Threshold,
    level: AlertLevel,
    value: f64,
) -> String {
    let subject = match &config.position_reference_id {
        Some(position) => format!("{} ({} {})", config.alert_type, config.alert_class, position),
        None => format!("{} ({})", config.alert_type, config.alert_class),
    };

    let Some(boundary) = threshold.boundary(level) else {
        return format!("{subject} recovered to {level}: {value:.2}");
    };

    let (verb, relation) = match config.condition {
        Condition::Above => ("rose", "at or above"),
        Condition::Below => ("fell", "at or below"),
    };

    format!("{subject} {verb} to {level}: {value:.2} is {relation} {boundary:.2}")
}
