//! Local system toast rendered as a terminal banner

use async_trait::async_trait;
use console::{style, Term};

use crate::models::{AlertEvent, AlertLevel, TransportError};

use super::{ChannelTransport, SendResult};

/// Writes a highlighted one-line banner to a terminal
pub struct SystemToast {
    term: Term,
}

impl SystemToast {
    /// Toast on standard error
    pub fn new() -> Self {
        Self::with_term(Term::stderr())
    }

    /// Toast on a specific terminal handle
    pub fn with_term(term: Term) -> Self {
        Self { term }
    }
}

impl Default for SystemToast {
    fn default() -> Self {
        Self::new()
    }
}

fn banner(event: &AlertEvent) -> String {
    let tag = format!("[{}]", event.level);
    let tag = match event.level {
        AlertLevel::High => style(tag).red().bold(),
        AlertLevel::Medium => style(tag).yellow().bold(),
        AlertLevel::Low => style(tag).cyan(),
        AlertLevel::Normal => style(tag).green(),
    };
    format!(
        "{} {} {}",
        tag,
        style(&event.alert_id).bold(),
        event.message
    )
}

#[async_trait]
impl ChannelTransport for SystemToast {
    fn provider(&self) -> &str {
        "console"
    }

    async fn send(&self, event: &AlertEvent, _recipient: Option<&str>) -> SendResult {
        let line = banner(event);
        self.term
            .write_line(&line)
            .map_err(|e| TransportError::new("io", e.to_string()))?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(level: AlertLevel) -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4(),
            alert_id: "heat-eth".to_string(),
            previous_level: AlertLevel::Normal,
            level,
            metric_value: 55.0,
            message: "HeatIndex (Portfolio) rose to MEDIUM".to_string(),
            created_at: Utc::now(),
            breach: level.is_breach(),
        }
    }

    #[test]
    fn test_banner_contains_alert_and_message() {
        let line = console::strip_ansi_codes(&banner(&event(AlertLevel::Medium))).to_string();
        assert_eq!(line, "[MEDIUM] heat-eth HeatIndex (Portfolio) rose to MEDIUM");
    }

    #[tokio::test]
    async fn test_send_succeeds_on_stderr() {
        let toast = SystemToast::new();
        assert_eq!(toast.send(&event(AlertLevel::High), None).await, Ok(None));
    }
}
