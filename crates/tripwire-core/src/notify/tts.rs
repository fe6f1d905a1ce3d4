//! Text-to-speech through a local speech command

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::TtsConfig;
use crate::models::{AlertEvent, TransportError};

use super::{ChannelTransport, SendResult};

const TEXT_PLACEHOLDER: &str = "{text}";

/// Speaks the event message with a command such as `espeak` or `say`.
///
/// Arguments containing `{text}` receive the spoken text; without a
/// placeholder the text is appended as the last argument.
#[derive(Debug, Clone)]
pub struct TtsTransport {
    command: String,
    args: Vec<String>,
}

impl TtsTransport {
    /// Create a transport for a command and its arguments
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Create from configuration
    pub fn from_config(config: &TtsConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    fn arguments(&self, text: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(TEXT_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(TEXT_PLACEHOLDER, text)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(text.to_string());
        }
        args
    }
}

#[async_trait]
impl ChannelTransport for TtsTransport {
    fn provider(&self) -> &str {
        "tts"
    }

    async fn send(&self, event: &AlertEvent, _recipient: Option<&str>) -> SendResult {
        let text = format!("Alert {}. {}", event.level, event.message);
        let args = self.arguments(&text);

        debug!(command = %self.command, alert_id = %event.alert_id, "Speaking alert");

        let status = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| TransportError::new("spawn", format!("{}: {e}", self.command)))?;

        if status.success() {
            Ok(None)
        } else {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |c| format!("exit_{c}"));
            Err(TransportError::new(
                code,
                format!("{} exited with {status}", self.command),
            ))
        }
    }
}
