//! Twilio voice and SMS transports

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::TwilioConfig;
use crate::error::{Error, Result};
use crate::models::{AlertEvent, Channel, TransportError};

use super::{ChannelTransport, CredentialProbe, SendResult};

const PROVIDER: &str = "twilio";

static E164: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("valid regex"));

static ERROR_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"/errors/(\d+)").expect("valid regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)HTTP Error Your request was:.*?twilio\.com/docs/errors/\d+\)?")
        .expect("valid regex")
});

static RECORD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i).*Unable to create record:\s*").expect("valid regex"));

/// Operator hint for a Twilio error code
pub fn hint_for(code: &str) -> Option<&'static str> {
    match code {
        "20003" => Some("Auth failed: check account SID/auth token and region"),
        "21211" => Some("Invalid 'To' number format"),
        "21606" => Some("'From' is not a valid outbound caller ID for this account"),
        "21608" => Some("Trial account: the 'To' number must be verified"),
        "13227" => Some("Call blocked by voice geographic permissions"),
        "14107" => Some("Call blocked by geo permissions"),
        "11200" => Some("HTTP retrieval failure (TwiML URL or webhook error)"),
        _ => None,
    }
}

/// Collapse whitespace and strip Twilio's boilerplate around the actual reason
pub fn compact_message(raw: &str) -> String {
    let compact = WHITESPACE.replace_all(raw, " ");
    let compact = BOILERPLATE.replace_all(compact.trim(), "");
    let compact = RECORD_PREFIX.replace_all(&compact, "");
    compact.trim_matches(|c: char| c == ' ' || c == '.').to_string()
}

/// Build a classified error from a code (if known) and a raw message
pub fn classify(code: Option<String>, raw: &str) -> TransportError {
    let code = code.or_else(|| {
        ERROR_URL
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    });
    let hint = code.as_deref().and_then(hint_for);
    let message = compact_message(raw);

    TransportError {
        code,
        message: if message.is_empty() {
            "unknown Twilio error".to_string()
        } else {
            message
        },
        hint: hint.map(String::from),
    }
}

/// Resolved account credentials and phone numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioCredentials {
    /// Account SID
    pub account_sid: String,
    /// Auth token
    pub auth_token: String,
    /// Caller number (E.164)
    pub from_phone: String,
    /// Default recipient (E.164)
    pub to_phone: Option<String>,
    /// Studio Flow used for voice when present
    pub flow_sid: Option<String>,
}

impl TwilioCredentials {
    /// Resolve from config, falling back to `TWILIO_*` environment variables.
    ///
    /// Returns `None` when the SID, token or caller number is missing.
    pub fn resolve(config: &TwilioConfig) -> Option<Self> {
        let account_sid = pick(&[config.account_sid.clone(), env("TWILIO_ACCOUNT_SID")])?;
        let auth_token = pick(&[config.auth_token.clone(), env("TWILIO_AUTH_TOKEN")])?;
        let from_phone = pick(&[
            config.from_phone.clone(),
            env("TWILIO_FROM_PHONE"),
            env("TWILIO_PHONE_NUMBER"),
        ])?;
        let to_phone = pick(&[
            config.to_phone.clone(),
            env("TWILIO_TO_PHONE"),
            env("MY_PHONE_NUMBER"),
        ]);
        let flow_sid = pick(&[config.flow_sid.clone(), env("TWILIO_FLOW_SID")])
            .filter(|sid| !sid.to_ascii_lowercase().contains("your_flow_sid_here"));

        Some(Self {
            account_sid,
            auth_token,
            from_phone,
            to_phone,
            flow_sid,
        })
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn pick(candidates: &[Option<String>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(String::from)
}

fn validate_e164(label: &str, number: &str) -> std::result::Result<(), TransportError> {
    if E164.is_match(number) {
        Ok(())
    } else {
        Err(TransportError::new(
            "invalid_number",
            format!("{label} must be E.164 like +14155552671 (got '{number}')"),
        ))
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
    more_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioResource {
    sid: Option<String>,
}

/// Shared HTTP client and credentials for the Twilio transports
pub struct TwilioClient {
    http: Client,
    credentials: Option<TwilioCredentials>,
    api_base: String,
    studio_base: String,
}

impl TwilioClient {
    /// Create a client from configuration
    pub fn from_config(config: &TwilioConfig, timeout: Duration) -> Result<Self> {
        let credentials = if config.enabled {
            TwilioCredentials::resolve(config)
        } else {
            None
        };
        Self::new(
            credentials,
            config.api_base.clone(),
            config.studio_base.clone(),
            timeout,
        )
    }

    /// Create a client from explicit parts
    pub fn new(
        credentials: Option<TwilioCredentials>,
        api_base: impl Into<String>,
        studio_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            studio_base: studio_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Default recipient from credentials
    pub fn default_recipient(&self) -> Option<&str> {
        self.credentials.as_ref()?.to_phone.as_deref()
    }

    fn credentials(&self) -> std::result::Result<&TwilioCredentials, TransportError> {
        self.credentials.as_ref().ok_or_else(|| {
            TransportError::new("missing_creds", "Twilio account SID/auth token/from number missing")
        })
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> SendResult {
        let creds = self.credentials()?;

        let response = self
            .http
            .post(url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::new("timeout", e.to_string())
                } else {
                    TransportError::new("http", compact_message(&e.to_string()))
                }
            })?;

        receipt(response).await
    }
}

async fn receipt(response: Response) -> SendResult {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status.is_success() {
        let sid = serde_json::from_str::<TwilioResource>(&body)
            .ok()
            .and_then(|r| r.sid);
        return Ok(sid.map(|sid| format!("sid={sid}")));
    }

    match serde_json::from_str::<TwilioErrorBody>(&body) {
        Ok(err) => {
            let raw = match (&err.message, &err.more_info) {
                (Some(message), Some(more)) => format!("{message} ({more})"),
                (Some(message), None) => message.clone(),
                (None, Some(more)) => more.clone(),
                (None, None) => format!("Twilio returned {status}"),
            };
            Err(classify(err.code.map(|c| c.to_string()), &raw))
        }
        Err(_) => Err(classify(
            Some(status.as_u16().to_string()),
            &format!("Twilio returned {status}: {body}"),
        )),
    }
}

impl CredentialProbe for TwilioClient {
    fn has_credentials(&self, channel: Channel) -> bool {
        matches!(channel, Channel::Voice | Channel::Sms) && self.credentials.is_some()
    }
}

/// Voice call through a Studio Flow execution or a TwiML `<Say>` call
pub struct TwilioVoice {
    client: Arc<TwilioClient>,
}

impl TwilioVoice {
    /// Create a voice transport
    pub fn new(client: Arc<TwilioClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelTransport for TwilioVoice {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, event: &AlertEvent, recipient: Option<&str>) -> SendResult {
        let creds = self.client.credentials()?;
        let to = recipient
            .or(creds.to_phone.as_deref())
            .ok_or_else(|| TransportError::new("no_recipient", "no voice recipient configured"))?;
        validate_e164("From", &creds.from_phone)?;
        validate_e164("To", to)?;

        let subject = format!("[tripwire] {} {}", event.alert_id, event.level);

        if let Some(flow_sid) = &creds.flow_sid {
            let url = format!("{}/v2/Flows/{flow_sid}/Executions", self.client.studio_base);
            let parameters = serde_json::json!({
                "subject": subject,
                "body": event.message,
            });
            debug!(alert_id = %event.alert_id, flow_sid = %flow_sid, "Starting Twilio Studio execution");
            let form = [
                ("To", to.to_string()),
                ("From", creds.from_phone.clone()),
                ("Parameters", parameters.to_string()),
            ];
            let receipt = self.client.post_form(&url, &form).await?;
            info!(alert_id = %event.alert_id, "Twilio Studio execution created");
            return Ok(receipt);
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.client.api_base, creds.account_sid
        );
        let spoken = if event.message.is_empty() {
            subject
        } else {
            event.message.clone()
        };
        let twiml = format!(
            "<Response><Say voice=\"Polly.Matthew\">Tripwire alert: {}</Say></Response>",
            escape_xml(&spoken)
        );
        let form = [
            ("To", to.to_string()),
            ("From", creds.from_phone.clone()),
            ("Twiml", twiml),
        ];
        let receipt = self.client.post_form(&url, &form).await?;
        info!(alert_id = %event.alert_id, "Twilio call created");
        Ok(receipt)
    }

    fn hint(&self, code: &str) -> Option<&'static str> {
        hint_for(code)
    }
}

/// Text message through the Messages API
pub struct TwilioSms {
    client: Arc<TwilioClient>,
}

impl TwilioSms {
    /// Create an SMS transport
    pub fn new(client: Arc<TwilioClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelTransport for TwilioSms {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, event: &AlertEvent, recipient: Option<&str>) -> SendResult {
        let creds = self.client.credentials()?;
        let to = recipient
            .or(creds.to_phone.as_deref())
            .ok_or_else(|| TransportError::new("no_recipient", "no SMS recipient configured"))?;
        validate_e164("From", &creds.from_phone)?;
        validate_e164("To", to)?;

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.client.api_base, creds.account_sid
        );
        let form = [
            ("To", to.to_string()),
            ("From", creds.from_phone.clone()),
            ("Body", format!("[{}] {}", event.level, event.message)),
        ];
        let receipt = self.client.post_form(&url, &form).await?;
        info!(alert_id = %event.alert_id, "Twilio SMS sent");
        Ok(receipt)
    }

    fn hint(&self, code: &str) -> Option<&'static str> {
        hint_for(code)
    }
}
