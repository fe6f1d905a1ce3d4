//! Metric feed adapters
//!
//! The core asks a feed for one number per alert and never looks at how the
//! number was produced.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::models::AlertConfig;

/// Source of metric values for alert configs
#[async_trait]
pub trait MetricFeedAdapter: Send + Sync {
    /// Current metric value for an alert, or `Error::MetricUnavailable`
    async fn metric_for(&self, config: &AlertConfig) -> Result<f64>;
}

/// Fixed values keyed by alert id, `alert_type:position`, or `alert_type`.
///
/// Keys are matched case-insensitively; config sources lowercase map keys.
#[derive(Debug, Clone, Default)]
pub struct StaticMetricFeed {
    values: HashMap<String, f64>,
}

impl StaticMetricFeed {
    /// Create a feed from a key/value map
    pub fn new(values: HashMap<String, f64>) -> Self {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { values }
    }

    /// Load a JSON object of `{ "key": value }` pairs
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let values: HashMap<String, f64> = serde_json::from_str(&raw)?;
        Ok(Self::new(values))
    }

    /// Set or replace a value
    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into().to_ascii_lowercase(), value);
    }

    fn lookup(&self, config: &AlertConfig) -> Option<f64> {
        let get = |key: &str| self.values.get(&key.to_ascii_lowercase()).copied();

        if let Some(v) = get(&config.id) {
            return Some(v);
        }
        if let Some(position) = &config.position_reference_id {
            if let Some(v) = get(&format!("{}:{}", config.alert_type, position)) {
                return Some(v);
            }
        }
        get(&config.alert_type)
    }
}

#[async_trait]
impl MetricFeedAdapter for StaticMetricFeed {
    async fn metric_for(&self, config: &AlertConfig) -> Result<f64> {
        self.lookup(config)
            .ok_or_else(|| Error::metric_unavailable(&config.id, "no static value configured"))
    }
}

/// Fetches metrics from an HTTP metric service.
///
/// `GET {base_url}/metrics/{alert_type}?alert_class=..&position=..` returning
/// `{"value": <number>}`.
pub struct HttpMetricFeed {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    value: Option<f64>,
}

impl HttpMetricFeed {
    /// Create a new HTTP feed
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetricFeedAdapter for HttpMetricFeed {
    async fn metric_for(&self, config: &AlertConfig) -> Result<f64> {
        let url = format!("{}/metrics/{}", self.base_url, config.alert_type);

        let mut query = vec![("alert_class", config.alert_class.as_str())];
        if let Some(position) = &config.position_reference_id {
            query.push(("position", position.as_str()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::metric_unavailable(&config.id, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::metric_unavailable(
                &config.id,
                format!("metric service returned {}", response.status()),
            ));
        }

        let body: MetricResponse = response
            .json()
            .await
            .map_err(|e| Error::metric_unavailable(&config.id, e.to_string()))?;

        debug!(alert_id = %config.id, value = ?body.value, "Fetched metric");

        body.value
            .ok_or_else(|| Error::metric_unavailable(&config.id, "metric service returned no value"))
    }
}

/// Build the feed selected by configuration
pub fn from_config(config: &FeedConfig) -> Result<Box<dyn MetricFeedAdapter>> {
    match config.kind.as_str() {
        "static" => {
            let feed = match &config.path {
                Some(path) => StaticMetricFeed::from_json_file(path)?,
                None => StaticMetricFeed::new(config.values.clone()),
            };
            Ok(Box::new(feed))
        }
        "http" => {
            let base_url = config
                .base_url
                .as_deref()
                .ok_or_else(|| Error::config("feed.base_url is required for the http feed"))?;
            Ok(Box::new(HttpMetricFeed::new(base_url, config.timeout)?))
        }
        other => Err(Error::config(format!("unknown feed kind '{other}'"))),
    }
}
