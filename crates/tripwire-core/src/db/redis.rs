//! Redis pub/sub publisher for alert notices

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use tracing::warn;

use crate::alerting::{AlertNotice, EventBus};
use crate::config::RedisConfig;
use crate::error::{Error, Result};

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl RedisPool {
    /// Create a new Redis connection pool
    pub fn new(url: &str) -> Result<Self> {
        let pool = PoolConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Redis(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Redis(e.to_string()))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Publishes every notice as JSON.
///
/// Transitions go to `{channel}` and `{channel}:{alert_id}`; cycle summaries
/// go to `{channel}:cycles`.
#[derive(Clone)]
pub struct RedisEventBus {
    pool: Pool,
    channel: String,
}

impl RedisEventBus {
    /// Create a bus from configuration, or `None` when no URL is set
    pub fn from_config(config: &RedisConfig) -> Result<Option<Self>> {
        config
            .url
            .as_deref()
            .map(|url| -> Result<Self> { Ok(Self::new(&RedisPool::new(url)?, &config.channel)) })
            .transpose()
    }

    /// Create a bus over a pool
    pub fn new(pool: &RedisPool, channel: impl Into<String>) -> Self {
        Self {
            pool: pool.pool.clone(),
            channel: channel.into(),
        }
    }

    fn channels_for(&self, notice: &AlertNotice) -> Vec<String> {
        match notice {
            AlertNotice::Transition { event, .. } => vec![
                self.channel.clone(),
                format!("{}:{}", self.channel, event.alert_id),
            ],
            AlertNotice::CycleCompleted(_) => vec![format!("{}:cycles", self.channel)],
        }
    }

    async fn try_publish(&self, notice: &AlertNotice) -> Result<()> {
        let payload = serde_json::to_string(notice)?;
        let mut conn = self.pool.get().await.map_err(|e| Error::Redis(e.to_string()))?;

        for channel in self.channels_for(notice) {
            let _: () = conn.publish(&channel, &payload).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, notice: &AlertNotice) {
        if let Err(e) = self.try_publish(notice).await {
            warn!(error = %e, channel = %self.channel, "Failed to publish alert notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::alerting::CycleSummary;
    use crate::models::{AlertEvent, AlertLevel};

    #[test]
    fn test_no_url_means_no_bus() {
        let bus = RedisEventBus::from_config(&RedisConfig::default()).unwrap();
        assert!(bus.is_none());
    }

    #[test]
    fn test_channel_naming() {
        let pool = RedisPool::new("redis://127.0.0.1:6379").unwrap();
        let bus = RedisEventBus::new(&pool, "tripwire:alerts");

        let transition = AlertNotice::Transition {
            event: AlertEvent {
                id: Uuid::new_v4(),
                alert_id: "liq-btc".to_string(),
                previous_level: AlertLevel::Normal,
                level: AlertLevel::Medium,
                metric_value: 20.0,
                message: String::new(),
                created_at: Utc::now(),
                breach: true,
            },
            dispatch: None,
            snoozed: true,
        };

        assert_eq!(
            bus.channels_for(&transition),
            vec!["tripwire:alerts", "tripwire:alerts:liq-btc"]
        );
        assert_eq!(
            bus.channels_for(&AlertNotice::CycleCompleted(CycleSummary::default())),
            vec!["tripwire:alerts:cycles"]
        );
    }
}
