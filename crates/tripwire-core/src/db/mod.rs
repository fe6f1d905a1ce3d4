//! Storage backends for Tripwire
//!
//! PostgreSQL for alert state, Redis for publishing alert notices.

mod postgres;
mod redis;

use std::sync::Arc;

pub use self::postgres::PgAlertRepository;
pub use self::redis::{RedisEventBus, RedisPool};

use crate::alerting::{AlertRepository, MemoryAlertRepository};
use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Open the repository selected by `storage.backend`
pub async fn connect_repository(config: &StorageConfig) -> Result<Arc<dyn AlertRepository>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryAlertRepository::new())),
        "postgres" => Ok(Arc::new(PgAlertRepository::connect(config).await?)),
        other => Err(Error::config(format!("unknown storage backend '{other}'"))),
    }
}
