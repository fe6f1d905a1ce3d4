//! PostgreSQL alert repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::alerting::AlertRepository;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::models::{AlertConfig, AlertEvent, AlertState, Condition, Threshold, TierOrder};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS alert_configs (
        id TEXT PRIMARY KEY,
        description TEXT NOT NULL DEFAULT '',
        alert_type TEXT NOT NULL,
        alert_class TEXT NOT NULL,
        condition TEXT NOT NULL,
        trigger_value DOUBLE PRECISION NOT NULL,
        notification_type TEXT NOT NULL,
        position_reference_id TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_states (
        alert_id TEXT PRIMARY KEY REFERENCES alert_configs(id) ON DELETE CASCADE,
        last_level TEXT NOT NULL,
        last_value DOUBLE PRECISION,
        last_event_id UUID,
        snoozed_until TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_thresholds (
        seq BIGSERIAL PRIMARY KEY,
        id TEXT NOT NULL,
        alert_type TEXT NOT NULL,
        alert_class TEXT NOT NULL,
        metric_key TEXT NOT NULL DEFAULT '',
        condition TEXT NOT NULL,
        low DOUBLE PRECISION NOT NULL,
        medium DOUBLE PRECISION NOT NULL,
        high DOUBLE PRECISION NOT NULL,
        tier_order TEXT,
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        last_modified TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    ALTER TABLE alert_thresholds ADD COLUMN IF NOT EXISTS tier_order TEXT
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_alert_thresholds_id ON alert_thresholds (id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alert_thresholds_key
        ON alert_thresholds (alert_type, alert_class, condition, last_modified DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_events (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        alert_id TEXT NOT NULL,
        previous_level TEXT NOT NULL,
        level TEXT NOT NULL,
        metric_value DOUBLE PRECISION NOT NULL,
        message TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        breach BOOLEAN NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alert_events_alert
        ON alert_events (alert_id, created_at DESC)
    "#,
];

/// Alert repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgAlertRepository {
    pool: PgPool,
}

impl PgAlertRepository {
    /// Connect using storage configuration
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        Ok(Self::new(pool))
    }

    /// Create a repository over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for PgAlertRepository {
    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Alert schema ready");
        Ok(())
    }

    async fn add_config(&self, config: &AlertConfig) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO alert_configs (
                id, description, alert_type, alert_class, condition,
                trigger_value, notification_type, position_reference_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                description = EXCLUDED.description,
                alert_type = EXCLUDED.alert_type,
                alert_class = EXCLUDED.alert_class,
                condition = EXCLUDED.condition,
                trigger_value = EXCLUDED.trigger_value,
                notification_type = EXCLUDED.notification_type,
                position_reference_id = EXCLUDED.position_reference_id
            "#,
        )
        .bind(&config.id)
        .bind(&config.description)
        .bind(&config.alert_type)
        .bind(&config.alert_class)
        .bind(config.condition.as_str())
        .bind(config.trigger_value)
        .bind(config.notification_type.as_str())
        .bind(&config.position_reference_id)
        .bind(config.created_at)
        .execute(&mut *tx)
        .await?;

        let state = AlertState::new(&config.id);
        sqlx::query(
            r#"
            INSERT INTO alert_states (alert_id, last_level, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (alert_id) DO NOTHING
            "#,
        )
        .bind(&state.alert_id)
        .bind(state.last_level.as_str())
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_config(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alert_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_config(&self, id: &str) -> Result<AlertConfig> {
        let row = sqlx::query_as::<_, AlertConfigRow>("SELECT * FROM alert_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::not_found("alert config", id))?
            .try_into()
    }

    async fn get_state(&self, alert_id: &str) -> Result<AlertState> {
        let row =
            sqlx::query_as::<_, AlertStateRow>("SELECT * FROM alert_states WHERE alert_id = $1")
                .bind(alert_id)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| Error::not_found("alert state", alert_id))?
            .try_into()
    }

    async fn iterate_configs_with_state(&self) -> Result<Vec<(AlertConfig, AlertState)>> {
        let configs = sqlx::query_as::<_, AlertConfigRow>("SELECT * FROM alert_configs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let states = sqlx::query_as::<_, AlertStateRow>("SELECT * FROM alert_states")
            .fetch_all(&self.pool)
            .await?;

        let mut states: std::collections::HashMap<String, AlertStateRow> = states
            .into_iter()
            .map(|s| (s.alert_id.clone(), s))
            .collect();

        configs
            .into_iter()
            .filter_map(|cfg| states.remove(&cfg.id).map(|state| (cfg, state)))
            .map(|(cfg, state)| -> Result<(AlertConfig, AlertState)> {
                Ok((cfg.try_into()?, state.try_into()?))
            })
            .collect()
    }

    async fn save_state(&self, state: &AlertState) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_states (
                alert_id, last_level, last_value, last_event_id, snoozed_until, updated_at
            )
            SELECT $1, $2, $3, $4, $5, $6
            WHERE EXISTS (SELECT 1 FROM alert_configs WHERE id = $1)
            ON CONFLICT (alert_id) DO UPDATE SET
                last_level = EXCLUDED.last_level,
                last_value = EXCLUDED.last_value,
                last_event_id = EXCLUDED.last_event_id,
                snoozed_until = EXCLUDED.snoozed_until,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&state.alert_id)
        .bind(state.last_level.as_str())
        .bind(state.last_value)
        .bind(state.last_event_id)
        .bind(state.snoozed_until)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("alert config", &state.alert_id));
        }
        Ok(())
    }

    async fn add_threshold(&self, threshold: &Threshold) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_thresholds (
                id, alert_type, alert_class, metric_key, condition,
                low, medium, high, tier_order, enabled, last_modified
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                alert_type = EXCLUDED.alert_type,
                alert_class = EXCLUDED.alert_class,
                metric_key = EXCLUDED.metric_key,
                condition = EXCLUDED.condition,
                low = EXCLUDED.low,
                medium = EXCLUDED.medium,
                high = EXCLUDED.high,
                tier_order = EXCLUDED.tier_order,
                enabled = EXCLUDED.enabled,
                last_modified = EXCLUDED.last_modified
            WHERE (
                alert_thresholds.alert_type, alert_thresholds.alert_class,
                alert_thresholds.metric_key, alert_thresholds.condition,
                alert_thresholds.low, alert_thresholds.medium, alert_thresholds.high,
                alert_thresholds.tier_order, alert_thresholds.enabled
            ) IS DISTINCT FROM (
                EXCLUDED.alert_type, EXCLUDED.alert_class,
                EXCLUDED.metric_key, EXCLUDED.condition,
                EXCLUDED.low, EXCLUDED.medium, EXCLUDED.high,
                EXCLUDED.tier_order, EXCLUDED.enabled
            )
            "#,
        )
        .bind(&threshold.id)
        .bind(&threshold.alert_type)
        .bind(&threshold.alert_class)
        .bind(&threshold.metric_key)
        .bind(threshold.condition.as_str())
        .bind(threshold.low)
        .bind(threshold.medium)
        .bind(threshold.high)
        .bind(threshold.tier_order.map(|o| o.as_str()))
        .bind(threshold.enabled)
        .bind(threshold.last_modified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn thresholds_for(
        &self,
        alert_type: &str,
        alert_class: &str,
        condition: Condition,
    ) -> Result<Option<Threshold>> {
        let row = sqlx::query_as::<_, ThresholdRow>(
            r#"
            SELECT * FROM alert_thresholds
            WHERE alert_type = $1 AND alert_class = $2 AND condition = $3 AND enabled
            ORDER BY last_modified DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(alert_type)
        .bind(alert_class)
        .bind(condition.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn append_event(&self, event: &AlertEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_events (
                id, alert_id, previous_level, level, metric_value, message, created_at, breach
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.alert_id)
        .bind(event.previous_level.as_str())
        .bind(event.level.as_str())
        .bind(event.metric_value)
        .bind(&event.message)
        .bind(event.created_at)
        .bind(event.breach)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent_events(
        &self,
        limit: usize,
        alert_id: Option<&str>,
    ) -> Result<Vec<AlertEvent>> {
        let rows = sqlx::query_as::<_, AlertEventRow>(
            r#"
            SELECT * FROM alert_events
            WHERE ($1::TEXT IS NULL OR alert_id = $1)
            ORDER BY created_at DESC, seq DESC
            LIMIT $2
            "#,
        )
        .bind(alert_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// Database row types

#[derive(sqlx::FromRow)]
struct AlertConfigRow {
    id: String,
    description: String,
    alert_type: String,
    alert_class: String,
    condition: String,
    trigger_value: f64,
    notification_type: String,
    position_reference_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertConfigRow> for AlertConfig {
    type Error = Error;

    fn try_from(row: AlertConfigRow) -> Result<Self> {
        Ok(Self {
            condition: row.condition.parse().map_err(corrupt)?,
            notification_type: row.notification_type.parse().map_err(corrupt)?,
            id: row.id,
            description: row.description,
            alert_type: row.alert_type,
            alert_class: row.alert_class,
            trigger_value: row.trigger_value,
            position_reference_id: row.position_reference_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertStateRow {
    alert_id: String,
    last_level: String,
    last_value: Option<f64>,
    last_event_id: Option<Uuid>,
    snoozed_until: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AlertStateRow> for AlertState {
    type Error = Error;

    fn try_from(row: AlertStateRow) -> Result<Self> {
        Ok(Self {
            last_level: row.last_level.parse().map_err(corrupt)?,
            alert_id: row.alert_id,
            last_value: row.last_value,
            last_event_id: row.last_event_id,
            snoozed_until: row.snoozed_until,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ThresholdRow {
    id: String,
    alert_type: String,
    alert_class: String,
    metric_key: String,
    condition: String,
    low: f64,
    medium: f64,
    high: f64,
    tier_order: Option<String>,
    enabled: bool,
    last_modified: DateTime<Utc>,
}

impl TryFrom<ThresholdRow> for Threshold {
    type Error = Error;

    fn try_from(row: ThresholdRow) -> Result<Self> {
        Ok(Self {
            condition: row.condition.parse().map_err(corrupt)?,
            id: row.id,
            alert_type: row.alert_type,
            alert_class: row.alert_class,
            metric_key: row.metric_key,
            low: row.low,
            medium: row.medium,
            high: row.high,
            tier_order: row
                .tier_order
                .as_deref()
                .map(str::parse::<TierOrder>)
                .transpose()
                .map_err(corrupt)?,
            enabled: row.enabled,
            last_modified: row.last_modified,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertEventRow {
    id: Uuid,
    alert_id: String,
    previous_level: String,
    level: String,
    metric_value: f64,
    message: String,
    created_at: DateTime<Utc>,
    breach: bool,
}

impl TryFrom<AlertEventRow> for AlertEvent {
    type Error = Error;

    fn try_from(row: AlertEventRow) -> Result<Self> {
        Ok(Self {
            previous_level: row.previous_level.parse().map_err(corrupt)?,
            level: row.level.parse().map_err(corrupt)?,
            id: row.id,
            alert_id: row.alert_id,
            metric_value: row.metric_value,
            message: row.message,
            created_at: row.created_at,
            breach: row.breach,
        })
    }
}

fn corrupt(err: Error) -> Error {
    Error::storage(format!("unreadable row: {err}"))
}
