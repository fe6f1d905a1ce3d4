//! Alert repository for storing and querying alert configs, state, thresholds and events

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{AlertConfig, AlertEvent, AlertState, Condition, Threshold};

/// Persistence capability over the alert model.
///
/// Every method may fail with a storage error; callers scope the failure to
/// the alert being processed.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Create tables or other backing structures if they do not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert or replace a config. A new config gets a NORMAL state; a
    /// replaced config keeps its existing state.
    async fn add_config(&self, config: &AlertConfig) -> Result<()>;

    /// Delete a config together with its state
    async fn delete_config(&self, id: &str) -> Result<bool>;

    /// Get a config by id
    async fn get_config(&self, id: &str) -> Result<AlertConfig>;

    /// Get the state of a config
    async fn get_state(&self, alert_id: &str) -> Result<AlertState>;

    /// Snapshot of every config with its state
    async fn iterate_configs_with_state(&self) -> Result<Vec<(AlertConfig, AlertState)>>;

    /// Upsert a state. The config must exist.
    async fn save_state(&self, state: &AlertState) -> Result<()>;

    /// Insert a threshold, or replace the row with the same id. Re-adding an
    /// unchanged threshold keeps the stored row and its `last_modified`.
    async fn add_threshold(&self, threshold: &Threshold) -> Result<()>;

    /// Most recently modified enabled threshold for the key
    async fn thresholds_for(
        &self,
        alert_type: &str,
        alert_class: &str,
        condition: Condition,
    ) -> Result<Option<Threshold>>;

    /// Append a transition event
    async fn append_event(&self, event: &AlertEvent) -> Result<()>;

    /// Recent events, newest first
    async fn list_recent_events(
        &self,
        limit: usize,
        alert_id: Option<&str>,
    ) -> Result<Vec<AlertEvent>>;
}

#[derive(Default)]
struct Tables {
    configs: BTreeMap<String, AlertConfig>,
    states: BTreeMap<String, AlertState>,
    thresholds: Vec<Threshold>,
    events: Vec<AlertEvent>,
}

/// In-process repository, ordered by config id
#[derive(Default)]
pub struct MemoryAlertRepository {
    tables: RwLock<Tables>,
}

impl MemoryAlertRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRepository for MemoryAlertRepository {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn add_config(&self, config: &AlertConfig) -> Result<()> {
        let mut tables = self.tables.write();
        tables
            .states
            .entry(config.id.clone())
            .or_insert_with(|| AlertState::new(&config.id));
        tables.configs.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn delete_config(&self, id: &str) -> Result<bool> {
        let mut tables = self.tables.write();
        tables.states.remove(id);
        Ok(tables.configs.remove(id).is_some())
    }

    async fn get_config(&self, id: &str) -> Result<AlertConfig> {
        self.tables
            .read()
            .configs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("alert config", id))
    }

    async fn get_state(&self, alert_id: &str) -> Result<AlertState> {
        self.tables
            .read()
            .states
            .get(alert_id)
            .cloned()
            .ok_or_else(|| Error::not_found("alert state", alert_id))
    }

    async fn iterate_configs_with_state(&self) -> Result<Vec<(AlertConfig, AlertState)>> {
        let tables = self.tables.read();
        Ok(tables
            .configs
            .values()
            .filter_map(|cfg| {
                tables
                    .states
                    .get(&cfg.id)
                    .map(|state| (cfg.clone(), state.clone()))
            })
            .collect())
    }

    async fn save_state(&self, state: &AlertState) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.configs.contains_key(&state.alert_id) {
            return Err(Error::not_found("alert config", &state.alert_id));
        }
        tables.states.insert(state.alert_id.clone(), state.clone());
        Ok(())
    }

    async fn add_threshold(&self, threshold: &Threshold) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.thresholds.iter_mut().find(|t| t.id == threshold.id) {
            Some(existing) if same_tiers(existing, threshold) => {}
            Some(existing) => *existing = threshold.clone(),
            None => tables.thresholds.push(threshold.clone()),
        }
        Ok(())
    }

    async fn thresholds_for(
        &self,
        alert_type: &str,
        alert_class: &str,
        condition: Condition,
    ) -> Result<Option<Threshold>> {
        Ok(self
            .tables
            .read()
            .thresholds
            .iter()
            .filter(|t| {
                t.enabled
                    && t.alert_type == alert_type
                    && t.alert_class == alert_class
                    && t.condition == condition
            })
            // later rows win ties
            .max_by_key(|t| t.last_modified)
            .cloned())
    }

    async fn append_event(&self, event: &AlertEvent) -> Result<()> {
        self.tables.write().events.push(event.clone());
        Ok(())
    }

    async fn list_recent_events(
        &self,
        limit: usize,
        alert_id: Option<&str>,
    ) -> Result<Vec<AlertEvent>> {
        let tables = self.tables.read();
        let mut events: Vec<AlertEvent> = tables
            .events
            .iter()
            .rev()
            .filter(|e| alert_id.map_or(true, |id| e.alert_id == id))
            .cloned()
            .collect();
        // stable sort keeps insertion order (newest first) for equal timestamps
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
    }
}

/// Equal apart from `last_modified`
fn same_tiers(a: &Threshold, b: &Threshold) -> bool {
    Threshold {
        last_modified: b.last_modified,
        ..a.clone()
    } == *b
}
