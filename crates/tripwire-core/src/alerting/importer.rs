//! Seeds thresholds and alert configs from configuration

use tracing::{info, warn};

use crate::config::AlertingConfig;
use crate::error::Result;

use super::repository::AlertRepository;

/// Counts from one import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Thresholds written
    pub thresholds: usize,
    /// Thresholds rejected by validation
    pub rejected: usize,
    /// Alert configs written
    pub alerts: usize,
}

/// Writes the configured thresholds and alerts into a repository
pub struct ConfigImporter<'a> {
    config: &'a AlertingConfig,
}

impl<'a> ConfigImporter<'a> {
    /// Create an importer over the alerting section
    pub fn new(config: &'a AlertingConfig) -> Self {
        Self { config }
    }

    /// Import everything. Invalid thresholds are logged and left out; storage
    /// failures abort the import.
    pub async fn import_into(&self, repo: &dyn AlertRepository) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for threshold in &self.config.thresholds {
            if let Err(e) = threshold.validate() {
                warn!(threshold_id = %threshold.id, error = %e, "Skipping invalid threshold");
                summary.rejected += 1;
                continue;
            }
            repo.add_threshold(threshold).await?;
            summary.thresholds += 1;
        }

        for alert in &self.config.alerts {
            repo.add_config(alert).await?;
            summary.alerts += 1;
        }

        info!(
            thresholds = summary.thresholds,
            rejected = summary.rejected,
            alerts = summary.alerts,
            "Imported alert configuration"
        );

        Ok(summary)
    }
}
