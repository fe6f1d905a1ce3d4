//! # Tripwire
//!
//! Threshold alerting for trading operations.
//!
//! Tripwire watches numeric metrics (position risk, profit, liquidation
//! distance, price moves), classifies them against tiered thresholds and
//! notifies operators over voice, SMS, a terminal toast and text-to-speech
//! when an alert changes level.
//!
//! ## Architecture
//!
//! - **Models**: alert configs, state, thresholds, events and dispatch results
//! - **Alerting**: pure evaluation, repository and metric feed capabilities,
//!   and the orchestrator that runs one cycle at a time
//! - **Notify**: the notification router and its channel transports
//! - **Storage**: in-memory and PostgreSQL repositories, Redis notice bus
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a single cycle against the configured alerts
//! tripwire --config tripwire.toml once
//!
//! # Evaluate every 30 seconds until Ctrl+C
//! tripwire --config tripwire.toml run --interval 30s
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{
        AlertOrchestrator, AlertRepository, CycleReport, EventBus, MemoryAlertRepository,
        MetricFeedAdapter,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::notify::{ChannelRoute, ChannelTransport, CredentialProbe, NotificationRouter};
}
