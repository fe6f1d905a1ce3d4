//! Tripwire CLI
//!
//! Periodic driver and operator commands for the Tripwire alerting core.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tripwire::alerting::{
    self, AlertOrchestrator, AlertOutcome, AlertRepository, ChannelResolver, ConfigImporter,
    CycleReport, EventBus, FanoutBus,
};
use tripwire::config::{LoggingConfig, MetricsConfig};
use tripwire::db::{self, RedisEventBus};
use tripwire::models::{AlertEvent, AlertLevel, Channel, ChannelMap, DispatchReport};
use tripwire::notify;
use tripwire::Config;

/// Tripwire - threshold alerting for trading operations
#[derive(Parser)]
#[command(name = "tripwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "TRIPWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate all alerts periodically until Ctrl+C
    Run {
        /// Time between cycles (e.g. "30s", "2m")
        #[arg(long)]
        interval: Option<humantime::Duration>,
    },

    /// Run a single evaluation cycle
    Once,

    /// Create the storage schema
    Schema,

    /// Import thresholds and alerts from the configuration file
    Import,

    /// Show recent alert events
    Events {
        /// Maximum number of events
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only events for this alert
        #[arg(long)]
        alert: Option<String>,
    },

    /// Suppress notifications for an alert
    Snooze {
        /// Alert id
        alert_id: String,

        /// Snooze duration (e.g. "1h")
        #[arg(long = "for", conflicts_with = "clear", required_unless_present = "clear")]
        duration: Option<humantime::Duration>,

        /// Remove an existing snooze
        #[arg(long)]
        clear: bool,
    },

    /// Send a synthetic event through the notification router
    TestDispatch {
        /// Request the voice channel
        #[arg(long)]
        voice: bool,

        /// Request the SMS channel
        #[arg(long)]
        sms: bool,

        /// Request the system toast
        #[arg(long)]
        system: bool,

        /// Request text-to-speech
        #[arg(long)]
        tts: bool,

        /// Mark the event as a breach (required for voice)
        #[arg(long)]
        breach: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _log_guard = init_logging(&config.logging, cli.verbose);

    if let Err(e) = init_metrics(&config.metrics) {
        warn!(error = %e, "Metrics exporter disabled");
    }

    // Execute command
    let result = match cli.command {
        Commands::Run { interval } => run_driver(config, interval.map(Into::into)).await,
        Commands::Once => run_once(config, cli.format).await,
        Commands::Schema => run_schema(config).await,
        Commands::Import => run_import(config).await,
        Commands::Events { limit, alert } => run_events(config, limit, alert, cli.format).await,
        Commands::Snooze {
            alert_id,
            duration,
            clear,
        } => run_snooze(config, &alert_id, if clear { None } else { duration }).await,
        Commands::TestDispatch {
            voice,
            sms,
            system,
            tts,
            breach,
        } => {
            let channels = ChannelMap {
                voice,
                sms,
                system,
                tts,
            };
            run_test_dispatch(config, channels, breach, cli.format).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let log_level = if verbose { "debug" } else { config.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (writer, guard) = match &config.file {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tripwire.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    guard
}

fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    let Some(addr) = &config.listen_addr else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics.listen_addr '{addr}'"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Open the repository, create the schema and seed the memory backend
async fn open_repository(config: &Config) -> anyhow::Result<Arc<dyn AlertRepository>> {
    let repo = db::connect_repository(&config.storage)
        .await
        .context("failed to open repository")?;

    repo.ensure_schema()
        .await
        .context("schema initialization failed")?;

    if config.storage.backend == "memory" {
        ConfigImporter::new(&config.alerting)
            .import_into(repo.as_ref())
            .await
            .context("failed to import configured alerts")?;
    }

    Ok(repo)
}

async fn build_orchestrator(config: &Config) -> anyhow::Result<AlertOrchestrator> {
    let repo = open_repository(config).await?;
    let feed = alerting::feed::from_config(&config.feed).context("failed to build metric feed")?;
    let router = notify::router_from_config(&config.notifications, config.alerting.channel_timeout)
        .context("failed to build notification router")?;

    let mut bus = FanoutBus::new();
    if let Some(redis) = RedisEventBus::from_config(&config.redis)? {
        bus = bus.with(Arc::new(redis));
    }
    let bus: Arc<dyn EventBus> = Arc::new(bus);

    Ok(AlertOrchestrator::new(repo, Arc::from(feed), Arc::new(router))
        .with_bus(bus)
        .with_channels(ChannelResolver::new(config.alerting.channels.clone())))
}

async fn run_driver(config: Config, interval: Option<std::time::Duration>) -> anyhow::Result<()> {
    let period = interval.unwrap_or(config.alerting.cycle_interval);
    let orchestrator = build_orchestrator(&config).await?;

    info!(interval = %humantime::format_duration(period), "Starting alert driver");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match orchestrator.run_cycle().await {
                    Ok(report) => print_summary_line(&report),
                    Err(e) => error!(error = %e, "Cycle failed"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn run_once(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config).await?;
    let report = orchestrator.run_cycle().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

async fn run_schema(config: Config) -> anyhow::Result<()> {
    let repo = db::connect_repository(&config.storage).await?;
    repo.ensure_schema()
        .await
        .context("schema initialization failed")?;
    println!("Schema ready ({} backend)", config.storage.backend);
    Ok(())
}

async fn run_import(config: Config) -> anyhow::Result<()> {
    let repo = db::connect_repository(&config.storage).await?;
    repo.ensure_schema().await?;
    let summary = ConfigImporter::new(&config.alerting)
        .import_into(repo.as_ref())
        .await?;

    println!(
        "Imported {} threshold(s) and {} alert(s); rejected {} invalid threshold(s)",
        summary.thresholds, summary.alerts, summary.rejected
    );
    Ok(())
}

async fn run_events(
    config: Config,
    limit: usize,
    alert: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    config.storage.require_durable("events")?;
    let repo = open_repository(&config).await?;
    let events = repo.list_recent_events(limit, alert.as_deref()).await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No alert events");
    }
    for event in &events {
        println!(
            "{}  {:<24} {} -> {}  {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.alert_id,
            event.previous_level,
            level_style(event.level),
            event.message
        );
    }
    Ok(())
}

async fn run_snooze(
    config: Config,
    alert_id: &str,
    duration: Option<humantime::Duration>,
) -> anyhow::Result<()> {
    config.storage.require_durable("snooze")?;
    let repo = open_repository(&config).await?;
    let until = duration
        .map(|d| chrono::Duration::from_std(d.into()).map(|d| Utc::now() + d))
        .transpose()
        .context("snooze duration out of range")?;

    let state = alerting::set_snooze(repo.as_ref(), alert_id, until).await?;

    match state.snoozed_until {
        Some(until) => println!("{alert_id} snoozed until {}", until.to_rfc3339()),
        None => println!("{alert_id} snooze cleared"),
    }
    Ok(())
}

async fn run_test_dispatch(
    config: Config,
    mut channels: ChannelMap,
    breach: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if channels.is_empty() {
        channels = ChannelMap::from_channels(&Channel::ALL);
    }

    let router = notify::router_from_config(&config.notifications, config.alerting.channel_timeout)?;
    let level = if breach { AlertLevel::High } else { AlertLevel::Low };
    let event = AlertEvent {
        id: Uuid::new_v4(),
        alert_id: "test-dispatch".to_string(),
        previous_level: AlertLevel::Normal,
        level,
        metric_value: 0.0,
        message: format!("Tripwire test notification ({level})"),
        created_at: Utc::now(),
        breach,
    };

    let report = router.dispatch(&event, &channels).await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_dispatch(&report),
    }
    Ok(())
}

fn level_style(level: AlertLevel) -> console::StyledObject<AlertLevel> {
    match level {
        AlertLevel::High => style(level).red().bold(),
        AlertLevel::Medium => style(level).yellow().bold(),
        AlertLevel::Low => style(level).cyan(),
        AlertLevel::Normal => style(level).green(),
    }
}

fn print_summary_line(report: &CycleReport) {
    let summary = &report.summary;
    println!(
        "{} evaluated={} events={} skipped={} ({} ms)",
        style("cycle").dim(),
        summary.evaluated,
        summary.events,
        summary.skipped_total(),
        summary.duration_ms
    );
}

fn print_report(report: &CycleReport) {
    for outcome in &report.outcomes {
        match outcome {
            AlertOutcome::Unchanged { alert_id } => {
                println!("{:<24} {}", alert_id, style("unchanged").dim());
            }
            AlertOutcome::Transitioned {
                event,
                dispatch,
                snoozed,
            } => {
                println!(
                    "{:<24} {} -> {}  {}",
                    event.alert_id,
                    event.previous_level,
                    level_style(event.level),
                    event.message
                );
                match dispatch {
                    Some(dispatch) => print_dispatch(dispatch),
                    None if *snoozed => println!("  {}", style("snoozed, not dispatched").yellow()),
                    None => {}
                }
            }
            AlertOutcome::Skipped {
                alert_id,
                reason,
                detail,
            } => {
                println!(
                    "{:<24} {} {}",
                    alert_id,
                    style(format!("skipped ({reason})")).red(),
                    detail
                );
            }
        }
    }
    print_summary_line(report);
}

fn print_dispatch(report: &DispatchReport) {
    for result in report.results.values() {
        let status = if result.ok {
            style("ok".to_string()).green()
        } else if let Some(reason) = &result.skip_reason {
            style(format!("skipped: {reason}")).dim()
        } else {
            style("failed".to_string()).red()
        };
        match &result.detail {
            Some(detail) => println!("  {:<7} {} {}", result.channel, status, detail),
            None => println!("  {:<7} {}", result.channel, status),
        }
    }
}
