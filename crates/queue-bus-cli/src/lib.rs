//! # Queue Bus CLI
//!
//! Command-line interface for the queue bus.
//!
//! This module provides CLI commands for:
//! - Configuration validation and display
//! - End-to-end send latency checks against the in-memory medium

use clap::{Parser, Subcommand};
use queue_bus::{
    handler_fn, headers, Bus, ConfigurationError, Envelope, InMemoryProvider, QueueError,
    QueueName, Timestamp, TransportConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Input queue used by the latency check receiver
pub const LATENCY_QUEUE: &str = "queue-bus/latency-check";

const LATENCY_WAIT: Duration = Duration::from_secs(30);

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Bus CLI - reliable messaging over at-least-once queues
#[derive(Parser)]
#[command(name = "queue-bus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Message transport with retries, dead-lettering and topics")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_BUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Configuration file to validate (overrides --config)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Measure send-to-handle latency between two buses
    CheckLatency {
        /// Messages per run
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,

        /// Number of runs
        #[arg(short, long, default_value = "1")]
        repeat: usize,
    },
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Bus error: {0}")]
    Bus(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Bus(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Latency Statistics
// ============================================================================

/// Summary of one latency run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub average: Duration,
    pub median: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl LatencyStats {
    /// Summarize samples; `None` when there are none
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort();

        let total: Duration = sorted.iter().sum();
        let middle = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[middle - 1] + sorted[middle]) / 2
        } else {
            sorted[middle]
        };

        Some(Self {
            samples: sorted.len(),
            average: total / sorted.len() as u32,
            median,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}

impl std::fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AVG: {:.2}ms, MED: {:.2}ms, MIN: {:.2}ms, MAX: {:.2}ms ({} messages)",
            self.average.as_secs_f64() * 1000.0,
            self.median.as_secs_f64() * 1000.0,
            self.min.as_secs_f64() * 1000.0,
            self.max.as_secs_f64() * 1000.0,
            self.samples
        )
    }
}

/// Payload of a latency probe
#[derive(Debug, Serialize, Deserialize)]
struct LatencyProbe {
    sequence: usize,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    match cli.command {
        Commands::Config { file, show, format } => {
            let path = file.or(cli.config);
            execute_config_command(path.as_deref(), show, format)
        }
        Commands::CheckLatency { count, repeat } => {
            let config = TransportConfig::load(cli.config.as_deref())?;
            execute_check_latency_command(config, count, repeat).await
        }
    }
}

/// Initialize logging based on CLI arguments
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute config command
fn execute_config_command(
    path: Option<&Path>,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    info!(file = ?path, show = show, format = ?format, "Processing config command");

    let config = TransportConfig::load(path)?;

    if show {
        println!("{}", render_config(&config, format)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

/// Render configuration in the requested format
pub fn render_config(config: &TransportConfig, format: ConfigFormat) -> Result<String, CliError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
    };

    rendered.map_err(|message| CliError::CommandFailed { message })
}

/// Execute check-latency command
async fn execute_check_latency_command(
    config: TransportConfig,
    count: usize,
    repeat: usize,
) -> Result<(), CliError> {
    if repeat == 0 {
        return Err(CliError::InvalidArgument {
            arg: "repeat".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    for run in 1..=repeat {
        let stats = check_latency(config.clone(), count).await?;
        println!("Run {}/{}: {}", run, repeat, stats);
    }
    Ok(())
}

/// Send `count` probes from a send-only bus to a receiving bus over one
/// in-memory medium and summarize how long each took to reach the handler
pub async fn check_latency(
    config: TransportConfig,
    count: usize,
) -> Result<LatencyStats, CliError> {
    if count == 0 {
        return Err(CliError::InvalidArgument {
            arg: "count".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    let medium = Arc::new(InMemoryProvider::default());
    let (latency_tx, mut latency_rx) = mpsc::unbounded_channel();

    let handler = handler_fn(move |envelope: Envelope| {
        let latency_tx = latency_tx.clone();
        async move {
            let sent: Timestamp = envelope
                .header(headers::SENT_TIME)
                .ok_or_else(|| anyhow::anyhow!("probe without {} header", headers::SENT_TIME))?
                .parse()?;
            let elapsed = (chrono::Utc::now() - sent.as_datetime())
                .to_std()
                .unwrap_or_default();
            // The receiver is gone once enough samples were collected.
            let _ = latency_tx.send(elapsed);
            anyhow::Ok(())
        }
    });

    let receiver_config = TransportConfig {
        input_queue: Some(LATENCY_QUEUE.to_string()),
        auto_create_queues: true,
        ..config.clone()
    };
    let receiver = Bus::start(receiver_config, medium.clone(), Arc::new(handler)).await?;
    let sender = Bus::send_only(config, medium).await?;
    let destination = QueueName::new(LATENCY_QUEUE.to_string()).map_err(QueueError::from)?;

    for sequence in 0..count {
        sender.send(&destination, &LatencyProbe { sequence }).await?;
    }

    let mut samples = Vec::with_capacity(count);
    while samples.len() < count {
        match tokio::time::timeout(LATENCY_WAIT, latency_rx.recv()).await {
            Ok(Some(latency)) => samples.push(latency),
            Ok(None) => break,
            Err(_) => {
                warn!(received = samples.len(), expected = count, "Timed out waiting for probes");
                break;
            }
        }
    }

    sender.shutdown().await;
    receiver.shutdown().await;

    if samples.len() < count {
        return Err(CliError::CommandFailed {
            message: format!("received {} of {} probes", samples.len(), count),
        });
    }

    LatencyStats::from_samples(&samples).ok_or_else(|| CliError::CommandFailed {
        message: "no latency samples collected".to_string(),
    })
}
