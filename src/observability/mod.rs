//! # Observability Infrastructure
//!
//! Structured logging through `tracing-subscriber` and Prometheus metrics for
//! the certplane authority.

pub mod logging;
pub mod metrics;

pub use logging::log_config_info;
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let installed = if config.json_logging {
        ::tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).json().finish(),
        )
    } else {
        ::tracing::subscriber::set_global_default(
            FmtSubscriber::builder().with_env_filter(filter).finish(),
        )
    };

    installed.is_ok()
}

/// Initialize all observability components
pub async fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    let logging_installed = init_logging(config);

    if config.enable_metrics {
        init_metrics(config).await?;
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = %config.enable_metrics,
        logging_installed,
        "Observability initialized successfully"
    );

    Ok(())
}
