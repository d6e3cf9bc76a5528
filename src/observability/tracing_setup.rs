// observability/tracing_setup.rs - Tracing Configuration

use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Tracing output format
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable format (default)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Configuration for tracing
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Log level filter (e.g., "info", "fipa_conversation=debug")
    pub filter: String,

    /// Output format
    pub format: TracingFormat,

    /// Include target (module path)
    pub with_target: bool,

    /// ANSI colors (for terminal output)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info,fipa_conversation=debug".into(),
            format: TracingFormat::Pretty,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Production config: JSON output for log aggregation.
    pub fn production() -> Self {
        Self {
            filter: "info".into(),
            format: TracingFormat::Json,
            with_target: true,
            with_ansi: false,
        }
    }
}

/// Initialize the tracing subscriber.
///
/// Call once at application startup; the `RUST_LOG` environment
/// variable overrides the configured filter.
pub fn init_tracing(config: TracingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        TracingFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(config.with_target)
                    .with_ansi(config.with_ansi),
            )
            .init(),
        TracingFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(config.with_target)
                    .with_ansi(config.with_ansi),
            )
            .init(),
        TracingFormat::Json => registry
            .with(fmt::layer().json().with_target(config.with_target))
            .init(),
    }

    tracing::info!(filter = %config.filter, format = ?config.format, "Tracing initialized");
}
