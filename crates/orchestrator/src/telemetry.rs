// Telemetry
//
// Initialization helpers for the tracing subscriber: an env filter plus a
// console layer in plain or JSON format.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Plain
        }
    }
}

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log filter (e.g., "info", "debug", "flowline_orchestrator=debug")
    pub log_filter: Option<String>,
    pub format: LogFormat,
    /// Include the event target (module path) in each line
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            format: LogFormat::Plain,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter (default: "info")
    /// - `LOG_FORMAT`: "json" for structured output, anything else for plain text
    pub fn from_env() -> Self {
        Self {
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            with_target: true,
        }
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Install the global tracing subscriber
///
/// Returns `false` when a global subscriber was already installed.
///
/// # Example
///
/// ```ignore
/// use flowline_orchestrator::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env());
///     // ... your application code
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> bool {
    let filter = config.filter();

    let layer = match config.format {
        LogFormat::Plain => tracing_subscriber::fmt::layer()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };

    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(format = ?config.format, "Telemetry initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert!(config.log_filter.is_none());
        assert_eq!(config.format, LogFormat::Plain);
        assert!(config.with_target);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Plain);
    }
}
