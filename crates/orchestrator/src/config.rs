// Orchestrator Configuration
//
// Configuration for the orchestrator, loaded from environment variables.

use std::env;

use tracing::{debug, warn};

use crate::workflow::EventMetadata;

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Kill switch: acknowledge every failed delivery, even retryable ones
    pub no_retry_on_error: bool,

    /// Mark published events as debug events
    pub debug_events: bool,

    /// Producer metadata stamped on every published event
    pub event_metadata: EventMetadata,
}

impl OrchestratorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `FLOWLINE_NO_RETRY_ON_ERROR`: never ask the broker to redeliver ("true" or "1")
    /// - `FLOWLINE_DEBUG_EVENTS`: set the debug flag on published events ("true" or "1")
    /// - `FLOWLINE_BUILD_DATE`: build date recorded in event metadata
    pub fn from_env() -> Self {
        let event_metadata = EventMetadata {
            build_date: env::var("FLOWLINE_BUILD_DATE").ok(),
            ..Default::default()
        };

        Self {
            no_retry_on_error: env_flag("FLOWLINE_NO_RETRY_ON_ERROR"),
            debug_events: env_flag("FLOWLINE_DEBUG_EVENTS"),
            event_metadata,
        }
    }

    pub fn with_no_retry_on_error(mut self, no_retry: bool) -> Self {
        self.no_retry_on_error = no_retry;
        self
    }

    pub fn with_debug_events(mut self, debug: bool) -> Self {
        self.debug_events = debug;
        self
    }

    pub fn with_build_date(mut self, build_date: impl Into<String>) -> Self {
        self.event_metadata.build_date = Some(build_date.into());
        self
    }

    /// Version recorded on every step entry
    pub fn version(&self) -> &str {
        &self.event_metadata.version
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

/// Load a `.env` file from the working directory (or a parent) if present
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load environment file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert!(!config.no_retry_on_error);
        assert!(!config.debug_events);
        assert_eq!(config.version(), env!("CARGO_PKG_VERSION"));
        assert!(config.event_metadata.build_date.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = OrchestratorConfig::default()
            .with_no_retry_on_error(true)
            .with_debug_events(true)
            .with_build_date("2026-01-01");

        assert!(config.no_retry_on_error);
        assert!(config.debug_events);
        assert_eq!(config.event_metadata.build_date.as_deref(), Some("2026-01-01"));
    }

    #[test]
    fn test_env_flag_unset_is_false() {
        assert!(!env_flag("FLOWLINE_TEST_FLAG_THAT_IS_NEVER_SET"));
    }
}
