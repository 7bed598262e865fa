//! Configuration for tracing and instrumentation

use serde::{Deserialize, Serialize};

/// Main instrumentation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationConfig {
    /// Service name recorded on startup
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Log level filter (e.g., "info", "debug", "upkeep_http=trace")
    pub log_level: String,
    /// Emit newline-delimited JSON instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            service_name: "upkeep".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl InstrumentationConfig {
    /// Create configuration from environment variables
    ///
    /// Supports the following environment variables:
    /// - `SERVICE_NAME`: Service name
    /// - `RUST_LOG`: Log level filter
    /// - `UPKEEP_LOG_FORMAT`: `json` for structured output
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("SERVICE_NAME").unwrap_or_else(|_| "upkeep".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let json = std::env::var("UPKEEP_LOG_FORMAT")
            .is_ok_and(|format| format.eq_ignore_ascii_case("json"));

        Self {
            service_name,
            log_level,
            json,
            ..Self::default()
        }
    }

    /// Same configuration with a different level filter
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}
