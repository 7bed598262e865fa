//! Client configuration
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `UPKEEP_*` environment variables (nested keys use `__`, e.g.
//! `UPKEEP_ENDPOINTS__LOGIN=/auth/login`).

use crate::{CoreError, CoreResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// REST backend base URL, without trailing slash
    pub base_url: String,

    /// ERP SOAP gateway endpoint, if the asset integration is enabled
    pub soap_url: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Upper bound on a single token refresh, in seconds
    pub refresh_timeout_secs: u64,

    pub user_agent: String,

    /// Directory holding the durable credential store
    pub state_dir: Option<PathBuf>,

    pub endpoints: EndpointConfig,
}

/// Paths of the session endpoints, relative to `base_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub login: String,
    pub logout: String,
    pub refresh: String,
    pub profile: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            soap_url: None,
            request_timeout_secs: 30,
            refresh_timeout_secs: 10,
            user_agent: concat!("upkeep-client/", env!("CARGO_PKG_VERSION")).to_string(),
            state_dir: None,
            endpoints: EndpointConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            logout: "/logout".to_string(),
            refresh: "/refresh-token".to_string(),
            profile: "/user/profile".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from defaults, an optional file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration fails validation
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("UPKEEP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first problem found
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(CoreError::invalid_config("base_url is required"));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| CoreError::invalid_config(format!("base_url: {e}")))?;
        if let Some(soap_url) = &self.soap_url {
            url::Url::parse(soap_url)
                .map_err(|e| CoreError::invalid_config(format!("soap_url: {e}")))?;
        }
        if self.request_timeout_secs == 0 || self.refresh_timeout_secs == 0 {
            return Err(CoreError::invalid_config("timeouts must be non-zero"));
        }
        Ok(())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Configured state directory, else the platform data directory
    pub fn resolve_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        ProjectDirs::from("com", "Upkeep", "upkeep").map_or_else(
            || PathBuf::from("./.upkeep"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }
}
