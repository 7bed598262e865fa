//! CLI configuration utilities

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use upkeep_core::ClientConfig;

/// Load client configuration, letting `--state-dir` win over file and env
pub fn load(path: Option<&Path>, state_dir: Option<PathBuf>) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(path).context("failed to load configuration")?;
    if state_dir.is_some() {
        config.state_dir = state_dir;
    }
    Ok(config)
}
