use anyhow::Result;
use tracing::Level;
use upkeep_core::tracing::{InstrumentationConfig, init_tracing};

/// Initialize logging for the CLI
///
/// Logs go to stderr so command output on stdout stays pipeable.
/// `RUST_LOG` overrides the level flag.
pub fn init_logging(log_level: Level, json: bool) -> Result<()> {
    let level_str = level_filter(log_level);
    let base = InstrumentationConfig::from_env();
    let config = InstrumentationConfig {
        json: json || base.json,
        ..base
    }
    .with_level(level_str);
    init_tracing(&config)
}

fn level_filter(level: Level) -> String {
    let level_str = level.as_str().to_lowercase();
    format!("upkeep={level_str},upkeep_core={level_str},upkeep_http={level_str}")
}
