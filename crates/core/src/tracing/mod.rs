//! Shared tracing setup for the Upkeep crates

pub mod config;
pub mod init;

pub use config::InstrumentationConfig;
pub use init::init_tracing;
