//! Upkeep core types and utilities

pub mod config;
pub mod credentials;
pub mod error;
pub mod session;
pub mod store;
pub mod tracing;

pub use config::{ClientConfig, EndpointConfig};
pub use credentials::CredentialPair;
pub use error::{CoreError, CoreResult};
pub use session::{SessionProfile, SessionState};
pub use store::{CredentialStore, FileStore, MemoryStore, StoreKeys};
