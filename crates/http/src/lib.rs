//! Upkeep HTTP client
//!
//! [`SessionManager`] is the single way the application talks to the REST
//! backend: it attaches the bearer token, refreshes it transparently on
//! expiry and keeps the durable credential store in step. The ERP SOAP
//! bridge lives in [`soap`].

pub mod client;
pub mod soap;

pub use client::error::ClientError;
pub use client::events::{LogoutReason, SessionEvent};
pub use client::request::{FormPart, FormPayload, RequestBody, RequestOptions};
pub use client::resources::{Asset, LookupEntry, WorkOrder};
pub use client::response::{ParsedBody, unwrap_envelope};
pub use client::{SessionManager, SessionManagerBuilder};
pub use soap::{SoapAction, SoapGateway, SoapResponse};

pub type Result<T> = std::result::Result<T, ClientError>;
