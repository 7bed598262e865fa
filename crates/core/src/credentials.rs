//! Bearer credential pair

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair issued by the backend.
///
/// Both tokens are opaque. The pair is always replaced as a whole so the
/// two members never come from different grants.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    if token.is_empty() {
        String::new()
    } else {
        format!("<redacted {} chars>", token.len())
    }
}
