//! Session profile and lifecycle state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Cached snapshot of the authenticated principal.
///
/// Rebuilt from the profile endpoint after login and after every refresh.
/// It is a convenience for presentation only; the backend re-checks
/// permissions on every privileged call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionProfile {
    #[serde(default, alias = "_id", alias = "userId")]
    pub id: String,
    #[serde(default, alias = "fullName", alias = "username")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Fields the backend sends that this client does not interpret
    #[serde(default, flatten)]
    pub extra: Map<String, JsonValue>,
}

impl SessionProfile {
    /// Whether the cached permission set contains `permission`
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Whether the cached role matches `role`, case-insensitively
    pub fn has_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Lifecycle of a client session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No usable token pair; only login is possible
    #[default]
    Anonymous,
    /// Login exchange in flight
    Authenticating,
    /// Requests flow normally
    Authenticated,
    /// A token refresh is in flight and requests wait for its outcome
    Refreshing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_accepts_backend_aliases() {
        let profile: SessionProfile = serde_json::from_value(json!({
            "_id": "u-17",
            "fullName": "Dana Reyes",
            "role": "Technician",
            "permissions": ["assets.read", "work_orders.write"],
            "department": "Plant 2"
        }))
        .unwrap();

        assert_eq!(profile.id, "u-17");
        assert_eq!(profile.name, "Dana Reyes");
        assert!(profile.has_permission("assets.read"));
        assert!(!profile.has_permission("assets.delete"));
        assert!(profile.has_role("technician"));
        assert_eq!(profile.extra["department"], "Plant 2");
    }

    #[test]
    fn test_profile_tolerates_missing_fields() {
        let profile: SessionProfile = serde_json::from_value(json!({})).unwrap();
        assert!(profile.id.is_empty());
        assert!(profile.permissions.is_empty());
        assert!(!profile.has_role("admin"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Anonymous.to_string(), "anonymous");
        assert_eq!(SessionState::Refreshing.to_string(), "refreshing");
    }
}
