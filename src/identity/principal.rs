use serde::{Deserialize, Serialize};

use super::permissions::PermissionMap;

/// The authenticated subject of a request, decoded from a validated session token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: i64,
    pub email: String,
    pub role: String,
    pub display_name: String,
    /// Per-user override from the user record. `None` means "use the role defaults";
    /// `Some` (even when empty) replaces them entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<PermissionMap>,
}

impl Identity {
    pub fn new(subject_id: i64, email: impl Into<String>, role: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject_id,
            email: email.into(),
            role: role.into(),
            display_name: display_name.into(),
            overrides: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Option<PermissionMap>) -> Self {
        self.overrides = overrides;
        self
    }
}
