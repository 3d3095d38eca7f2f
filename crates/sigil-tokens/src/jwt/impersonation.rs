//! Impersonation tokens
//!
//! An impersonation token lets a staff member act as another user for a
//! bounded time. Its subject is the target user; the impersonator, the
//! reason and the granted scopes travel alongside so every request made with
//! it can be audited back to a person and a session.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

use super::claims::Claims;

/// Claims of an impersonation token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationClaims {
    /// Registered claims plus the target's `user_id` and `org`
    #[serde(flatten)]
    pub claims: Claims,

    /// Email of the user being impersonated
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_user_email: String,

    /// User performing the impersonation
    #[serde(default)]
    pub impersonator_id: String,

    /// Email of the impersonator
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub impersonator_email: String,

    /// Kind of impersonation, e.g. `support` or `admin`
    #[serde(default, rename = "type")]
    pub kind: String,

    /// Why the session was opened
    #[serde(default)]
    pub reason: String,

    /// Identifies the impersonation session for auditing
    #[serde(default)]
    pub session_id: String,

    /// Scopes granted for the session
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ImpersonationClaims {
    /// The impersonator's id, or [`Ulid::nil()`] if absent or malformed
    pub fn parse_impersonator_id(&self) -> Ulid {
        Ulid::from_string(&self.impersonator_id).unwrap_or_else(|_| Ulid::nil())
    }

    /// Whether the session was granted `scope`
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == scope)
    }
}

/// What to put in an impersonation token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonationOptions {
    /// User performing the impersonation
    pub impersonator_id: Ulid,
    /// Email of the impersonator
    pub impersonator_email: String,
    /// User being impersonated
    pub target_user_id: Ulid,
    /// Email of the user being impersonated
    pub target_user_email: String,
    /// Organization the session acts in
    pub organization_id: Ulid,
    /// Kind of impersonation
    pub kind: String,
    /// Why the session is opened
    pub reason: String,
    /// Scopes granted for the session
    pub scopes: Vec<String>,
    /// How long the token is valid
    pub duration: Duration,
}

impl ImpersonationOptions {
    /// Options for `impersonator_id` acting as `target_user_id` in `organization_id`
    ///
    /// The session lasts one hour with kind `support` until changed.
    pub fn new(impersonator_id: Ulid, target_user_id: Ulid, organization_id: Ulid) -> Self {
        Self {
            impersonator_id,
            impersonator_email: String::new(),
            target_user_id,
            target_user_email: String::new(),
            organization_id,
            kind: "support".to_string(),
            reason: String::new(),
            scopes: Vec::new(),
            duration: Duration::from_secs(3600),
        }
    }

    /// Check that the options name a usable session
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.impersonator_id.is_nil() {
            return Err("impersonator id is required".into());
        }
        if self.target_user_id.is_nil() {
            return Err("target user id is required".into());
        }
        if self.impersonator_id == self.target_user_id {
            return Err("a user cannot impersonate themselves".into());
        }
        if self.organization_id.is_nil() {
            return Err("organization id is required".into());
        }
        if self.kind.trim().is_empty() {
            return Err("impersonation type is required".into());
        }
        if self.reason.trim().is_empty() {
            return Err("impersonation reason is required".into());
        }
        if self.duration.as_secs() == 0 {
            return Err("impersonation duration must be at least one second".into());
        }
        Ok(())
    }
}
