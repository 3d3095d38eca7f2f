//! Token configuration
//!
//! [`TokenConfig`] is consumed by [`TokenManager`](crate::TokenManager) when
//! issuing tokens and by the validators when checking them. Link token
//! lifetimes are fixed constants in [`links`](crate::links) and are not
//! configured here.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Access/refresh token issuance and validation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Key id used to sign new tokens
    #[serde(default)]
    pub kid: String,
    /// Audience stamped into and required of access tokens
    pub audience: String,
    /// Issuer stamped into and required of every token
    pub issuer: String,
    /// Access token lifetime (default: 1 hour)
    #[serde(default = "default_access_duration")]
    pub access_duration: Duration,
    /// Refresh token lifetime (default: 2 hours)
    #[serde(default = "default_refresh_duration")]
    pub refresh_duration: Duration,
    /// How long before the access token expires the refresh token becomes
    /// usable (default: 15 minutes)
    #[serde(default = "default_refresh_overlap")]
    pub refresh_overlap: Duration,
    /// Key id to base64 PKCS#8 DER Ed25519 private key
    #[serde(default)]
    pub keys: HashMap<String, String>,
    /// Remote key set for the cached JWKS validator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_endpoint: Option<String>,
    /// How long a fetched key set is trusted (default: 10 minutes)
    #[serde(default = "default_jwks_refresh_interval")]
    pub jwks_refresh_interval: Duration,
    /// Clock skew tolerated on `exp`, `iat` and `nbf` (default: none)
    #[serde(default)]
    pub leeway: Duration,
    /// Generate an in-memory signing key when none are configured
    #[serde(default)]
    pub generate_keys: bool,
}

fn default_access_duration() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_refresh_duration() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_refresh_overlap() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_jwks_refresh_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

impl TokenConfig {
    /// Configuration with default lifetimes and no keys
    pub fn new(audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            kid: String::new(),
            audience: audience.into(),
            issuer: issuer.into(),
            access_duration: default_access_duration(),
            refresh_duration: default_refresh_duration(),
            refresh_overlap: default_refresh_overlap(),
            keys: HashMap::new(),
            jwks_endpoint: None,
            jwks_refresh_interval: default_jwks_refresh_interval(),
            leeway: Duration::ZERO,
            generate_keys: false,
        }
    }

    /// Audience that refresh tokens carry in addition to the access audience
    ///
    /// Refresh tokens list both audiences, so once their `nbf` has passed they
    /// also verify against an access validator. Access tokens lack this
    /// audience and never verify against a validator expecting it.
    pub fn refresh_audience(&self) -> String {
        format!("{}/v1/reauthenticate", self.audience.trim_end_matches('/'))
    }

    /// Check that the configuration can issue and validate tokens
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), TokenError> {
        let invalid = |reason: &str| Err(TokenError::InvalidConfig(reason.to_string()));

        if self.audience.is_empty() {
            return invalid("audience is required");
        }
        if self.issuer.is_empty() {
            return invalid("issuer is required");
        }
        if self.access_duration.is_zero() {
            return invalid("access duration must be non-zero");
        }
        if self.refresh_duration.is_zero() {
            return invalid("refresh duration must be non-zero");
        }
        if self.refresh_overlap >= self.access_duration {
            return invalid("refresh overlap must be shorter than the access duration");
        }
        if self.refresh_duration <= self.access_duration - self.refresh_overlap {
            return invalid("refresh token would expire before it becomes valid");
        }

        if !self.generate_keys {
            if self.keys.is_empty() {
                return invalid("at least one signing key is required");
            }
            if !self.keys.contains_key(&self.kid) {
                return Err(TokenError::UnknownSigningKey(self.kid.clone()));
            }
        }

        Ok(())
    }
}
