//! Error types for link tokens and bearer token validation
//!
//! Two taxonomies live here:
//!
//! - [`LinkTokenError`] for signed link tokens (verification, reset, invite,
//!   download). Missing fields, expiry and secret length are distinguishable;
//!   decode failures and MAC mismatches collapse into [`LinkTokenError::Invalid`].
//! - [`ValidationError`] for JWT validation. It carries a [`ValidationFlags`]
//!   bit set *and* an optional inner cause, so callers can test either a
//!   category (`flags().contains(..)`) or an exact condition (`is(JwtError::..)`).

use bitflags::bitflags;
use std::fmt;

/// Errors raised while constructing, signing or verifying a link token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkTokenError {
    /// A verification token was requested without an email address
    #[error("unable to create verification token, email is missing")]
    MissingEmail,

    /// A verification token being verified has no email address
    #[error("email verification token is missing email address")]
    TokenMissingEmail,

    /// The supplied secret does not have the expected length
    #[error("email verification token contains an invalid secret")]
    InvalidSecret,

    /// A reset token was requested without a user id
    #[error("unable to create reset token, user id is required")]
    MissingUserId,

    /// A reset token being verified has no user id
    #[error("reset token is missing user id")]
    TokenMissingUserId,

    /// An invitation token has no organization id
    #[error("invite token is missing org id")]
    InviteMissingOrgId,

    /// An invitation token has no email address
    #[error("invite token is missing email")]
    InviteMissingEmail,

    /// A download token was requested without an object URI
    #[error("unable to create download token, object uri is required")]
    MissingObjectUri,

    /// A download token being verified has no object URI
    #[error("download token is missing object uri")]
    TokenMissingObjectUri,

    /// Signing info was given a zero-length validity window
    #[error("signing info requires a non-zero expiration")]
    ExpirationRequired,

    /// The validity window reaches past the representable date range
    #[error("signing info expiration is out of range")]
    ExpirationOutOfRange,

    /// The token's nonce is absent or has the wrong length
    #[error("token is missing a valid signing nonce")]
    InvalidNonce,

    /// The system entropy source failed
    #[error("error occurred when attempting to sign the token")]
    FailedSigning,

    /// The token is past its expiry
    #[error("token is expired")]
    Expired,

    /// The signature could not be decoded or does not match
    #[error("unable to verify token")]
    Invalid,
}

/// Exact JWT validation conditions
///
/// Every variant has exactly one matching bit in [`ValidationFlags`]
/// (see [`JwtError::flag`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum JwtError {
    /// Token could not be decoded
    #[error("token is malformed")]
    Malformed,

    /// Token could not be verified because of signing problems
    #[error("token is unverifiable")]
    Unverifiable,

    /// Signature did not verify
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// `aud` does not contain the expected audience
    #[error("token has invalid audience")]
    InvalidAudience,

    /// `exp` is in the past
    #[error("token is expired")]
    Expired,

    /// `iat` is in the future
    #[error("token used before issued")]
    UsedBeforeIssued,

    /// `iss` does not match the expected issuer
    #[error("token has invalid issuer")]
    InvalidIssuer,

    /// `nbf` is in the future
    #[error("token is not valid yet")]
    NotValidYet,

    /// `jti` is invalid
    #[error("token has invalid id")]
    InvalidId,

    /// Generic claims failure
    #[error("token has invalid claims")]
    InvalidClaims,
}

impl JwtError {
    /// All conditions, in flag order
    pub const ALL: [JwtError; 10] = [
        JwtError::Malformed,
        JwtError::Unverifiable,
        JwtError::SignatureInvalid,
        JwtError::InvalidAudience,
        JwtError::Expired,
        JwtError::UsedBeforeIssued,
        JwtError::InvalidIssuer,
        JwtError::NotValidYet,
        JwtError::InvalidId,
        JwtError::InvalidClaims,
    ];

    /// The category bit for this condition
    pub const fn flag(self) -> ValidationFlags {
        match self {
            JwtError::Malformed => ValidationFlags::MALFORMED,
            JwtError::Unverifiable => ValidationFlags::UNVERIFIABLE,
            JwtError::SignatureInvalid => ValidationFlags::SIGNATURE_INVALID,
            JwtError::InvalidAudience => ValidationFlags::AUDIENCE,
            JwtError::Expired => ValidationFlags::EXPIRED,
            JwtError::UsedBeforeIssued => ValidationFlags::ISSUED_AT,
            JwtError::InvalidIssuer => ValidationFlags::ISSUER,
            JwtError::NotValidYet => ValidationFlags::NOT_VALID_YET,
            JwtError::InvalidId => ValidationFlags::ID,
            JwtError::InvalidClaims => ValidationFlags::CLAIMS_INVALID,
        }
    }
}

bitflags! {
    /// Categories of JWT validation failure
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValidationFlags: u32 {
        /// Token is malformed
        const MALFORMED         = 1 << 0;
        /// Token could not be verified because of signing problems
        const UNVERIFIABLE      = 1 << 1;
        /// Signature validation failed
        const SIGNATURE_INVALID = 1 << 2;
        /// AUD validation failed
        const AUDIENCE          = 1 << 3;
        /// EXP validation failed
        const EXPIRED           = 1 << 4;
        /// IAT validation failed
        const ISSUED_AT         = 1 << 5;
        /// ISS validation failed
        const ISSUER            = 1 << 6;
        /// NBF validation failed
        const NOT_VALID_YET     = 1 << 7;
        /// JTI validation failed
        const ID                = 1 << 8;
        /// Generic claims validation failure
        const CLAIMS_INVALID    = 1 << 9;
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error returned when a bearer token fails to parse or validate
#[derive(Debug)]
pub struct ValidationError {
    flags: ValidationFlags,
    inner: Option<BoxError>,
    text: Option<String>,
}

impl ValidationError {
    /// Build an error from a message and a flag set
    pub fn new(text: impl Into<String>, flags: ValidationFlags) -> Self {
        Self {
            flags,
            inner: None,
            text: Some(text.into()),
        }
    }

    /// Build an error for a single exact condition
    pub fn from_kind(kind: JwtError) -> Self {
        Self {
            flags: kind.flag(),
            inner: Some(Box::new(kind)),
            text: None,
        }
    }

    /// Build an error wrapping an underlying cause
    ///
    /// When `inner` is a [`JwtError`], its flag is added to `flags`.
    pub fn with_inner<E>(flags: ValidationFlags, inner: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let inner: BoxError = Box::new(inner);
        let flags = match inner.downcast_ref::<JwtError>() {
            Some(kind) => flags | kind.flag(),
            None => flags,
        };

        Self {
            flags,
            inner: Some(inner),
            text: None,
        }
    }

    /// Add another condition to this error, keeping the existing inner cause
    pub(crate) fn push(&mut self, kind: JwtError) {
        self.flags |= kind.flag();
        if self.inner.is_none() && self.text.is_none() {
            self.inner = Some(Box::new(kind));
        }
    }

    /// The category bits set on this error
    pub fn flags(&self) -> ValidationFlags {
        self.flags
    }

    /// The wrapped cause, if any
    pub fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.inner.as_deref()
    }

    /// The key resolution failure behind an unverifiable token, if any
    pub fn key_error(&self) -> Option<&KeyError> {
        self.inner.as_ref()?.downcast_ref::<KeyError>()
    }

    /// Whether this error represents `kind`
    ///
    /// True when the inner cause is exactly `kind`, or when the category bit
    /// for `kind` is set.
    pub fn is(&self, kind: JwtError) -> bool {
        let exact = self
            .inner
            .as_ref()
            .and_then(|inner| inner.downcast_ref::<JwtError>())
            .is_some_and(|inner| *inner == kind);

        exact || self.flags.contains(kind.flag())
    }

    /// Every exact condition this error matches
    pub fn kinds(&self) -> impl Iterator<Item = JwtError> + '_ {
        JwtError::ALL.into_iter().filter(|kind| self.is(*kind))
    }
}

impl From<JwtError> for ValidationError {
    fn from(kind: JwtError) -> Self {
        Self::from_kind(kind)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.inner, &self.text) {
            (Some(inner), _) => write!(f, "{inner}"),
            (None, Some(text)) => f.write_str(text),
            (None, None) => f.write_str("token is invalid"),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .as_deref()
            .map(|inner| inner as &(dyn std::error::Error + 'static))
    }
}

/// Failures while resolving the key that verifies a token
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The token header has no `kid`
    #[error("token does not have kid in header")]
    MissingKid,

    /// No key with this id is known
    #[error("unknown signing key: {kid}")]
    UnknownSigningKey {
        /// The key id from the token header
        kid: String,
    },

    /// The token's `alg` differs from the key's declared algorithm
    #[error("token algorithm {token_alg} does not match key algorithm {key_alg}")]
    AlgorithmMismatch {
        /// Algorithm named in the token header
        token_alg: String,
        /// Algorithm named in the key metadata
        key_alg: String,
    },

    /// The key does not declare an algorithm
    #[error("signing key {kid} does not declare an algorithm")]
    MissingKeyAlgorithm {
        /// The key id
        kid: String,
    },

    /// The key could not be turned into verification material
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// The key set could not be fetched
    #[error("unable to fetch signing keys: {0}")]
    Fetch(#[from] JwksError),
}

/// JWKS fetch and cache errors
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// The endpoint is not HTTPS (HTTP is only allowed for loopback hosts)
    #[error("JWKS endpoint must use HTTPS (HTTP only allowed for localhost): {0}")]
    InsecureEndpoint(String),

    /// The configuration names no JWKS endpoint
    #[error("no JWKS endpoint configured")]
    MissingEndpoint,

    /// No cache entry is registered for this endpoint
    #[error("JWKS endpoint is not registered: {0}")]
    NotRegistered(String),

    /// HTTP request failed
    #[error("JWKS fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    /// Response body is not a JWK set
    #[error("invalid JWKS format: {0}")]
    InvalidFormat(String),
}

/// Errors from a signing method
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The underlying primitive rejected the key or input
    #[error("signing primitive failed: {0}")]
    Crypto(#[from] jsonwebtoken::errors::Error),

    /// The signature did not verify
    #[error("signature is invalid")]
    InvalidSignature,

    /// The method does not support this operation or key
    #[error("unsupported signing operation: {0}")]
    Unsupported(String),
}

/// Errors from token issuance
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// No usable signing key was configured
    #[error("token manager not initialized with signing keys")]
    NotInitialized,

    /// The configured key id has no key
    #[error("unknown signing key: {0}")]
    UnknownSigningKey(String),

    /// Key material could not be decoded
    #[error("invalid key material for {kid}: {reason}")]
    InvalidKey {
        /// Key id
        kid: String,
        /// Reason
        reason: String,
    },

    /// The configuration is incomplete or inconsistent
    #[error("invalid token configuration: {0}")]
    InvalidConfig(String),

    /// Impersonation options are incomplete
    #[error("invalid impersonation request: {0}")]
    InvalidImpersonation(String),

    /// The signing algorithm is not registered
    #[error("signing method {0} is not registered")]
    UnknownAlgorithm(String),

    /// Signing failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Claims could not be retrieved from an access token
    #[error("could not retrieve claims from access token")]
    FailedRetrieveClaims(#[source] ValidationError),

    /// Claims or header could not be serialized
    #[error("could not serialize token: {0}")]
    Serialization(#[from] serde_json::Error),
}
