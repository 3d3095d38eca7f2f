//! Stateless signed link tokens
//!
//! Link tokens back the email verification, password reset, organization
//! invitation and file download flows. Each token owns a [`SigningInfo`]
//! (expiry + nonce) and one or more identity fields. Signing produces a
//! `(signature, secret)` pair that travels inside an outbound link; the
//! server keeps (or re-derives) the token fields and later verifies the pair
//! the user presents.
//!
//! # Scheme
//!
//! ```text
//! secret    = nonce || fresh_random          (2 * NONCE_LENGTH bytes)
//! mac_input = len(domain) domain             (per-kind separator)
//!             len(field) field ...           (identity fields, fixed order)
//!             expires_at.secs expires_at.nanos
//! signature = base64url(HMAC-SHA256(secret, mac_input))
//! ```
//!
//! Every `sign` call draws new randomness, so two signatures of the same
//! token never share a secret. Verification recomputes the MAC with the
//! caller-supplied secret and compares in constant time.
//!
//! Single-use semantics are the caller's job (e.g. a consumed flag in a
//! datastore); nothing here records that a pair has been used.

mod download;
mod invite;
mod reset;
mod verification;

pub use download::DownloadToken;
pub use invite::OrgInviteToken;
pub use reset::ResetToken;
pub use verification::VerificationToken;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::LinkTokenError;

/// Length of the per-token nonce in bytes
pub const NONCE_LENGTH: usize = 64;

/// Length of a valid secret: the nonce followed by the same amount of fresh randomness
pub const SECRET_LENGTH: usize = NONCE_LENGTH * 2;

/// Default validity of an email verification link
pub const VERIFICATION_TOKEN_TTL: Duration = Duration::days(7);

/// Default validity of a password reset link
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(15);

/// Default validity of an organization invitation link
pub const INVITE_TOKEN_TTL: Duration = Duration::days(14);

/// Default validity of a file download link
pub const DOWNLOAD_TOKEN_TTL: Duration = Duration::hours(1);

/// The flow a link token belongs to
///
/// Used as the MAC domain separator, so a signature issued for one flow can
/// never verify for another even when the field values coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Email verification
    Verification,
    /// Password reset
    Reset,
    /// Organization invitation
    OrgInvite,
    /// File download
    Download,
}

impl LinkKind {
    /// Domain separator mixed into every MAC for this kind
    pub const fn domain(self) -> &'static [u8] {
        match self {
            LinkKind::Verification => b"sigil/link/verification/v1",
            LinkKind::Reset => b"sigil/link/reset/v1",
            LinkKind::OrgInvite => b"sigil/link/org-invite/v1",
            LinkKind::Download => b"sigil/link/download/v1",
        }
    }
}

/// Expiry and nonce shared by every link token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningInfo {
    /// Absolute expiry of the token
    pub expires_at: DateTime<Utc>,
    /// Random bytes generated once per token
    #[serde(with = "nonce_encoding")]
    pub nonce: Vec<u8>,
}

impl SigningInfo {
    /// Create signing info valid for `ttl` from now, with a fresh nonce
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::ExpirationRequired`] for a zero or negative
    /// `ttl`, [`LinkTokenError::ExpirationOutOfRange`] when `ttl` reaches past
    /// the representable dates, and [`LinkTokenError::FailedSigning`] if the
    /// entropy source fails.
    pub fn new(ttl: Duration) -> Result<Self, LinkTokenError> {
        Ok(Self {
            expires_at: expiry_after(ttl)?,
            nonce: random_bytes(NONCE_LENGTH)?,
        })
    }

    /// Whether the expiry has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Sign `payload` under this token's nonce and expiry
    fn sign(&self, payload: &MacInput) -> Result<(String, Vec<u8>), LinkTokenError> {
        // A short nonce yields a secret that can never pass the length check
        if self.nonce.len() != NONCE_LENGTH {
            return Err(LinkTokenError::InvalidNonce);
        }

        let mut secret = Vec::with_capacity(self.nonce.len() * 2);
        secret.extend_from_slice(&self.nonce);
        secret.extend_from_slice(&random_bytes(self.nonce.len())?);

        let tag = payload.mac(&secret, self.expires_at);
        Ok((URL_SAFE_NO_PAD.encode(tag.as_ref()), secret))
    }

    /// Run the checks that follow identity validation: expiry, secret
    /// length, signature decoding and the constant-time MAC comparison
    fn verify(
        &self,
        payload: &MacInput,
        signature: &str,
        secret: &[u8],
    ) -> Result<(), LinkTokenError> {
        if self.is_expired() {
            return Err(LinkTokenError::Expired);
        }

        if secret.len() != SECRET_LENGTH {
            return Err(LinkTokenError::InvalidSecret);
        }

        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| LinkTokenError::Invalid)?;

        let expected = payload.mac(secret, self.expires_at);
        if bool::from(expected.as_ref().ct_eq(presented.as_slice())) {
            Ok(())
        } else {
            Err(LinkTokenError::Invalid)
        }
    }
}

/// A link token specialization
///
/// Implementors supply their identity check and MAC payload; `sign` and
/// `verify` are shared.
pub trait LinkToken {
    /// The flow this token belongs to
    const KIND: LinkKind;

    /// The shared expiry and nonce
    fn signing_info(&self) -> &SigningInfo;

    /// Check that required identity fields are present
    ///
    /// # Errors
    ///
    /// Returns the kind-specific missing-field error.
    fn check_identity(&self) -> Result<(), LinkTokenError>;

    /// Append the identity fields to the MAC input, in a fixed order
    fn write_payload(&self, input: &mut MacInput);

    /// Produce a fresh `(signature, secret)` pair for this token
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::InvalidNonce`] if the signing info carries no
    /// nonce of [`NONCE_LENGTH`] bytes (e.g. a `Default` token), or
    /// [`LinkTokenError::FailedSigning`] if the system entropy source fails.
    fn sign(&self) -> Result<(String, Vec<u8>), LinkTokenError> {
        let payload = self.mac_input();
        self.signing_info().sign(&payload)
    }

    /// Verify a `(signature, secret)` pair against this token's current fields
    ///
    /// Checks run in order: identity fields, expiry, secret length, signature
    /// decoding, MAC comparison. The last two share one error.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's [`LinkTokenError`].
    fn verify(&self, signature: &str, secret: &[u8]) -> Result<(), LinkTokenError> {
        self.check_identity()?;
        let payload = self.mac_input();
        self.signing_info().verify(&payload, signature, secret)
    }

    #[doc(hidden)]
    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(Self::KIND);
        self.write_payload(&mut input);
        input
    }
}

/// Canonical, length-prefixed MAC input
#[derive(Debug, Clone)]
pub struct MacInput {
    buf: Vec<u8>,
}

impl MacInput {
    fn new(kind: LinkKind) -> Self {
        let mut input = Self {
            buf: Vec::with_capacity(128),
        };
        input.field(kind.domain());
        input
    }

    /// Append one length-prefixed field
    pub fn field(&mut self, value: &[u8]) -> &mut Self {
        // Identity fields are small; anything over u32::MAX is a caller bug
        let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    /// Append an optional field, distinguishing absent from empty
    pub fn optional_field(&mut self, value: Option<&[u8]>) -> &mut Self {
        match value {
            Some(value) => {
                self.buf.push(1);
                self.field(value)
            }
            None => {
                self.buf.push(0);
                self
            }
        }
    }

    fn mac(&self, secret: &[u8], expires_at: DateTime<Utc>) -> hmac::Tag {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(&self.buf);
        ctx.update(&expires_at.timestamp().to_be_bytes());
        ctx.update(&expires_at.timestamp_subsec_nanos().to_be_bytes());
        ctx.sign()
    }
}

/// Encode a secret for use in a URL query parameter
pub fn encode_secret(secret: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(secret)
}

/// Decode a secret taken from a URL query parameter
///
/// # Errors
///
/// Returns [`LinkTokenError::InvalidSecret`] if the value is not valid base64url.
pub fn decode_secret(encoded: &str) -> Result<Vec<u8>, LinkTokenError> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| LinkTokenError::InvalidSecret)
}

/// `now + ttl`, rejecting empty windows and dates chrono can't represent
pub(crate) fn expiry_after(ttl: Duration) -> Result<DateTime<Utc>, LinkTokenError> {
    if ttl <= Duration::zero() {
        return Err(LinkTokenError::ExpirationRequired);
    }
    Utc::now()
        .checked_add_signed(ttl)
        .ok_or(LinkTokenError::ExpirationOutOfRange)
}

fn random_bytes(len: usize) -> Result<Vec<u8>, LinkTokenError> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| LinkTokenError::FailedSigning)?;
    Ok(buf)
}

mod nonce_encoding {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
