//! Bearer token validation
//!
//! [`JwtValidator`] owns the decode pipeline shared by [`Validator::verify`]
//! and [`Validator::parse`]:
//!
//! 1. split the compact serialization into header, payload and signature
//! 2. decode the header and claims (failures are `Malformed`)
//! 3. look up the header's `alg` in the [`SigningMethodRegistry`]
//!    (unregistered algorithms are `Unverifiable`)
//! 4. ask the [`KeyResolver`] for the verification key (failures are
//!    `Unverifiable`, with the [`KeyError`] as inner cause)
//! 5. verify the signature (`SignatureInvalid`)
//!
//! `verify` then checks temporal claims, audience and issuer. `parse` stops
//! after the signature, which is what a refresh flow needs to read the
//! subject of an access token that has already expired.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::claims::Claims;
use super::registry::SigningMethodRegistry;
use crate::error::{JwtError, KeyError, SigningError, ValidationError, ValidationFlags};

/// The JOSE header of a compact JWT
///
/// `alg` is kept as a string so algorithms registered at runtime, which
/// `jsonwebtoken::Algorithm` cannot name, flow through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm
    pub alg: String,
    /// Key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Token type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl TokenHeader {
    /// A `JWT`-typed header for `alg` signed by `kid`
    pub fn new(alg: impl Into<String>, kid: impl Into<String>) -> Self {
        Self {
            alg: alg.into(),
            kid: Some(kid.into()),
            typ: Some("JWT".to_string()),
        }
    }
}

/// Supplies the key that verifies a token
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve the verification key for a token with this header
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] when the header names no key, an unknown key,
    /// or a key whose algorithm differs from the token's.
    async fn resolve(&self, header: &TokenHeader) -> Result<DecodingKey, KeyError>;
}

#[async_trait]
impl<R: KeyResolver + ?Sized> KeyResolver for Arc<R> {
    async fn resolve(&self, header: &TokenHeader) -> Result<DecodingKey, KeyError> {
        (**self).resolve(header).await
    }
}

/// Verifies bearer tokens and extracts their claims
#[async_trait]
pub trait Validator: Send + Sync {
    /// Check the signature, temporal claims, audience and issuer
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] flagged with every failed condition.
    async fn verify(&self, token: &str) -> Result<Claims, ValidationError>;

    /// Check the signature only, skipping every claim check
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the token is malformed, its key can't
    /// be resolved, or its signature is invalid.
    async fn parse(&self, token: &str) -> Result<Claims, ValidationError>;
}

/// Registry-driven JWT validator over a pluggable key resolver
pub struct JwtValidator<R> {
    resolver: R,
    audience: String,
    issuer: String,
    registry: Arc<SigningMethodRegistry>,
    leeway: Duration,
}

impl<R> fmt::Debug for JwtValidator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("registry", &self.registry)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl<R: KeyResolver> JwtValidator<R> {
    /// Create a validator accepting the default asymmetric algorithms
    pub fn new(resolver: R, audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            resolver,
            audience: audience.into(),
            issuer: issuer.into(),
            registry: Arc::new(SigningMethodRegistry::with_defaults()),
            leeway: Duration::ZERO,
        }
    }

    /// Accept exactly the algorithms in `registry`
    pub fn with_registry(mut self, registry: Arc<SigningMethodRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Tolerate this much clock skew on `exp`, `iat` and `nbf`
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The expected audience
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// The expected issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The algorithms this validator accepts
    pub fn algorithms(&self) -> Vec<String> {
        self.registry.algorithms()
    }

    /// The key resolver
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    async fn decode(&self, token: &str) -> Result<Claims, ValidationError> {
        let (header, payload, signature) = split(token)?;
        let header: TokenHeader = decode_segment(header)?;
        let claims: Claims = decode_segment(payload)?;

        let Some(method) = self.registry.get(&header.alg) else {
            return Err(ValidationError::new(
                format!("signing method {} is invalid", header.alg),
                ValidationFlags::UNVERIFIABLE,
            ));
        };

        let key = self
            .resolver
            .resolve(&header)
            .await
            .map_err(|e| ValidationError::with_inner(ValidationFlags::UNVERIFIABLE, e))?;

        let signing_input = &token[..token.len() - signature.len() - 1];
        match method.verify(signing_input, signature, &key) {
            Ok(()) => Ok(claims),
            Err(SigningError::InvalidSignature) => Err(JwtError::SignatureInvalid.into()),
            Err(e) => Err(ValidationError::with_inner(
                ValidationFlags::SIGNATURE_INVALID,
                e,
            )),
        }
    }

    fn validate_claims(&self, claims: &Claims) -> Result<(), ValidationError> {
        let now = chrono::Utc::now().timestamp();
        let mut failure = claims.validate_times(now, self.leeway).err();

        if claims.exp.is_none() {
            record(&mut failure, JwtError::InvalidClaims);
        }

        if !claims.aud.iter().any(|aud| ct_str_eq(aud, &self.audience)) {
            record(&mut failure, JwtError::InvalidAudience);
        }

        if !claims
            .iss
            .as_deref()
            .is_some_and(|iss| ct_str_eq(iss, &self.issuer))
        {
            record(&mut failure, JwtError::InvalidIssuer);
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<R: KeyResolver> Validator for JwtValidator<R> {
    async fn verify(&self, token: &str) -> Result<Claims, ValidationError> {
        let claims = self.parse(token).await?;
        if let Err(e) = self.validate_claims(&claims) {
            debug!(error = %e, flags = ?e.flags(), "token claims rejected");
            return Err(e);
        }
        Ok(claims)
    }

    async fn parse(&self, token: &str) -> Result<Claims, ValidationError> {
        self.decode(token).await.inspect_err(|e| {
            debug!(error = %e, flags = ?e.flags(), "token could not be parsed");
        })
    }
}

/// Whether a token's `exp` has passed, without checking its signature
///
/// Meant for deciding when to refresh a token the caller already holds. The
/// answer says nothing about whether the token is genuine.
///
/// # Errors
///
/// `Malformed` if the token can't be decoded, `InvalidClaims` if it carries
/// no `exp`.
pub fn is_expired(token: &str) -> Result<bool, ValidationError> {
    let claims: Claims = decode_unverified(token)?;
    let exp = claims.exp.ok_or(JwtError::InvalidClaims)?;
    Ok(chrono::Utc::now().timestamp() >= exp)
}

/// Decode the payload of a compact JWT without verifying it
pub(crate) fn decode_unverified<T: serde::de::DeserializeOwned>(
    token: &str,
) -> Result<T, ValidationError> {
    let (_, payload, _) = split(token)?;
    decode_segment(payload)
}

fn split(token: &str) -> Result<(&str, &str, &str), ValidationError> {
    let mut segments = token.split('.');
    match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(ValidationError::new(
            "token contains an invalid number of segments",
            ValidationFlags::MALFORMED,
        )),
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, ValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ValidationError::with_inner(ValidationFlags::MALFORMED, e))?;
    serde_json::from_slice(&bytes).map_err(|e| ValidationError::with_inner(ValidationFlags::MALFORMED, e))
}

fn record(failure: &mut Option<ValidationError>, kind: JwtError) {
    match failure.as_mut() {
        Some(err) => err.push(kind),
        None => *failure = Some(kind.into()),
    }
}

fn ct_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::claims::Audience;
    use crate::jwt::registry::SigningMethod;
    use jsonwebtoken::EncodingKey;

    /// Accepts any token whose signature segment is `ok`
    #[derive(Debug)]
    struct Plaintext;

    impl SigningMethod for Plaintext {
        fn alg(&self) -> &str {
            "TEST"
        }

        fn sign(&self, _: &str, _: &EncodingKey) -> Result<String, SigningError> {
            Ok("ok".to_string())
        }

        fn verify(&self, _: &str, signature: &str, _: &DecodingKey) -> Result<(), SigningError> {
            if signature == "ok" {
                Ok(())
            } else {
                Err(SigningError::InvalidSignature)
            }
        }
    }

    struct AnyKey;

    #[async_trait]
    impl KeyResolver for AnyKey {
        async fn resolve(&self, header: &TokenHeader) -> Result<DecodingKey, KeyError> {
            match header.kid.as_deref() {
                None => Err(KeyError::MissingKid),
                Some(_) => Ok(DecodingKey::from_secret(b"unused")),
            }
        }
    }

    fn validator() -> JwtValidator<AnyKey> {
        let registry = SigningMethodRegistry::new();
        registry.register("TEST", || Arc::new(Plaintext) as Arc<dyn SigningMethod>);
        JwtValidator::new(AnyKey, "https://api.sigil.dev", "https://auth.sigil.dev")
            .with_registry(Arc::new(registry))
    }

    fn token(header: &TokenHeader, claims: &impl Serialize, signature: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap());
        let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
        format!("{header}.{claims}.{signature}")
    }

    fn valid_claims() -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            iss: Some("https://auth.sigil.dev".into()),
            aud: Audience(vec!["https://api.sigil.dev".into()]),
            exp: Some(now + 300),
            iat: Some(now),
            nbf: Some(now),
            ..Claims::for_user(ulid::Ulid::new(), ulid::Ulid::new())
        }
    }

    #[tokio::test]
    async fn test_verify_accepts_registered_method() {
        let claims = valid_claims();
        let jwt = token(&TokenHeader::new("TEST", "k1"), &claims, "ok");
        assert_eq!(validator().verify(&jwt).await.unwrap(), claims);
    }

    #[tokio::test]
    async fn test_malformed_tokens() {
        let v = validator();
        for jwt in ["", "a.b", "a.b.c.d", "!!!.e30.ok"] {
            let err = v.parse(jwt).await.unwrap_err();
            assert!(err.is(JwtError::Malformed), "{jwt}: {err}");
        }
    }

    #[tokio::test]
    async fn test_unregistered_algorithm_is_unverifiable() {
        let jwt = token(&TokenHeader::new("none", "k1"), &valid_claims(), "ok");
        let err = validator().parse(&jwt).await.unwrap_err();
        assert!(err.is(JwtError::Unverifiable));
    }

    #[tokio::test]
    async fn test_key_error_is_reachable() {
        let header = TokenHeader {
            kid: None,
            ..TokenHeader::new("TEST", "k1")
        };
        let err = validator()
            .parse(&token(&header, &valid_claims(), "ok"))
            .await
            .unwrap_err();
        assert!(err.is(JwtError::Unverifiable));
        assert!(matches!(err.key_error(), Some(KeyError::MissingKid)));
    }

    #[tokio::test]
    async fn test_bad_signature() {
        let jwt = token(&TokenHeader::new("TEST", "k1"), &valid_claims(), "forged");
        let err = validator().verify(&jwt).await.unwrap_err();
        assert!(err.is(JwtError::SignatureInvalid));
        assert!(!err.is(JwtError::Expired));
    }

    #[tokio::test]
    async fn test_parse_skips_claim_checks() {
        let claims = Claims {
            exp: Some(chrono::Utc::now().timestamp() - 3600),
            aud: Audience(vec!["someone-else".into()]),
            ..valid_claims()
        };
        let jwt = token(&TokenHeader::new("TEST", "k1"), &claims, "ok");

        let v = validator();
        assert_eq!(v.parse(&jwt).await.unwrap(), claims);

        let err = v.verify(&jwt).await.unwrap_err();
        assert!(err.is(JwtError::Expired));
        assert!(err.is(JwtError::InvalidAudience));
        assert!(!err.is(JwtError::InvalidIssuer));
    }

    #[tokio::test]
    async fn test_verify_requires_exp() {
        let claims = Claims {
            exp: None,
            ..valid_claims()
        };
        let jwt = token(&TokenHeader::new("TEST", "k1"), &claims, "ok");
        let v = validator();

        assert!(v.parse(&jwt).await.is_ok());
        let err = v.verify(&jwt).await.unwrap_err();
        assert!(err.is(JwtError::InvalidClaims));
    }

    #[tokio::test]
    async fn test_issuer_mismatch() {
        let claims = Claims {
            iss: Some("https://evil.example".into()),
            ..valid_claims()
        };
        let jwt = token(&TokenHeader::new("TEST", "k1"), &claims, "ok");
        let err = validator().verify(&jwt).await.unwrap_err();
        assert!(err.is(JwtError::InvalidIssuer));
        assert_eq!(err.flags(), ValidationFlags::ISSUER);
    }

    #[tokio::test]
    async fn test_audience_array_membership() {
        let claims = Claims {
            aud: Audience(vec!["other".into(), "https://api.sigil.dev".into()]),
            ..valid_claims()
        };
        let jwt = token(&TokenHeader::new("TEST", "k1"), &claims, "ok");
        assert!(validator().verify(&jwt).await.is_ok());
    }

    #[tokio::test]
    async fn test_fractional_exp_verifies() {
        let now = chrono::Utc::now().timestamp();
        let mut payload = serde_json::to_value(valid_claims()).unwrap();
        payload["exp"] = serde_json::json!(now as f64 + 300.5);
        payload["iat"] = serde_json::json!(now as f64 - 0.25);

        let jwt = token(&TokenHeader::new("TEST", "k1"), &payload, "ok");
        let claims = validator().verify(&jwt).await.unwrap();
        assert_eq!(claims.exp, Some(now + 300));
        assert_eq!(claims.iat, Some(now - 1));
    }

    #[test]
    fn test_is_expired() {
        let now = chrono::Utc::now().timestamp();
        let header = TokenHeader::new("TEST", "k1");

        let fresh = token(&header, &valid_claims(), "anything");
        assert!(!is_expired(&fresh).unwrap());

        let stale = Claims {
            exp: Some(now - 60),
            ..valid_claims()
        };
        assert!(is_expired(&token(&header, &stale, "anything")).unwrap());

        let no_exp = Claims {
            exp: None,
            ..valid_claims()
        };
        let err = is_expired(&token(&header, &no_exp, "anything")).unwrap_err();
        assert!(err.is(JwtError::InvalidClaims));

        for jwt in ["", "a.b", "a.!!!.c"] {
            let err = is_expired(jwt).unwrap_err();
            assert!(err.is(JwtError::Malformed), "{jwt}: {err}");
        }
    }
}
