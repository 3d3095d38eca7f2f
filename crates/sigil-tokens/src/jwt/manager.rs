//! Access and refresh token issuance
//!
//! [`TokenManager`] signs tokens with Ed25519 keys loaded from
//! [`TokenConfig::keys`] (or generated in memory) and publishes their public
//! halves as a JWK set, so the validators in this crate can check what it
//! issues.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::EncodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use ulid::Ulid;

use super::claims::{Audience, Claims};
use super::impersonation::{ImpersonationClaims, ImpersonationOptions};
use super::jwks::JwksValidator;
use super::registry::SigningMethodRegistry;
use super::validator::{TokenHeader, Validator, decode_unverified};
use crate::config::TokenConfig;
use crate::error::{JwtError, TokenError, ValidationError};

/// The algorithm every manager key signs with
pub const SIGNING_ALGORITHM: &str = "EdDSA";

struct SigningKey {
    encoding: EncodingKey,
    public: Jwk,
}

/// Issues access and refresh tokens and validates its own tokens
pub struct TokenManager {
    config: TokenConfig,
    keys: HashMap<String, SigningKey>,
    registry: Arc<SigningMethodRegistry>,
    validator: JwksValidator,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("kid", &self.config.kid)
            .field("audience", &self.config.audience)
            .field("issuer", &self.config.issuer)
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A signed access token and its paired refresh token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Short-lived bearer token
    pub access_token: String,
    /// Token accepted by the reauthentication endpoint
    pub refresh_token: String,
}

impl TokenManager {
    /// Build a manager from configuration
    ///
    /// Keys in `config.keys` are loaded. When none are configured and
    /// `generate_keys` is set, one key is generated under `config.kid` (or a
    /// fresh ULID if `kid` is empty).
    ///
    /// # Errors
    ///
    /// - [`TokenError::InvalidConfig`] if the configuration is inconsistent
    /// - [`TokenError::InvalidKey`] if a configured key can't be decoded
    /// - [`TokenError::NotInitialized`] if no signing key is available
    pub fn new(mut config: TokenConfig) -> Result<Self, TokenError> {
        config.validate()?;

        let mut keys = HashMap::with_capacity(config.keys.len().max(1));
        for (kid, encoded) in &config.keys {
            let der = STANDARD.decode(encoded).map_err(|e| TokenError::InvalidKey {
                kid: kid.clone(),
                reason: e.to_string(),
            })?;
            keys.insert(kid.clone(), load_key(kid, &der)?);
        }

        if keys.is_empty() && config.generate_keys {
            if config.kid.is_empty() {
                config.kid = Ulid::new().to_string();
            }
            let der = generate_key()?;
            keys.insert(config.kid.clone(), load_key(&config.kid, &der)?);
            info!(kid = %config.kid, "Generated in-memory signing key");
        }

        Self::from_keys(config, keys)
    }

    /// Build a manager signing with one explicit PKCS#8 DER Ed25519 key
    ///
    /// Keys listed in `config.keys` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidKey`] if the key can't be decoded, or
    /// [`TokenError::InvalidConfig`] for an inconsistent configuration.
    pub fn with_signing_key(
        kid: impl Into<String>,
        pkcs8_der: &[u8],
        mut config: TokenConfig,
    ) -> Result<Self, TokenError> {
        let kid = kid.into();
        let key = load_key(&kid, pkcs8_der)?;

        config.kid = kid.clone();
        config.keys.clear();
        config.generate_keys = true;
        config.validate()?;

        Self::from_keys(config, HashMap::from([(kid, key)]))
    }

    fn from_keys(config: TokenConfig, keys: HashMap<String, SigningKey>) -> Result<Self, TokenError> {
        if keys.is_empty() {
            return Err(TokenError::NotInitialized);
        }
        if !keys.contains_key(&config.kid) {
            return Err(TokenError::UnknownSigningKey(config.kid.clone()));
        }

        let registry = Arc::new(SigningMethodRegistry::with_defaults());
        let public = JwkSet {
            keys: keys.values().map(|key| key.public.clone()).collect(),
        };
        let validator = JwksValidator::from_key_set(public, &config.audience, &config.issuer)
            .with_registry(Arc::clone(&registry))
            .with_leeway(config.leeway);

        debug!(kid = %config.kid, key_count = keys.len(), "Token manager initialized");
        Ok(Self {
            config,
            keys,
            registry,
            validator,
        })
    }

    /// The configuration in effect
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Public keys of every loaded signing key
    pub fn keys(&self) -> JwkSet {
        let mut keys: Vec<Jwk> = self.keys.values().map(|key| key.public.clone()).collect();
        keys.sort_by(|a, b| a.common.key_id.cmp(&b.common.key_id));
        JwkSet { keys }
    }

    /// Sign an access token for `claims`
    ///
    /// `iss`, `aud`, `iat`, `nbf` and `exp` are stamped from the
    /// configuration; a missing `jti` is filled with a new ULID.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if the claims can't be serialized or signed.
    pub fn create_access_token(&self, claims: &Claims) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: Some(self.config.issuer.clone()),
            aud: Audience(vec![self.config.audience.clone()]),
            iat: Some(now),
            nbf: Some(now),
            exp: Some(now.saturating_add(secs(self.config.access_duration))),
            jti: claims.jti.clone().or_else(|| Some(Ulid::new().to_string())),
            ..claims.clone()
        };
        self.sign(&claims)
    }

    /// Sign a refresh token paired with `access`
    ///
    /// The refresh token keeps the subject, user and organization of the
    /// access claims, adds the refresh audience, and becomes valid
    /// `refresh_overlap` before the access token expires.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if the claims can't be serialized or signed.
    pub fn create_refresh_token(&self, access: &Claims) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp();
        let access_exp = access
            .exp
            .unwrap_or_else(|| now.saturating_add(secs(self.config.access_duration)));

        let claims = Claims {
            iss: Some(self.config.issuer.clone()),
            sub: access.sub.clone(),
            aud: Audience(vec![
                self.config.audience.clone(),
                self.config.refresh_audience(),
            ]),
            iat: Some(now),
            nbf: Some(access_exp.saturating_sub(secs(self.config.refresh_overlap))),
            exp: Some(now.saturating_add(secs(self.config.refresh_duration))),
            jti: access.jti.clone(),
            user_id: access.user_id.clone(),
            org_id: access.org_id.clone(),
        };
        self.sign(&claims)
    }

    /// Sign an access token and its refresh token
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if either token can't be signed, or
    /// [`TokenError::FailedRetrieveClaims`] if the fresh access token can't be
    /// read back.
    pub async fn create_token_pair(&self, claims: &Claims) -> Result<TokenPair, TokenError> {
        let access_token = self.create_access_token(claims)?;
        let access = self
            .validator
            .parse(&access_token)
            .await
            .map_err(TokenError::FailedRetrieveClaims)?;
        let refresh_token = self.create_refresh_token(&access)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Sign an impersonation token letting one user act as another
    ///
    /// The subject and `user_id` are the target user. The token is valid
    /// from now for `options.duration` and carries a fresh session id.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidImpersonation`] for incomplete options,
    /// or a [`TokenError`] if the claims can't be serialized or signed.
    pub fn create_impersonation_token(
        &self,
        options: &ImpersonationOptions,
    ) -> Result<String, TokenError> {
        options.validate().map_err(TokenError::InvalidImpersonation)?;

        let now = chrono::Utc::now().timestamp();
        let session_id = Ulid::new();
        let claims = ImpersonationClaims {
            claims: Claims {
                iss: Some(self.config.issuer.clone()),
                aud: Audience(vec![self.config.audience.clone()]),
                iat: Some(now),
                nbf: Some(now),
                exp: Some(now.saturating_add(secs(options.duration))),
                jti: Some(Ulid::new().to_string()),
                ..Claims::for_user(options.target_user_id, options.organization_id)
            },
            target_user_email: options.target_user_email.clone(),
            impersonator_id: options.impersonator_id.to_string(),
            impersonator_email: options.impersonator_email.clone(),
            kind: options.kind.clone(),
            reason: options.reason.clone(),
            session_id: session_id.to_string(),
            scopes: options.scopes.clone(),
        };

        info!(
            impersonator = %options.impersonator_id,
            target = %options.target_user_id,
            session = %session_id,
            kind = %options.kind,
            "Issued impersonation token"
        );
        self.sign(&claims)
    }

    /// Verify an impersonation token issued by this manager
    ///
    /// # Errors
    ///
    /// See [`Validator::verify`]. A verified token that names no impersonator
    /// or session is `InvalidClaims`.
    pub async fn verify_impersonation_token(
        &self,
        token: &str,
    ) -> Result<ImpersonationClaims, ValidationError> {
        self.validator.verify(token).await?;
        let claims: ImpersonationClaims = decode_unverified(token)?;
        if claims.parse_impersonator_id().is_nil() || claims.session_id.is_empty() {
            return Err(JwtError::InvalidClaims.into());
        }
        Ok(claims)
    }

    /// A validator over this manager's public keys
    pub fn validator(&self) -> &JwksValidator {
        &self.validator
    }

    /// Verify a token issued by this manager
    ///
    /// # Errors
    ///
    /// See [`Validator::verify`].
    pub async fn verify(&self, token: &str) -> Result<Claims, ValidationError> {
        self.validator.verify(token).await
    }

    /// Read a token issued by this manager without checking its claims
    ///
    /// # Errors
    ///
    /// See [`Validator::parse`].
    pub async fn parse(&self, token: &str) -> Result<Claims, ValidationError> {
        self.validator.parse(token).await
    }

    fn sign(&self, claims: &impl Serialize) -> Result<String, TokenError> {
        let key = self
            .keys
            .get(&self.config.kid)
            .ok_or_else(|| TokenError::UnknownSigningKey(self.config.kid.clone()))?;
        let method = self
            .registry
            .get(SIGNING_ALGORITHM)
            .ok_or_else(|| TokenError::UnknownAlgorithm(SIGNING_ALGORITHM.to_string()))?;

        let header = TokenHeader::new(SIGNING_ALGORITHM, &self.config.kid);
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?),
        );
        let signature = method.sign(&signing_input, &key.encoding)?;

        Ok(format!("{signing_input}.{signature}"))
    }
}

/// Generate a PKCS#8 DER Ed25519 private key
///
/// # Errors
///
/// Returns [`TokenError::InvalidKey`] if the system entropy source fails.
pub fn generate_key() -> Result<Vec<u8>, TokenError> {
    Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
        .map(|document| document.as_ref().to_vec())
        .map_err(|e| TokenError::InvalidKey {
            kid: String::new(),
            reason: e.to_string(),
        })
}

fn load_key(kid: &str, pkcs8_der: &[u8]) -> Result<SigningKey, TokenError> {
    let invalid = |reason: String| TokenError::InvalidKey {
        kid: kid.to_string(),
        reason,
    };

    let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8_der)
        .map_err(|e| invalid(e.to_string()))?;

    let public: Jwk = serde_json::from_value(json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "x": URL_SAFE_NO_PAD.encode(pair.public_key().as_ref()),
        "kid": kid,
        "alg": SIGNING_ALGORITHM,
        "use": "sig",
    }))?;

    Ok(SigningKey {
        encoding: EncodingKey::from_ed_der(pkcs8_der),
        public,
    })
}

fn secs(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
