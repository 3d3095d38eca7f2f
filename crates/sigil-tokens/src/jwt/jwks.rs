//! JWKS key resolution and caching
//!
//! Two resolvers plug into [`JwtValidator`]:
//!
//! - [`JwkSetResolver`] looks keys up in an in-memory [`JwkSet`]
//!   ([`JwksValidator`]).
//! - [`CachedJwksResolver`] reads the key set for one endpoint out of a
//!   [`JwksCache`], fetching it on first use, then delegates to the same
//!   lookup ([`CachedJwksValidator`]).
//!
//! # Key lookup
//!
//! The header's `kid` selects the key. The key must declare an `alg`, and it
//! must equal the token's `alg`; that comparison happens before any key
//! material is decoded, so a token can never pick the algorithm its key is
//! used with.
//!
//! # Caching
//!
//! - TTL-based: 10 minutes by default
//! - one fetch at a time per endpoint; callers that waited on a fetch reuse
//!   its result
//! - a failed fetch never clears the cache. An expired set keeps serving
//!   until a fetch succeeds; an explicit [`JwksClient::refresh`] reports the
//!   failure instead
//! - HTTPS only, except for loopback hosts

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{JwkSet, KeyAlgorithm};
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::validator::{JwtValidator, KeyResolver, TokenHeader};
use crate::config::TokenConfig;
use crate::error::{JwksError, KeyError};

/// Default key set TTL
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);

/// Timeout for a single JWKS request
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the key for `header` from `keys`
///
/// # Errors
///
/// - [`KeyError::MissingKid`] if the header has no `kid`
/// - [`KeyError::UnknownSigningKey`] if no key has that id
/// - [`KeyError::MissingKeyAlgorithm`] if the key declares no `alg`
/// - [`KeyError::AlgorithmMismatch`] if the key's `alg` differs from the token's
/// - [`KeyError::InvalidKeyMaterial`] if the key can't be decoded
pub fn resolve_from_set(keys: &JwkSet, header: &TokenHeader) -> Result<DecodingKey, KeyError> {
    let kid = header.kid.as_deref().ok_or(KeyError::MissingKid)?;

    let jwk = keys.find(kid).ok_or_else(|| KeyError::UnknownSigningKey {
        kid: kid.to_string(),
    })?;

    let key_alg = jwk
        .common
        .key_algorithm
        .as_ref()
        .ok_or_else(|| KeyError::MissingKeyAlgorithm {
            kid: kid.to_string(),
        })?;

    match key_algorithm_name(key_alg) {
        Some(name) if name == header.alg => {}
        name => {
            return Err(KeyError::AlgorithmMismatch {
                token_alg: header.alg.clone(),
                key_alg: name.unwrap_or("unsupported").to_string(),
            });
        }
    }

    DecodingKey::from_jwk(jwk).map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))
}

/// The JWS `alg` spelling of a key's declared algorithm
///
/// `None` for encryption algorithms (`RSA1_5`, `RSA-OAEP`, ...), which never
/// match a token's signing algorithm.
pub fn key_algorithm_name(alg: &KeyAlgorithm) -> Option<&'static str> {
    let name = match alg {
        KeyAlgorithm::HS256 => "HS256",
        KeyAlgorithm::HS384 => "HS384",
        KeyAlgorithm::HS512 => "HS512",
        KeyAlgorithm::ES256 => "ES256",
        KeyAlgorithm::ES384 => "ES384",
        KeyAlgorithm::RS256 => "RS256",
        KeyAlgorithm::RS384 => "RS384",
        KeyAlgorithm::RS512 => "RS512",
        KeyAlgorithm::PS256 => "PS256",
        KeyAlgorithm::PS384 => "PS384",
        KeyAlgorithm::PS512 => "PS512",
        KeyAlgorithm::EdDSA => "EdDSA",
        _ => return None,
    };
    Some(name)
}

/// Resolves keys from a fixed in-memory key set
#[derive(Debug, Clone)]
pub struct JwkSetResolver {
    keys: Arc<JwkSet>,
}

impl JwkSetResolver {
    /// Resolve from `keys`
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// The key set
    pub fn keys(&self) -> &JwkSet {
        &self.keys
    }
}

#[async_trait]
impl KeyResolver for JwkSetResolver {
    async fn resolve(&self, header: &TokenHeader) -> Result<DecodingKey, KeyError> {
        resolve_from_set(&self.keys, header)
    }
}

/// Validator over an in-memory key set
pub type JwksValidator = JwtValidator<JwkSetResolver>;

impl JwtValidator<JwkSetResolver> {
    /// Validate against `keys`, expecting `audience` and `issuer`
    pub fn from_key_set(
        keys: JwkSet,
        audience: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        JwtValidator::new(JwkSetResolver::new(keys), audience, issuer)
    }
}

/// A fetched key set and when it was fetched
#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: Arc<JwkSet>,
    cached_at: SystemTime,
    ttl: Duration,
}

impl CachedJwks {
    fn is_valid(&self) -> bool {
        match SystemTime::now().duration_since(self.cached_at) {
            Ok(age) => age < self.ttl,
            // clock went backwards
            Err(_) => false,
        }
    }
}

/// Fetches and caches the key set published at one endpoint
#[derive(Debug)]
pub struct JwksClient {
    jwks_uri: String,
    cache: RwLock<Option<CachedJwks>>,
    fetch_lock: Mutex<()>,
    http_client: reqwest::Client,
    cache_ttl: Duration,
}

impl JwksClient {
    /// Create a client for `jwks_uri` with the default TTL
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::InsecureEndpoint`] for a non-HTTPS, non-loopback
    /// URL, or [`JwksError::Http`] if the HTTP client can't be built.
    pub fn new(jwks_uri: impl Into<String>) -> Result<Self, JwksError> {
        Self::with_ttl(jwks_uri, DEFAULT_JWKS_TTL)
    }

    /// Create a client with a custom cache TTL
    ///
    /// # Errors
    ///
    /// See [`JwksClient::new`].
    pub fn with_ttl(jwks_uri: impl Into<String>, cache_ttl: Duration) -> Result<Self, JwksError> {
        let jwks_uri = jwks_uri.into();
        check_endpoint(&jwks_uri)?;

        Ok(Self {
            jwks_uri,
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(()),
            http_client: reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?,
            cache_ttl,
        })
    }

    /// The endpoint URL
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// The cache TTL
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// The cached key set, fetching it if absent or expired
    ///
    /// When the cached set has expired and the fetch fails, the expired set
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns a [`JwksError`] if nothing is cached and the fetch fails.
    pub async fn get_jwks(&self) -> Result<Arc<JwkSet>, JwksError> {
        if let Some(jwks) = self.fresh().await {
            debug!(jwks_uri = %self.jwks_uri, "Using cached JWKS");
            return Ok(jwks);
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have fetched while we waited
        if let Some(jwks) = self.fresh().await {
            return Ok(jwks);
        }

        match self.fetch_and_cache().await {
            Ok(jwks) => Ok(jwks),
            Err(e) => match self.cached().await {
                Some(stale) => {
                    warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS fetch failed, serving expired keys");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Re-fetch the key set regardless of cache state
    ///
    /// # Errors
    ///
    /// Returns a [`JwksError`] if the fetch fails. The previously cached set
    /// is left in place.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, JwksError> {
        let _guard = self.fetch_lock.lock().await;
        self.fetch_and_cache().await.inspect_err(|e| {
            warn!(jwks_uri = %self.jwks_uri, error = %e, "JWKS refresh failed, keeping cached keys");
        })
    }

    /// The cached key set regardless of age
    pub async fn cached(&self) -> Option<Arc<JwkSet>> {
        self.cache.read().await.as_ref().map(|c| Arc::clone(&c.jwks))
    }

    /// Drop the cached key set
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
        debug!(jwks_uri = %self.jwks_uri, "JWKS cache cleared");
    }

    async fn fresh(&self) -> Option<Arc<JwkSet>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|cached| cached.is_valid())
            .map(|cached| Arc::clone(&cached.jwks))
    }

    async fn fetch_and_cache(&self) -> Result<Arc<JwkSet>, JwksError> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .inspect_err(|e| error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS"))?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %self.jwks_uri, status = %status, "JWKS endpoint returned error status");
            return Err(JwksError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let jwks: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to parse JWKS JSON");
            JwksError::InvalidFormat(e.to_string())
        })?;

        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );

        let jwks = Arc::new(jwks);
        *self.cache.write().await = Some(CachedJwks {
            jwks: Arc::clone(&jwks),
            cached_at: SystemTime::now(),
            ttl: self.cache_ttl,
        });

        Ok(jwks)
    }
}

fn check_endpoint(jwks_uri: &str) -> Result<(), JwksError> {
    let url = reqwest::Url::parse(jwks_uri)
        .map_err(|_| JwksError::InsecureEndpoint(jwks_uri.to_string()))?;

    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        _ => Err(JwksError::InsecureEndpoint(jwks_uri.to_string())),
    }
}

/// JWKS clients keyed by endpoint URL
///
/// Endpoints are registered once, then read through [`JwksCache::get`].
/// Each endpoint fetches independently.
#[derive(Debug)]
pub struct JwksCache {
    clients: SyncRwLock<HashMap<String, Arc<JwksClient>>>,
    ttl: Duration,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    /// Create an empty cache with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_JWKS_TTL)
    }

    /// Create an empty cache whose endpoints expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            clients: SyncRwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Register `url`, returning its client
    ///
    /// Registering an endpoint twice returns the existing client.
    ///
    /// # Errors
    ///
    /// See [`JwksClient::new`].
    pub fn register(&self, url: &str) -> Result<Arc<JwksClient>, JwksError> {
        if let Some(client) = self.clients.read().get(url) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write();
        if let Some(client) = clients.get(url) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(JwksClient::with_ttl(url, self.ttl)?);
        clients.insert(url.to_string(), Arc::clone(&client));
        debug!(jwks_uri = url, "Registered JWKS endpoint");
        Ok(client)
    }

    /// Whether `url` is registered
    pub fn is_registered(&self, url: &str) -> bool {
        self.clients.read().contains_key(url)
    }

    /// The client for a registered endpoint
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::NotRegistered`] for an unknown endpoint.
    pub fn client(&self, url: &str) -> Result<Arc<JwksClient>, JwksError> {
        self.clients
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| JwksError::NotRegistered(url.to_string()))
    }

    /// The key set for a registered endpoint, fetching on first use
    ///
    /// # Errors
    ///
    /// See [`JwksClient::get_jwks`].
    pub async fn get(&self, url: &str) -> Result<Arc<JwkSet>, JwksError> {
        self.client(url)?.get_jwks().await
    }

    /// Force a re-fetch of a registered endpoint
    ///
    /// # Errors
    ///
    /// See [`JwksClient::refresh`].
    pub async fn refresh(&self, url: &str) -> Result<Arc<JwkSet>, JwksError> {
        self.client(url)?.refresh().await
    }
}

/// Resolves keys from the cached key set of one endpoint
#[derive(Debug, Clone)]
pub struct CachedJwksResolver {
    cache: Arc<JwksCache>,
    endpoint: String,
}

impl CachedJwksResolver {
    /// Resolve from `endpoint` in `cache`, registering it if needed
    ///
    /// # Errors
    ///
    /// See [`JwksCache::register`].
    pub fn new(cache: Arc<JwksCache>, endpoint: impl Into<String>) -> Result<Self, JwksError> {
        let endpoint = endpoint.into();
        cache.register(&endpoint)?;
        Ok(Self { cache, endpoint })
    }

    /// The endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Force a re-fetch of the endpoint
    ///
    /// # Errors
    ///
    /// Returns the fetch failure; cached keys stay usable.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        self.cache.refresh(&self.endpoint).await.map(|_| ())
    }
}

#[async_trait]
impl KeyResolver for CachedJwksResolver {
    async fn resolve(&self, header: &TokenHeader) -> Result<DecodingKey, KeyError> {
        let keys = self.cache.get(&self.endpoint).await?;
        resolve_from_set(&keys, header)
    }
}

/// Validator over a remote, cached key set
pub type CachedJwksValidator = JwtValidator<CachedJwksResolver>;

impl JwtValidator<CachedJwksResolver> {
    /// Validate against the key set published at `endpoint`
    ///
    /// Nothing is fetched until the first token is checked.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::InsecureEndpoint`] for a non-HTTPS endpoint.
    pub fn cached(
        cache: Arc<JwksCache>,
        endpoint: impl Into<String>,
        audience: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Result<Self, JwksError> {
        Ok(JwtValidator::new(
            CachedJwksResolver::new(cache, endpoint)?,
            audience,
            issuer,
        ))
    }

    /// Validate against `config.jwks_endpoint` with the configured
    /// audience, issuer and leeway
    ///
    /// The cache TTL is the cache's own; build it with
    /// [`JwksCache::with_ttl`]`(config.jwks_refresh_interval)` to honor the
    /// configured interval.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::MissingEndpoint`] if no endpoint is configured, or
    /// [`JwksError::InsecureEndpoint`] for a non-HTTPS endpoint.
    pub fn from_config(cache: Arc<JwksCache>, config: &TokenConfig) -> Result<Self, JwksError> {
        let endpoint = config
            .jwks_endpoint
            .as_deref()
            .ok_or(JwksError::MissingEndpoint)?;

        Ok(Self::cached(cache, endpoint, &config.audience, &config.issuer)?
            .with_leeway(config.leeway))
    }

    /// Force a re-fetch of the key set
    ///
    /// # Errors
    ///
    /// Returns the fetch failure; previously cached keys stay usable.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        self.resolver().refresh().await
    }
}
