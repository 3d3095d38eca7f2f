//! Signing method registry
//!
//! Maps algorithm names (the JWT `alg` header) to factories producing
//! [`SigningMethod`]s. The validator accepts exactly the algorithms present
//! in its registry, so extending the accepted set means registering a
//! method, not touching validator code.
//!
//! Registration takes the write lock; lookups and listing take the read
//! lock. The expected pattern is register-at-startup, read-many afterwards.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SigningError;

/// A JWS signing algorithm
pub trait SigningMethod: Send + Sync + fmt::Debug {
    /// The `alg` header value this method handles
    fn alg(&self) -> &str;

    /// Sign `signing_input` (`header.payload`), returning the base64url signature
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] if the key is unusable for this algorithm.
    fn sign(&self, signing_input: &str, key: &EncodingKey) -> Result<String, SigningError>;

    /// Verify a base64url `signature` over `signing_input`
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidSignature`] on mismatch, or another
    /// [`SigningError`] if the key is unusable.
    fn verify(
        &self,
        signing_input: &str,
        signature: &str,
        key: &DecodingKey,
    ) -> Result<(), SigningError>;
}

/// Builds a [`SigningMethod`] on lookup
pub type SigningMethodFactory = Arc<dyn Fn() -> Arc<dyn SigningMethod> + Send + Sync>;

/// A signing method backed by a `jsonwebtoken` algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JwsAlgorithm {
    algorithm: Algorithm,
    name: &'static str,
}

impl JwsAlgorithm {
    /// Wrap a `jsonwebtoken` algorithm
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            name: algorithm_name(algorithm),
        }
    }

    /// The wrapped algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl SigningMethod for JwsAlgorithm {
    fn alg(&self) -> &str {
        self.name
    }

    fn sign(&self, signing_input: &str, key: &EncodingKey) -> Result<String, SigningError> {
        Ok(jsonwebtoken::crypto::sign(
            signing_input.as_bytes(),
            key,
            self.algorithm,
        )?)
    }

    fn verify(
        &self,
        signing_input: &str,
        signature: &str,
        key: &DecodingKey,
    ) -> Result<(), SigningError> {
        if jsonwebtoken::crypto::verify(signature, signing_input.as_bytes(), key, self.algorithm)? {
            Ok(())
        } else {
            Err(SigningError::InvalidSignature)
        }
    }
}

/// The `alg` header spelling of a `jsonwebtoken` algorithm
pub fn algorithm_name(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}

/// Asymmetric algorithms registered by [`SigningMethodRegistry::with_defaults`]
///
/// HMAC algorithms are left out: a validator resolving public keys from a
/// JWKS must never accept a symmetric signature.
pub const DEFAULT_ALGORITHMS: &[Algorithm] = &[
    Algorithm::EdDSA,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Thread-safe map of algorithm name to signing method factory
#[derive(Default)]
pub struct SigningMethodRegistry {
    methods: RwLock<HashMap<String, SigningMethodFactory>>,
}

impl fmt::Debug for SigningMethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMethodRegistry")
            .field("algorithms", &self.algorithms())
            .finish()
    }
}

impl SigningMethodRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding [`DEFAULT_ALGORITHMS`]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for &algorithm in DEFAULT_ALGORITHMS {
            registry.register(algorithm_name(algorithm), move || {
                Arc::new(JwsAlgorithm::new(algorithm)) as Arc<dyn SigningMethod>
            });
        }
        registry
    }

    /// Register `factory` under `alg`, replacing any existing entry
    pub fn register<F>(&self, alg: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn SigningMethod> + Send + Sync + 'static,
    {
        self.methods.write().insert(alg.into(), Arc::new(factory));
    }

    /// Remove `alg`, returning whether it was registered
    pub fn unregister(&self, alg: &str) -> bool {
        self.methods.write().remove(alg).is_some()
    }

    /// Build the method registered under `alg`
    pub fn get(&self, alg: &str) -> Option<Arc<dyn SigningMethod>> {
        // Clone the factory out so it runs without holding the lock
        let factory = self.methods.read().get(alg).cloned()?;
        Some(factory())
    }

    /// Whether `alg` is registered
    pub fn contains(&self, alg: &str) -> bool {
        self.methods.read().contains_key(alg)
    }

    /// Registered algorithm names, sorted
    pub fn algorithms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Unsigned;

    impl SigningMethod for Unsigned {
        fn alg(&self) -> &str {
            "TEST"
        }

        fn sign(&self, _: &str, _: &EncodingKey) -> Result<String, SigningError> {
            Ok(String::new())
        }

        fn verify(&self, _: &str, signature: &str, _: &DecodingKey) -> Result<(), SigningError> {
            if signature.is_empty() {
                Ok(())
            } else {
                Err(SigningError::InvalidSignature)
            }
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = SigningMethodRegistry::new();
        registry.register("TEST", || Arc::new(Unsigned) as Arc<dyn SigningMethod>);

        let method = registry.get("TEST").expect("registered method");
        assert_eq!(method.alg(), "TEST");
        assert!(registry.algorithms().contains(&"TEST".to_string()));
    }

    #[test]
    fn test_unknown_alg() {
        let registry = SigningMethodRegistry::with_defaults();
        assert!(registry.get("none").is_none());
        assert!(registry.get("HS256").is_none());
        assert!(!registry.contains("TEST"));
    }

    #[test]
    fn test_defaults_listed_sorted() {
        let registry = SigningMethodRegistry::with_defaults();
        let algs = registry.algorithms();
        assert_eq!(algs.len(), DEFAULT_ALGORITHMS.len());
        let mut sorted = algs.clone();
        sorted.sort();
        assert_eq!(algs, sorted);
        assert!(algs.contains(&"EdDSA".to_string()));
    }

    #[test]
    fn test_unregister() {
        let registry = SigningMethodRegistry::with_defaults();
        assert!(registry.unregister("RS256"));
        assert!(!registry.unregister("RS256"));
        assert!(registry.get("RS256").is_none());
    }

    #[test]
    fn test_concurrent_reads_during_registration() {
        let registry = Arc::new(SigningMethodRegistry::with_defaults());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    if i % 2 == 0 {
                        registry.register(format!("TEST{i}"), || {
                            Arc::new(Unsigned) as Arc<dyn SigningMethod>
                        });
                    }
                    registry.get("EdDSA").is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(registry.algorithms().len(), DEFAULT_ALGORITHMS.len() + 4);
    }
}
