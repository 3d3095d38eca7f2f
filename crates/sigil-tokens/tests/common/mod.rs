//! Common test utilities for integration tests
//!
//! A mock JWKS endpoint and Ed25519 keys that can sign tokens with arbitrary
//! headers, for exercising the validators with tokens the manager would
//! never issue.

#![allow(dead_code)]

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const AUDIENCE: &str = "https://api.sigil.dev";
pub const ISSUER: &str = "https://auth.sigil.dev";

/// Mock authorization server publishing a JWKS document
pub struct MockJwksServer {
    pub server: MockServer,
    pub jwks_endpoint: String,
}

impl MockJwksServer {
    /// Start a mock server; nothing is mounted yet
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks_endpoint = format!("{}/jwks", server.uri());
        Self {
            server,
            jwks_endpoint,
        }
    }

    /// Serve `keys` on every request
    pub async fn mock_jwks(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for the next `times` requests only
    pub async fn mock_jwks_times(&self, keys: Vec<Value>, times: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answer with `status` on every request
    pub async fn mock_jwks_error(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answer with a body that is not a key set
    pub async fn mock_jwks_garbage(&self) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted response
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of JWKS requests received so far
    pub async fn jwks_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.iter().filter(|r| r.url.path() == "/jwks").count())
            .unwrap_or(0)
    }
}

/// An Ed25519 test key
pub struct TestKey {
    pub kid: String,
    pub pkcs8_der: Vec<u8>,
    public: Vec<u8>,
}

impl TestKey {
    /// Generate a key with id `kid`
    pub fn generate(kid: &str) -> Self {
        let document = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new())
            .expect("Failed to generate Ed25519 key");
        let pair = Ed25519KeyPair::from_pkcs8(document.as_ref()).expect("Invalid generated key");

        Self {
            kid: kid.to_string(),
            pkcs8_der: document.as_ref().to_vec(),
            public: pair.public_key().as_ref().to_vec(),
        }
    }

    /// The public JWK, declaring `alg` when given
    pub fn jwk(&self, alg: Option<&str>) -> Value {
        let mut jwk = json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "use": "sig",
            "kid": self.kid,
            "x": URL_SAFE_NO_PAD.encode(&self.public),
        });
        if let Some(alg) = alg {
            jwk["alg"] = json!(alg);
        }
        jwk
    }

    /// The public JWK declaring `EdDSA`
    pub fn public_jwk(&self) -> Value {
        self.jwk(Some("EdDSA"))
    }

    /// Sign `claims` under an arbitrary `header`
    pub fn sign(&self, header: Value, claims: Value) -> String {
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
        );
        let key = EncodingKey::from_ed_der(&self.pkcs8_der);
        let signature = jsonwebtoken::crypto::sign(signing_input.as_bytes(), &key, Algorithm::EdDSA)
            .expect("Failed to sign test JWT");
        format!("{signing_input}.{signature}")
    }

    /// Sign `claims` with a well-formed `EdDSA` header naming this key
    pub fn sign_claims(&self, claims: Value) -> String {
        self.sign(
            json!({ "alg": "EdDSA", "typ": "JWT", "kid": self.kid }),
            claims,
        )
    }
}

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Create test JWT claims with standard fields
pub fn test_jwt_claims(sub: &str, iss: &str, aud: &str, exp_offset_secs: i64) -> Value {
    let now = current_timestamp();
    json!({
        "sub": sub,
        "iss": iss,
        "aud": aud,
        "exp": now + exp_offset_secs,
        "iat": now,
        "nbf": now,
        "user_id": sub,
        "org": "01HZX3K2V7Q9M8N4P5R6S7T8W9",
    })
}

/// Claims for [`AUDIENCE`] and [`ISSUER`] valid for five minutes
pub fn valid_claims(sub: &str) -> Value {
    test_jwt_claims(sub, ISSUER, AUDIENCE, 300)
}
