//! Bearer token validation against in-memory key sets

mod common;

use common::{AUDIENCE, ISSUER, TestKey, current_timestamp, test_jwt_claims, valid_claims};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pretty_assertions::assert_eq;
use serde_json::json;
use sigil_tokens::jwt::registry::JwsAlgorithm;
use sigil_tokens::{
    Claims, JwksValidator, JwtError, KeyError, SigningMethod, SigningMethodRegistry, TokenConfig,
    TokenManager, Validator, ValidationFlags,
};
use std::sync::Arc;
use std::time::Duration;
use ulid::Ulid;

const USER: &str = "01HZX3K2V7Q9M8N4P5R6S7T8W0";

fn key_set(keys: &[&TestKey]) -> JwkSet {
    serde_json::from_value(json!({
        "keys": keys.iter().map(|k| k.public_jwk()).collect::<Vec<_>>()
    }))
    .unwrap()
}

fn validator(keys: &[&TestKey]) -> JwksValidator {
    JwksValidator::from_key_set(key_set(keys), AUDIENCE, ISSUER)
}

#[tokio::test]
async fn test_valid_token() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(valid_claims(USER));

    let claims = validator(&[&key]).verify(&token).await.unwrap();
    assert_eq!(claims.sub.as_deref(), Some(USER));
    assert_eq!(claims.parse_user_id().to_string(), USER);
    assert_eq!(claims.parse_org_id().to_string(), "01HZX3K2V7Q9M8N4P5R6S7T8W9");
}

#[tokio::test]
async fn test_wrong_audience() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(test_jwt_claims(USER, ISSUER, "https://other.sigil.dev", 300));

    let err = validator(&[&key]).verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::InvalidAudience));
    assert!(!err.is(JwtError::InvalidIssuer));
    assert_eq!(err.flags(), ValidationFlags::AUDIENCE);
}

#[tokio::test]
async fn test_wrong_issuer() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(test_jwt_claims(USER, "https://evil.example", AUDIENCE, 300));

    let err = validator(&[&key]).verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::InvalidIssuer));
    assert!(!err.is(JwtError::InvalidAudience));
}

#[tokio::test]
async fn test_audience_and_issuer_failures_accumulate() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(test_jwt_claims(USER, "https://evil.example", "nope", -60));

    let err = validator(&[&key]).verify(&token).await.unwrap_err();
    let kinds: Vec<_> = err.kinds().collect();
    assert_eq!(
        kinds,
        vec![
            JwtError::InvalidAudience,
            JwtError::Expired,
            JwtError::InvalidIssuer
        ]
    );
}

#[tokio::test]
async fn test_missing_kid() {
    let key = TestKey::generate("k1");
    let encoding = EncodingKey::from_ed_der(&key.pkcs8_der);
    let token =
        jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &valid_claims(USER), &encoding)
            .unwrap();

    let err = validator(&[&key]).verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::Unverifiable));
    assert!(matches!(err.key_error(), Some(KeyError::MissingKid)));
}

#[tokio::test]
async fn test_unknown_kid() {
    let known = TestKey::generate("k1");
    let stranger = TestKey::generate("k2");
    let token = stranger.sign_claims(valid_claims(USER));

    let err = validator(&[&known]).verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::Unverifiable));
    assert!(matches!(
        err.key_error(),
        Some(KeyError::UnknownSigningKey { kid }) if kid == "k2"
    ));
}

#[tokio::test]
async fn test_algorithm_mismatch_rejected_before_key_use() {
    let key = TestKey::generate("k1");
    let token = key.sign(
        json!({ "alg": "ES256", "typ": "JWT", "kid": "k1" }),
        valid_claims(USER),
    );

    let err = validator(&[&key]).verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::Unverifiable));
    assert!(matches!(
        err.key_error(),
        Some(KeyError::AlgorithmMismatch { token_alg, key_alg })
            if token_alg == "ES256" && key_alg == "EdDSA"
    ));
}

#[tokio::test]
async fn test_key_without_algorithm_rejected() {
    let key = TestKey::generate("k1");
    let keys: JwkSet = serde_json::from_value(json!({ "keys": [key.jwk(None)] })).unwrap();
    let token = key.sign_claims(valid_claims(USER));

    let err = JwksValidator::from_key_set(keys, AUDIENCE, ISSUER)
        .verify(&token)
        .await
        .unwrap_err();
    assert!(matches!(
        err.key_error(),
        Some(KeyError::MissingKeyAlgorithm { .. })
    ));
}

#[tokio::test]
async fn test_hmac_and_none_are_not_accepted() {
    let key = TestKey::generate("k1");
    let v = validator(&[&key]);

    for alg in ["none", "HS256"] {
        let token = key.sign(
            json!({ "alg": alg, "kid": "k1" }),
            valid_claims(USER),
        );
        let err = v.verify(&token).await.unwrap_err();
        assert!(err.is(JwtError::Unverifiable), "{alg}");
        assert!(err.key_error().is_none(), "{alg} reached key resolution");
    }
}

#[tokio::test]
async fn test_tampered_payload() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(valid_claims(USER));
    let forged_payload = {
        use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
        let mut claims = valid_claims(USER);
        claims["user_id"] = json!(Ulid::new().to_string());
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap())
    };
    let mut parts: Vec<&str> = token.split('.').collect();
    parts[1] = &forged_payload;
    let forged = parts.join(".");

    let err = validator(&[&key]).parse(&forged).await.unwrap_err();
    assert!(err.is(JwtError::SignatureInvalid));
    assert!(!err.is(JwtError::Unverifiable));
}

#[tokio::test]
async fn test_parse_reads_expired_token() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(test_jwt_claims(USER, ISSUER, AUDIENCE, -3600));
    let v = validator(&[&key]);

    let err = v.verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::Expired));
    assert!(err.flags().contains(ValidationFlags::EXPIRED));

    let claims = v.parse(&token).await.unwrap();
    assert_eq!(claims.sub.as_deref(), Some(USER));
}

#[tokio::test]
async fn test_leeway_applies_to_expiry() {
    let key = TestKey::generate("k1");
    let token = key.sign_claims(test_jwt_claims(USER, ISSUER, AUDIENCE, -5));

    assert!(validator(&[&key]).verify(&token).await.is_err());
    assert!(
        validator(&[&key])
            .with_leeway(Duration::from_secs(30))
            .verify(&token)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_not_valid_yet_and_issued_in_future() {
    let key = TestKey::generate("k1");
    let now = current_timestamp();
    let mut claims = valid_claims(USER);
    claims["nbf"] = json!(now + 120);
    claims["iat"] = json!(now + 120);
    let token = key.sign_claims(claims);

    let err = validator(&[&key]).verify(&token).await.unwrap_err();
    assert!(err.is(JwtError::NotValidYet));
    assert!(err.is(JwtError::UsedBeforeIssued));
}

#[derive(Debug)]
struct Renamed(JwsAlgorithm);

impl SigningMethod for Renamed {
    fn alg(&self) -> &str {
        "TEST"
    }

    fn sign(
        &self,
        signing_input: &str,
        key: &EncodingKey,
    ) -> Result<String, sigil_tokens::SigningError> {
        self.0.sign(signing_input, key)
    }

    fn verify(
        &self,
        signing_input: &str,
        signature: &str,
        key: &jsonwebtoken::DecodingKey,
    ) -> Result<(), sigil_tokens::SigningError> {
        self.0.verify(signing_input, signature, key)
    }
}

#[tokio::test]
async fn test_registered_method_extends_accepted_algorithms() {
    let key = TestKey::generate("k1");
    let keys: JwkSet = serde_json::from_value(json!({ "keys": [key.jwk(Some("EdDSA"))] })).unwrap();
    let token = key.sign(json!({ "alg": "TEST", "kid": "k1" }), valid_claims(USER));

    let registry = Arc::new(SigningMethodRegistry::with_defaults());
    let v = JwksValidator::from_key_set(keys, AUDIENCE, ISSUER).with_registry(Arc::clone(&registry));

    // Unregistered: rejected before key lookup
    let err = v.verify(&token).await.unwrap_err();
    assert!(err.key_error().is_none());

    registry.register("TEST", || {
        Arc::new(Renamed(JwsAlgorithm::new(Algorithm::EdDSA))) as Arc<dyn SigningMethod>
    });
    assert!(v.algorithms().contains(&"TEST".to_string()));

    // Registered: reaches the key, whose declared alg differs
    let err = v.verify(&token).await.unwrap_err();
    assert!(matches!(
        err.key_error(),
        Some(KeyError::AlgorithmMismatch { .. })
    ));
}

#[tokio::test]
async fn test_manager_tokens_verify_against_published_keys() {
    let manager = TokenManager::new(TokenConfig {
        kid: "primary".into(),
        generate_keys: true,
        ..TokenConfig::new(AUDIENCE, ISSUER)
    })
    .unwrap();

    let user = Ulid::new();
    let org = Ulid::new();
    let token = manager
        .create_access_token(&Claims::for_user(user, org))
        .unwrap();

    let external = JwksValidator::from_key_set(manager.keys(), AUDIENCE, ISSUER);
    let claims = external.verify(&token).await.unwrap();
    assert_eq!(claims.parse_user_id(), user);
    assert_eq!(claims.parse_org_id(), org);
}
