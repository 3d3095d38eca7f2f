//! JWT bearer tokens
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │   Validator (verify / parse)         │
//! │  - decode pipeline                   │
//! │  - exp / iat / nbf / aud / iss       │
//! └──────────────────────────────────────┘
//!      ▲                     ▲
//!      │ alg                 │ key
//! ┌────┴──────────┐   ┌──────┴──────────────┐
//! │ Signing method│   │ Key resolver        │
//! │ registry      │   │ - in-memory JWK set │
//! └───────────────┘   │ - cached JWKS       │
//!                     └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `claims` - payload claims and temporal checks
//! - `impersonation` - claims and options of impersonation tokens
//! - `registry` - algorithm name to signing method
//! - `validator` - the [`Validator`] capability and [`JwtValidator`]
//! - `jwks` - JWK set resolvers and the JWKS HTTP cache
//! - `manager` - token issuance over Ed25519 keys

pub mod claims;
pub mod impersonation;
pub mod jwks;
pub mod manager;
pub mod registry;
pub mod validator;

// Re-export commonly used types
pub use jsonwebtoken::jwk::{Jwk, JwkSet};
pub use claims::{Audience, Claims};
pub use jwks::{
    CachedJwksResolver, CachedJwksValidator, JwkSetResolver, JwksCache, JwksClient, JwksValidator,
    resolve_from_set,
};
pub use impersonation::{ImpersonationClaims, ImpersonationOptions};
pub use manager::{TokenManager, TokenPair};
pub use registry::{JwsAlgorithm, SigningMethod, SigningMethodFactory, SigningMethodRegistry};
pub use validator::{JwtValidator, KeyResolver, TokenHeader, Validator, is_expired};
