//! # Sigil Tokens
//!
//! Token security primitives for the Sigil API:
//!
//! - **Signed link tokens** for email verification, password reset,
//!   organization invitations and file downloads. Each token signs to a
//!   one-time `(signature, secret)` pair that is carried in the link and
//!   verified statelessly with HMAC-SHA256 and a constant-time comparison.
//! - **JWT bearer tokens** validated against a local key set or a cached
//!   remote JWKS endpoint, with a pluggable signing method registry.
//! - **Token issuance** of access/refresh pairs and audited impersonation
//!   tokens over Ed25519 keys.
//!
//! ## Architecture
//!
//! - [`links`] - `SigningInfo` and the link token kinds
//! - [`jwt`] - claims, validator, key resolution, registry, issuance
//! - [`error`] - link and JWT error taxonomies
//! - [`config`] - issuance and validation settings
//!
//! ## Quick Start
//!
//! ```rust
//! use sigil_tokens::{LinkToken, LinkTokenError, VerificationToken};
//!
//! let token = VerificationToken::new("alice@example.com")?;
//! let (signature, secret) = token.sign()?;
//!
//! // Later, with the token fields restored and the pair taken from the link
//! token.verify(&signature, &secret)?;
//!
//! let mut other = token.clone();
//! other.email = "mallory@example.com".into();
//! assert_eq!(other.verify(&signature, &secret), Err(LinkTokenError::Invalid));
//! # Ok::<(), LinkTokenError>(())
//! ```
//!
//! Bearer tokens:
//!
//! ```rust
//! use sigil_tokens::{Claims, TokenConfig, TokenManager};
//! use ulid::Ulid;
//!
//! # tokio_test::block_on(async {
//! let config = TokenConfig {
//!     generate_keys: true,
//!     ..TokenConfig::new("https://api.example.com", "https://auth.example.com")
//! };
//! let manager = TokenManager::new(config)?;
//!
//! let token = manager.create_access_token(&Claims::for_user(Ulid::new(), Ulid::new()))?;
//! let claims = manager.verify(&token).await?;
//! assert!(!claims.parse_user_id().is_nil());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod jwt;
pub mod links;

#[doc(inline)]
pub use config::TokenConfig;

#[doc(inline)]
pub use error::{
    JwksError, JwtError, KeyError, LinkTokenError, SigningError, TokenError, ValidationError,
    ValidationFlags,
};

#[doc(inline)]
pub use links::{
    DownloadToken, LinkToken, OrgInviteToken, ResetToken, SigningInfo, VerificationToken,
    decode_secret, encode_secret,
};

#[doc(inline)]
pub use jwt::{
    Audience, CachedJwksValidator, Claims, ImpersonationClaims, ImpersonationOptions, JwksCache,
    JwksValidator, JwtValidator, KeyResolver, SigningMethod, SigningMethodRegistry, TokenHeader,
    TokenManager, TokenPair, Validator, is_expired,
};
