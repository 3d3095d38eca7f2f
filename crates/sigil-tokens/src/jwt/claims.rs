//! Access and refresh token claims
//!
//! Registered claims per RFC 7519 plus the two identifiers every session
//! carries: `user_id` and `org`. Both identifiers are kept as raw strings on
//! the wire and parsed on demand; a missing or malformed value parses to
//! [`Ulid::nil()`], so callers must check for nil explicitly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use ulid::Ulid;

use crate::error::{JwtError, ValidationError};

/// JWT payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer (iss)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject (sub)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud), a single string or an array on the wire
    #[serde(default, skip_serializing_if = "Audience::is_empty")]
    pub aud: Audience,

    /// Expiration time (exp), Unix seconds
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,

    /// Not before (nbf), Unix seconds
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,

    /// Issued at (iat), Unix seconds
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    /// JWT ID (jti)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// User identifier (ULID)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,

    /// Organization identifier (ULID)
    #[serde(default, rename = "org", skip_serializing_if = "String::is_empty")]
    pub org_id: String,
}

impl Claims {
    /// Claims for a user acting within an organization
    pub fn for_user(user_id: Ulid, org_id: Ulid) -> Self {
        Self {
            sub: Some(user_id.to_string()),
            user_id: user_id.to_string(),
            org_id: org_id.to_string(),
            ..Self::default()
        }
    }

    /// The user id, or [`Ulid::nil()`] if absent or malformed
    pub fn parse_user_id(&self) -> Ulid {
        parse_or_nil(&self.user_id)
    }

    /// The organization id, or [`Ulid::nil()`] if absent or malformed
    pub fn parse_org_id(&self) -> Ulid {
        parse_or_nil(&self.org_id)
    }

    /// Check `exp`, `iat` and `nbf` against `now` (Unix seconds)
    ///
    /// Absent claims are not checked here. All failing conditions are
    /// reported together.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] flagged with every failed condition.
    pub fn validate_times(&self, now: i64, leeway: Duration) -> Result<(), ValidationError> {
        let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
        let mut failures: Option<ValidationError> = None;
        let mut fail = |kind: JwtError| match failures.as_mut() {
            Some(err) => err.push(kind),
            None => failures = Some(ValidationError::from_kind(kind)),
        };

        if let Some(exp) = self.exp
            && now >= exp.saturating_add(leeway)
        {
            fail(JwtError::Expired);
        }

        if let Some(iat) = self.iat
            && now.saturating_add(leeway) < iat
        {
            fail(JwtError::UsedBeforeIssued);
        }

        if let Some(nbf) = self.nbf
            && now.saturating_add(leeway) < nbf
        {
            fail(JwtError::NotValidYet);
        }

        match failures {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn parse_or_nil(value: &str) -> Ulid {
    Ulid::from_string(value).unwrap_or_else(|_| Ulid::nil())
}

/// A NumericDate that may carry a fractional part; fractions are truncated
pub(crate) fn numeric_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Whole(i64),
        Fractional(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Whole(secs) => secs,
        Raw::Fractional(secs) => secs as i64,
    }))
}

/// The `aud` claim
///
/// Serialized as a bare string when it holds one value, as an array otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(pub Vec<String>);

impl Audience {
    /// Whether no audience is present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the audience values
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Audience {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            many => many.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(value) => Self(vec![value]),
            Raw::Many(values) => Self(values),
        })
    }
}
