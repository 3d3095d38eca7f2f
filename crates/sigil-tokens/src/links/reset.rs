use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{LinkKind, LinkToken, MacInput, RESET_TOKEN_TTL, SigningInfo};
use crate::error::LinkTokenError;

/// Password reset link token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetToken {
    /// Expiry and nonce
    #[serde(flatten)]
    pub signing_info: SigningInfo,
    /// The user whose password may be reset
    pub user_id: Ulid,
}

impl Default for ResetToken {
    fn default() -> Self {
        Self {
            signing_info: SigningInfo::default(),
            user_id: Ulid::nil(),
        }
    }
}

impl ResetToken {
    /// Create a reset token for `user_id`, valid for fifteen minutes
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::MissingUserId`] for the nil id.
    pub fn new(user_id: Ulid) -> Result<Self, LinkTokenError> {
        if user_id.is_nil() {
            return Err(LinkTokenError::MissingUserId);
        }

        Ok(Self {
            signing_info: SigningInfo::new(RESET_TOKEN_TTL)?,
            user_id,
        })
    }
}

impl LinkToken for ResetToken {
    const KIND: LinkKind = LinkKind::Reset;

    fn signing_info(&self) -> &SigningInfo {
        &self.signing_info
    }

    fn check_identity(&self) -> Result<(), LinkTokenError> {
        if self.user_id.is_nil() {
            return Err(LinkTokenError::TokenMissingUserId);
        }
        Ok(())
    }

    fn write_payload(&self, input: &mut MacInput) {
        input.field(&self.user_id.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_new_rejects_nil_user() {
        assert_eq!(
            ResetToken::new(Ulid::nil()),
            Err(LinkTokenError::MissingUserId)
        );
    }

    #[test]
    fn test_expiry_window() {
        let token = ResetToken::new(Ulid::new()).unwrap();
        let remaining = token.signing_info.expires_at - Utc::now();
        assert!(remaining <= RESET_TOKEN_TTL);
        assert!(remaining > RESET_TOKEN_TTL - chrono::Duration::minutes(1));
    }
}
