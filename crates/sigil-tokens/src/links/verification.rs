use serde::{Deserialize, Serialize};

use super::{LinkKind, LinkToken, MacInput, SigningInfo, VERIFICATION_TOKEN_TTL};
use crate::error::LinkTokenError;

/// Email verification link token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationToken {
    /// Expiry and nonce
    #[serde(flatten)]
    pub signing_info: SigningInfo,
    /// The address being verified
    pub email: String,
}

impl VerificationToken {
    /// Create a verification token for `email`, valid for seven days
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::MissingEmail`] for an empty address.
    pub fn new(email: impl Into<String>) -> Result<Self, LinkTokenError> {
        let email = email.into();
        if email.is_empty() {
            return Err(LinkTokenError::MissingEmail);
        }

        Ok(Self {
            signing_info: SigningInfo::new(VERIFICATION_TOKEN_TTL)?,
            email,
        })
    }
}

impl LinkToken for VerificationToken {
    const KIND: LinkKind = LinkKind::Verification;

    fn signing_info(&self) -> &SigningInfo {
        &self.signing_info
    }

    fn check_identity(&self) -> Result<(), LinkTokenError> {
        if self.email.is_empty() {
            return Err(LinkTokenError::TokenMissingEmail);
        }
        Ok(())
    }

    fn write_payload(&self, input: &mut MacInput) {
        input.field(self.email.as_bytes());
    }
}
