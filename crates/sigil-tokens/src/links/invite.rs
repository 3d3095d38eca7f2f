use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{INVITE_TOKEN_TTL, LinkKind, LinkToken, MacInput, SigningInfo};
use crate::error::LinkTokenError;

/// Organization invitation link token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInviteToken {
    /// Expiry and nonce
    #[serde(flatten)]
    pub signing_info: SigningInfo,
    /// The invited address
    pub email: String,
    /// The inviting organization
    pub org_id: Ulid,
}

impl Default for OrgInviteToken {
    fn default() -> Self {
        Self {
            signing_info: SigningInfo::default(),
            email: String::new(),
            org_id: Ulid::nil(),
        }
    }
}

impl OrgInviteToken {
    /// Create an invitation for `email` to join `org_id`, valid for fourteen days
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::InviteMissingEmail`] or
    /// [`LinkTokenError::InviteMissingOrgId`] when either is absent.
    pub fn new(email: impl Into<String>, org_id: Ulid) -> Result<Self, LinkTokenError> {
        let token = Self {
            signing_info: SigningInfo::default(),
            email: email.into(),
            org_id,
        };
        token.check_identity()?;

        Ok(Self {
            signing_info: SigningInfo::new(INVITE_TOKEN_TTL)?,
            ..token
        })
    }
}

impl LinkToken for OrgInviteToken {
    const KIND: LinkKind = LinkKind::OrgInvite;

    fn signing_info(&self) -> &SigningInfo {
        &self.signing_info
    }

    fn check_identity(&self) -> Result<(), LinkTokenError> {
        if self.email.is_empty() {
            return Err(LinkTokenError::InviteMissingEmail);
        }
        if self.org_id.is_nil() {
            return Err(LinkTokenError::InviteMissingOrgId);
        }
        Ok(())
    }

    fn write_payload(&self, input: &mut MacInput) {
        input.field(self.email.as_bytes()).field(&self.org_id.to_bytes());
    }
}
