use chrono::Duration;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{DOWNLOAD_TOKEN_TTL, LinkKind, LinkToken, MacInput, SigningInfo, expiry_after};
use crate::error::LinkTokenError;

/// Signed file download link token
///
/// Unlike the email flows, the whole token is usually carried inside the link
/// next to the signature, so it is serde-serializable. Every field, including
/// the optional metadata, is covered by the MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadToken {
    /// Expiry and nonce
    #[serde(flatten)]
    pub signing_info: SigningInfo,
    /// Unique id of this download grant
    pub token_id: Ulid,
    /// The object being downloaded
    pub object_uri: String,
    /// Content type to serve the object with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// File name to serve the object as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Requesting user, if the download is user-bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Ulid>,
    /// Owning organization, if the download is org-bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Ulid>,
}

impl DownloadToken {
    /// Create a download token for `object_uri`, valid for one hour
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::MissingObjectUri`] for an empty URI.
    pub fn new(object_uri: impl Into<String>) -> Result<Self, LinkTokenError> {
        let object_uri = object_uri.into();
        if object_uri.is_empty() {
            return Err(LinkTokenError::MissingObjectUri);
        }

        Ok(Self {
            signing_info: SigningInfo::new(DOWNLOAD_TOKEN_TTL)?,
            token_id: Ulid::new(),
            object_uri,
            content_type: None,
            file_name: None,
            user_id: None,
            org_id: None,
        })
    }

    /// Replace the validity window, counted from now
    ///
    /// The nonce is kept.
    ///
    /// # Errors
    ///
    /// Returns [`LinkTokenError::ExpirationRequired`] for a non-positive window,
    /// or [`LinkTokenError::ExpirationOutOfRange`] for one reaching past the
    /// representable dates.
    pub fn with_expires_in(mut self, ttl: Duration) -> Result<Self, LinkTokenError> {
        self.signing_info.expires_at = expiry_after(ttl)?;
        Ok(self)
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the file name
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Bind the download to a user; the nil id is ignored
    pub fn with_user_id(mut self, user_id: Ulid) -> Self {
        self.user_id = (!user_id.is_nil()).then_some(user_id);
        self
    }

    /// Bind the download to an organization; the nil id is ignored
    pub fn with_org_id(mut self, org_id: Ulid) -> Self {
        self.org_id = (!org_id.is_nil()).then_some(org_id);
        self
    }
}

impl LinkToken for DownloadToken {
    const KIND: LinkKind = LinkKind::Download;

    fn signing_info(&self) -> &SigningInfo {
        &self.signing_info
    }

    fn check_identity(&self) -> Result<(), LinkTokenError> {
        if self.object_uri.is_empty() {
            return Err(LinkTokenError::TokenMissingObjectUri);
        }
        Ok(())
    }

    fn write_payload(&self, input: &mut MacInput) {
        let user = self.user_id.map(|id| id.to_bytes());
        let org = self.org_id.map(|id| id.to_bytes());

        input
            .field(&self.token_id.to_bytes())
            .field(self.object_uri.as_bytes())
            .optional_field(self.content_type.as_deref().map(str::as_bytes))
            .optional_field(self.file_name.as_deref().map(str::as_bytes))
            .optional_field(user.as_ref().map(|b| b.as_slice()))
            .optional_field(org.as_ref().map(|b| b.as_slice()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_object_uri() {
        assert_eq!(
            DownloadToken::new(""),
            Err(LinkTokenError::MissingObjectUri)
        );
    }

    #[test]
    fn test_builder_options() {
        let user = Ulid::new();
        let token = DownloadToken::new("s3://bucket/report.pdf")
            .unwrap()
            .with_content_type("application/pdf")
            .with_file_name("report.pdf")
            .with_user_id(user)
            .with_org_id(Ulid::nil());

        assert_eq!(token.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(token.file_name.as_deref(), Some("report.pdf"));
        assert_eq!(token.user_id, Some(user));
        assert_eq!(token.org_id, None);
    }

    #[test]
    fn test_with_expires_in_rejects_zero() {
        let token = DownloadToken::new("s3://bucket/a").unwrap();
        assert_eq!(
            token.with_expires_in(Duration::zero()),
            Err(LinkTokenError::ExpirationRequired)
        );
    }

    #[test]
    fn test_with_expires_in_rejects_unrepresentable_window() {
        let token = DownloadToken::new("s3://bucket/a").unwrap();
        let expires_at = token.signing_info.expires_at;

        assert_eq!(
            token.clone().with_expires_in(Duration::days(1_000_000_000)),
            Err(LinkTokenError::ExpirationOutOfRange)
        );

        let extended = token.with_expires_in(Duration::days(30)).unwrap();
        assert!(extended.signing_info.expires_at > expires_at);
    }

    #[test]
    fn test_metadata_is_authenticated() {
        let token = DownloadToken::new("s3://bucket/a")
            .unwrap()
            .with_file_name("a.txt");
        let (signature, secret) = token.sign().unwrap();
        assert_eq!(token.verify(&signature, &secret), Ok(()));

        let renamed = token.clone().with_file_name("b.txt");
        assert_eq!(
            renamed.verify(&signature, &secret),
            Err(LinkTokenError::Invalid)
        );
    }

    #[test]
    fn test_serde_carries_signature_inputs() {
        let token = DownloadToken::new("s3://bucket/a")
            .unwrap()
            .with_content_type("text/plain");
        let (signature, secret) = token.sign().unwrap();

        let json = serde_json::to_string(&token).unwrap();
        let carried: DownloadToken = serde_json::from_str(&json).unwrap();
        assert_eq!(carried, token);
        assert_eq!(carried.verify(&signature, &secret), Ok(()));
    }
}
