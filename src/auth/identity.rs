//! Identity extracted from a verified ID token.

use serde::{Deserialize, Serialize};

use crate::types::{Email, ExternalUserId};

/// Caller identity established by [`TokenVerifier`](super::TokenVerifier).
///
/// Immutable once created; handlers receive it through the `AuthUser`
/// extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    external_id: ExternalUserId,
    email: Option<Email>,
    display_name: Option<String>,
}

impl VerifiedIdentity {
    pub fn new(
        external_id: ExternalUserId,
        email: Option<Email>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            external_id,
            email,
            display_name,
        }
    }

    pub fn external_id(&self) -> &ExternalUserId {
        &self.external_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_ref().map(Email::as_str)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Name to use for a newly mirrored record: the provider display name,
    /// else the email, else the subject.
    pub fn display(&self) -> String {
        if let Some(name) = &self.display_name {
            name.clone()
        } else if let Some(email) = &self.email {
            email.to_string()
        } else {
            self.external_id.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_fallbacks() {
        let full = VerifiedIdentity::new(
            ExternalUserId::new("uid-1"),
            Some(Email::new("a@x.com")),
            Some("Ada".to_string()),
        );
        assert_eq!(full.display(), "Ada");

        let email_only =
            VerifiedIdentity::new(ExternalUserId::new("uid-1"), Some(Email::new("a@x.com")), None);
        assert_eq!(email_only.display(), "a@x.com");
        assert_eq!(email_only.email(), Some("a@x.com"));

        let bare = VerifiedIdentity::new(ExternalUserId::new("uid-1"), None, None);
        assert_eq!(bare.display(), "uid-1");
        assert!(bare.display_name().is_none());
    }
}
