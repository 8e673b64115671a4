//! Configured privileged (admin) account.

use std::env;
use std::fmt;

use crate::session::SessionError;

pub const ADMIN_EMAIL_ENV: &str = "ADMIN_EMAIL";
pub const ADMIN_PASSWORD_ENV: &str = "ADMIN_PASSWORD";

/// Admin credential pair, resolved once from configuration.
///
/// Logging in with exactly this pair signs in through the provider with the
/// configured values and asks the backend to promote the record.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PrivilegedAccount {
    email: Option<String>,
    password: Option<String>,
}

impl PrivilegedAccount {
    pub fn new(email: Option<String>, password: Option<String>) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            email: non_empty(email),
            password: non_empty(password),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::new(env::var(ADMIN_EMAIL_ENV).ok(), env::var(ADMIN_PASSWORD_ENV).ok())
    }

    pub fn is_configured(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }

    /// The configured pair when the supplied credentials are privileged,
    /// `None` otherwise.
    ///
    /// Supplying one configured half while the other half is missing is a
    /// configuration error and fails before any provider call.
    pub fn classify(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<(&str, &str)>, SessionError> {
        match (&self.email, &self.password) {
            (Some(e), Some(p)) if e == email && p == password => {
                Ok(Some((e.as_str(), p.as_str())))
            }
            (Some(e), None) if e == email => Err(half_configured()),
            (None, Some(p)) if p == password => Err(half_configured()),
            _ => Ok(None),
        }
    }
}

fn half_configured() -> SessionError {
    SessionError::Validation(format!(
        "Admin credentials not properly configured: set both {} and {}",
        ADMIN_EMAIL_ENV, ADMIN_PASSWORD_ENV
    ))
}

// Never print the password.
impl fmt::Debug for PrivilegedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegedAccount")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(email: Option<&str>, password: Option<&str>) -> PrivilegedAccount {
        PrivilegedAccount::new(email.map(str::to_string), password.map(str::to_string))
    }

    #[test]
    fn test_classify_configured_pair() {
        let admin = account(Some("root@x.com"), Some("s3cret"));
        assert_eq!(
            admin.classify("root@x.com", "s3cret").unwrap(),
            Some(("root@x.com", "s3cret"))
        );
        assert_eq!(admin.classify("root@x.com", "other").unwrap(), None);
        assert_eq!(admin.classify("a@x.com", "s3cret").unwrap(), None);
        assert!(admin.is_configured());
    }

    #[test]
    fn test_classify_unconfigured_is_never_privileged() {
        let none = PrivilegedAccount::none();
        assert_eq!(none.classify("", "").unwrap(), None);
        assert_eq!(none.classify("root@x.com", "s3cret").unwrap(), None);
        assert!(!none.is_configured());
    }

    #[test]
    fn test_classify_half_configured() {
        let email_only = account(Some("root@x.com"), None);
        assert!(matches!(
            email_only.classify("root@x.com", "anything"),
            Err(SessionError::Validation(_))
        ));
        assert_eq!(email_only.classify("a@x.com", "pw").unwrap(), None);

        let password_only = account(None, Some("s3cret"));
        assert!(password_only.classify("a@x.com", "s3cret").is_err());
        assert_eq!(password_only.classify("a@x.com", "pw").unwrap(), None);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let admin = account(Some(""), Some("s3cret"));
        assert!(!admin.is_configured());
        assert!(admin.classify("", "s3cret").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let admin = account(Some("root@x.com"), Some("s3cret"));
        let printed = format!("{:?}", admin);
        assert!(printed.contains("root@x.com"));
        assert!(!printed.contains("s3cret"));
    }
}
