//! Client-side auth orchestration.
//!
//! A [`SessionHandle`] coordinates two services that fail independently: the
//! identity provider (who the user is) and the backend (the mirrored user
//! record). All state lives in a single actor task; handles send it commands
//! and observe published [`Session`] snapshots.

mod actor;
mod backend;
mod privileged;
mod provider;
mod rest_provider;
mod state;


use std::fmt;

pub use actor::SessionHandle;
pub use backend::{BackendApi, BackendError, BackendFuture, HttpBackend};
pub use privileged::{ADMIN_EMAIL_ENV, ADMIN_PASSWORD_ENV, PrivilegedAccount};
pub use provider::{IdentityProvider, ProviderError, ProviderFuture, ProviderUser};
pub use rest_provider::{IDENTITY_TOOLKIT_URL, RestIdentityProvider, SocialCredential};
pub use state::{MirrorState, Session, SessionPhase};

/// Errors returned by session operations.
///
/// Backend sync failures are not among them: they are logged and leave the
/// mirror empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Provider(ProviderError),
    /// Rejected before contacting any service
    Validation(String),
    /// The session actor has stopped
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "{}", e),
            Self::Validation(msg) => write!(f, "{}", msg),
            Self::Closed => write!(f, "Session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err)
    }
}
