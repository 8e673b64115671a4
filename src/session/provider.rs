//! Identity provider seam used by the session.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::types::{Email, ExternalUserId};

/// Identity as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub uid: ExternalUserId,
    pub email: Option<Email>,
    pub display_name: Option<String>,
    /// Bearer token presented to the backend.
    pub id_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider refused the request (bad credentials, existing account, ...)
    Rejected(String),
    /// The provider could not be reached or answered garbage
    Network(String),
    /// The requested flow is not configured for this provider
    Unsupported(String),
    /// The operation needs a signed-in user
    NotSignedIn,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "{}", msg),
            Self::Network(msg) => write!(f, "Identity provider unreachable: {}", msg),
            Self::Unsupported(msg) => write!(f, "Unsupported sign-in flow: {}", msg),
            Self::NotSignedIn => write!(f, "No user is signed in"),
        }
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Client for the external identity provider.
///
/// Implementations keep the current identity and publish every change on the
/// channel returned by [`subscribe`](IdentityProvider::subscribe). A
/// successful sign-in or sign-up publishes `Some(user)`; a successful sign-out
/// publishes `None`.
pub trait IdentityProvider: Send + Sync {
    fn sign_in<'a>(&'a self, email: &'a str, password: &'a str) -> ProviderFuture<'a, ProviderUser>;

    /// Create an account, then set its display name when one is given.
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        display_name: Option<&'a str>,
    ) -> ProviderFuture<'a, ProviderUser>;

    /// Provider-brokered (social) sign-in.
    fn sign_in_with_social(&self) -> ProviderFuture<'_, ProviderUser>;

    fn sign_out(&self) -> ProviderFuture<'_, ()>;

    fn send_password_reset<'a>(&'a self, email: &'a str) -> ProviderFuture<'a, ()>;

    /// Currently signed-in user, if any.
    fn current_user(&self) -> Option<ProviderUser>;

    /// Auth-state channel. The receiver starts at the current identity.
    fn subscribe(&self) -> watch::Receiver<Option<ProviderUser>>;
}
