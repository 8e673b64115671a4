//! Token verification and user mirroring for the backend.
//!
//! Callers present an identity-provider ID token as a bearer token. The
//! token is verified here, and the resulting identity is mirrored into the
//! `user` table through [`UserStore`].
//!
//! Two key sources are supported:
//!
//! - **JWKS**: RS256 tokens checked against the provider's published keys
//!   (the hosted setup, e.g. Firebase `securetoken`)
//! - **Shared secret**: HS256 tokens for local development and tests

mod identity;
pub mod jwks;
mod user_store;
mod verifier;

pub use identity::VerifiedIdentity;
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache, JwksCacheError};
pub use user_store::{UpsertOutcome, UserStore};
pub use verifier::{AuthConfig, AuthError, IdTokenClaims, TokenVerifier};

#[cfg(test)]
pub(crate) use verifier::test_token;
