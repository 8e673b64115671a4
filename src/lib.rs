// Backend modules
pub mod api;
pub mod auth;
mod db;
pub mod server;

// Client-side session
pub mod config;
pub mod session;

pub mod types;

// Re-export key types and functions
pub use auth::{AuthConfig, TokenVerifier, UserStore, VerifiedIdentity};
pub use config::ClientConfig;
pub use db::{DatabaseConfig, Db, UserProfile, UserRecord, create_connection, ensure_schema};
pub use server::{AppState, ServerConfig, serve};
pub use session::{
    HttpBackend, IdentityProvider, PrivilegedAccount, RestIdentityProvider, Session,
    SessionError, SessionHandle, SessionPhase,
};
pub use types::{Email, ExternalUserId, Role};
