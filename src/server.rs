//! HTTP server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::api::create_router;
use crate::auth::{AuthConfig, TokenVerifier, UserStore};
use crate::db::{DatabaseConfig, create_connection, ensure_schema};

pub const DEFAULT_PORT: u16 = 5000;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub verifier: Arc<TokenVerifier>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db: DatabaseConfig,
    /// Allowed CORS origins; empty echoes the request origin.
    pub cors_origins: Vec<String>,
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db: DatabaseConfig::default(),
            cors_origins: Vec::new(),
            auth: AuthConfig::default(),
        }
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Connect to the database, build the app state and serve until the
/// listener fails.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let verifier = TokenVerifier::new(config.auth.clone())
        .context("invalid token verification settings")?;

    info!("Using database url: {}", config.db.url);
    let db = create_connection(config.db.clone())
        .await
        .context("database connection failed")?;
    ensure_schema(&db).await?;

    let state = AppState {
        users: Arc::new(UserStore::new(db)),
        verifier: Arc::new(verifier),
    };
    let app = create_router(state, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Server running on port {}", config.port);
    axum::serve(listener, app).await?;
    Ok(())
}
