use std::sync::Arc;

use anyhow::Result;
use authsync::session::SocialCredential;
use authsync::{
    AuthConfig, ClientConfig, DatabaseConfig, HttpBackend, RestIdentityProvider, ServerConfig,
    SessionHandle,
};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "authsync")]
#[command(about = "Identity-provider login mirrored into a user database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(short, long, env = "PORT", default_value_t = authsync::server::DEFAULT_PORT)]
        port: u16,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
        /// Comma-separated allowed origins (empty echoes the request origin)
        #[arg(long, env = "CORS_ORIGINS", default_value = "")]
        cors_origins: String,
        /// Verify Firebase ID tokens for this project
        #[arg(long, env = "FIREBASE_PROJECT_ID")]
        firebase_project_id: Option<String>,
        /// JWKS endpoint URL for RS256 signature verification
        #[arg(long, env = "AUTH_JWKS_URL")]
        jwks_url: Option<String>,
        #[arg(long, env = "AUTH_JWT_ISSUER")]
        jwt_issuer: Option<String>,
        #[arg(long, env = "AUTH_JWT_AUDIENCE")]
        jwt_audience: Option<String>,
        /// HS256 shared secret (local development only)
        #[arg(long, env = "AUTH_JWT_SECRET", hide_env_values = true)]
        jwt_secret: Option<String>,
    },
    /// Initialize the database schema
    Init {
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Sign in and sync the user record
    Login {
        email: String,
        #[arg(long, env = "AUTHSYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sync the user record
    Register {
        email: String,
        #[arg(long, env = "AUTHSYNC_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Send a password reset email
    ResetPassword { email: String },
    /// Sign in with an external IdP token and sync the user record
    LoginSocial {
        #[arg(long, default_value = "google.com")]
        provider_id: String,
        #[arg(long, env = "SOCIAL_ID_TOKEN", hide_env_values = true)]
        id_token: String,
        #[arg(long, default_value = "http://localhost")]
        request_uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    std::panic::set_hook(Box::new(|panic| {
        error!("Unhandled panic: {}", panic);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            db_url,
            cors_origins,
            firebase_project_id,
            jwks_url,
            jwt_issuer,
            jwt_audience,
            jwt_secret,
        } => {
            let config = ServerConfig {
                port,
                db: DatabaseConfig {
                    url: db_url,
                    ..Default::default()
                },
                cors_origins: authsync::server::parse_origins(&cors_origins),
                auth: build_auth_config(
                    firebase_project_id,
                    jwks_url,
                    jwt_issuer,
                    jwt_audience,
                    jwt_secret,
                ),
            };

            // Fail fast; restarts are left to the process manager.
            if let Err(e) = authsync::serve(config).await {
                error!("Server failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Initializing database at {}", db_config.url);
            let db = authsync::create_connection(db_config).await?;
            authsync::ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::Login { email, password } => {
            let session = client_session(None)?;
            session.wait_until_ready().await?;
            let result = session.login(&email, &password).await;
            report(&session, result.map(|_| ())).await?;
        }
        Commands::Register {
            email,
            password,
            display_name,
        } => {
            let session = client_session(None)?;
            session.wait_until_ready().await?;
            let result = session
                .register(&email, &password, display_name.as_deref())
                .await;
            report(&session, result.map(|_| ())).await?;
        }
        Commands::ResetPassword { email } => {
            let session = client_session(None)?;
            session.wait_until_ready().await?;
            session.forgot_password(&email).await?;
            println!("Password reset email sent to {}", email);
            session.shutdown().await;
        }
        Commands::LoginSocial {
            provider_id,
            id_token,
            request_uri,
        } => {
            let session = client_session(Some(SocialCredential {
                provider_id,
                id_token,
                request_uri,
            }))?;
            session.wait_until_ready().await?;
            let result = session.login_with_external_provider().await;
            report(&session, result.map(|_| ())).await?;
        }
    }

    Ok(())
}

const DEFAULT_LOG_FILTER: &str = "authsync=info,tower_http=info,warn";

/// `RUST_LOG` when it is set and parses, otherwise the crate default.
fn log_filter(rust_log: Option<String>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Pick the token key source. An explicit secret wins, then an explicit JWKS
/// URL, then the Firebase project defaults.
fn build_auth_config(
    firebase_project_id: Option<String>,
    jwks_url: Option<String>,
    jwt_issuer: Option<String>,
    jwt_audience: Option<String>,
    jwt_secret: Option<String>,
) -> AuthConfig {
    let mut config = match (jwt_secret, jwks_url, firebase_project_id) {
        (Some(secret), _, _) => AuthConfig::with_secret(secret),
        (None, Some(url), _) => AuthConfig::with_jwks(url, None, None),
        (None, None, Some(project)) => AuthConfig::firebase(&project),
        (None, None, None) => AuthConfig::default(),
    };
    if jwt_issuer.is_some() {
        config.jwt_issuer = jwt_issuer;
    }
    if jwt_audience.is_some() {
        config.jwt_audience = jwt_audience;
    }
    config
}

fn client_session(social: Option<SocialCredential>) -> Result<SessionHandle> {
    let config = ClientConfig::from_env();
    let mut provider = RestIdentityProvider::new(config.require_provider_api_key()?);
    if let Some(credential) = social {
        provider = provider.with_social_credential(credential);
    }
    let provider = Arc::new(provider);
    let backend = HttpBackend::new(&config.api_base_url, provider.clone())?;

    Ok(SessionHandle::spawn(
        provider,
        Arc::new(backend),
        config.privileged,
    ))
}

async fn report(session: &SessionHandle, result: Result<(), authsync::SessionError>) -> Result<()> {
    let snapshot = session.settled().await?;
    session.shutdown().await;
    result?;

    match (&snapshot.provider_user, &snapshot.mirrored) {
        (Some(user), Some(profile)) => {
            println!("Signed in as {} ({})", user.uid, profile.role);
            println!("{}", serde_json::to_string_pretty(profile)?);
        }
        (Some(user), None) => {
            println!("Signed in as {}, but the backend record could not be synced", user.uid);
        }
        _ => println!("Not signed in"),
    }
    Ok(())
}
