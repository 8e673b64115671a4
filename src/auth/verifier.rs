//! ID token verification.

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::identity::VerifiedIdentity;
use crate::auth::jwks::{DEFAULT_CACHE_TTL_SECONDS, FIREBASE_JWKS_URL, JwksCache};
use crate::types::{Email, ExternalUserId};

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected `iss` claim
    pub jwt_issuer: Option<String>,
    /// Expected `aud` claim
    pub jwt_audience: Option<String>,
    /// JWKS endpoint URL for RS256 key fetching
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// JWKS cache TTL in seconds (default: 3600)
    #[serde(default = "default_jwks_cache_seconds")]
    pub jwks_cache_seconds: u64,
    /// Whether to allow stale JWKS cache on fetch failure
    #[serde(default = "default_allow_stale_jwks")]
    pub allow_stale_jwks: bool,
    /// HS256 shared secret (local development only)
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

fn default_jwks_cache_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_allow_stale_jwks() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_issuer: None,
            jwt_audience: None,
            jwks_url: None,
            jwks_cache_seconds: DEFAULT_CACHE_TTL_SECONDS,
            allow_stale_jwks: true,
            jwt_secret: None,
        }
    }
}

impl AuthConfig {
    /// Verify Firebase ID tokens for the given project.
    pub fn firebase(project_id: &str) -> Self {
        Self {
            jwt_issuer: Some(format!("https://securetoken.google.com/{}", project_id)),
            jwt_audience: Some(project_id.to_string()),
            jwks_url: Some(FIREBASE_JWKS_URL.to_string()),
            ..Default::default()
        }
    }

    /// Verify RS256 tokens against an arbitrary JWKS endpoint.
    pub fn with_jwks(jwks_url: String, issuer: Option<String>, audience: Option<String>) -> Self {
        Self {
            jwt_issuer: issuer,
            jwt_audience: audience,
            jwks_url: Some(jwks_url),
            ..Default::default()
        }
    }

    /// Verify HS256 tokens signed with a shared secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Exactly one key source must be configured.
    pub fn validate(&self) -> Result<(), AuthError> {
        match (&self.jwks_url, &self.jwt_secret) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(AuthError::Misconfigured(
                "configure either a JWKS URL or a shared secret, not both".to_string(),
            )),
            (None, None) => Err(AuthError::Misconfigured(
                "no token verification key source configured".to_string(),
            )),
        }
    }
}

/// Token verification errors. All of them surface as HTTP 401.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No bearer token on the request
    MissingToken,
    /// Malformed token or failed signature/claim checks
    InvalidToken(String),
    /// Token `exp` is in the past
    TokenExpired,
    /// Signing keys could not be obtained
    JwksError(String),
    /// Verifier is not usable with the given configuration
    Misconfigured(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "Authentication required"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::TokenExpired => write!(f, "Token expired"),
            Self::JwksError(msg) => write!(f, "JWKS error: {}", msg),
            Self::Misconfigured(msg) => write!(f, "Auth misconfigured: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

/// Claims read from an identity-provider ID token.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Provider user id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

enum KeySource {
    Jwks(Arc<JwksCache>),
    Secret(DecodingKey),
}

/// Verifies bearer tokens and turns them into a [`VerifiedIdentity`].
pub struct TokenVerifier {
    config: AuthConfig,
    keys: KeySource,
}

impl TokenVerifier {
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;

        let keys = match (&config.jwks_url, &config.jwt_secret) {
            (Some(url), _) => KeySource::Jwks(Arc::new(JwksCache::new(
                url.clone(),
                config.jwks_cache_seconds,
                config.allow_stale_jwks,
            ))),
            (None, Some(secret)) => KeySource::Secret(DecodingKey::from_secret(secret.as_bytes())),
            (None, None) => {
                return Err(AuthError::Misconfigured("no key source".to_string()));
            }
        };

        Ok(Self { config, keys })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify a raw token (without the `Bearer ` prefix).
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let (decoding_key, algorithm) = match &self.keys {
            KeySource::Jwks(cache) => {
                let header = decode_header(token)
                    .map_err(|e| AuthError::InvalidToken(format!("Invalid JWT header: {}", e)))?;
                let key = cache
                    .get_key(header.kid.as_deref())
                    .await
                    .map_err(|e| AuthError::JwksError(e.to_string()))?;
                (key, Algorithm::RS256)
            }
            KeySource::Secret(key) => (key.clone(), Algorithm::HS256),
        };

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &self.config.jwt_issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.jwt_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<IdTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        debug!("Token verified for subject: {}", claims.sub);

        Ok(VerifiedIdentity::new(
            ExternalUserId::new(claims.sub),
            claims.email.map(Email::new),
            claims.name,
        ))
    }
}

/// Mint an HS256 ID token; test helper shared across modules.
#[cfg(test)]
pub(crate) fn test_token(secret: &str, sub: &str, email: Option<&str>, ttl_secs: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let exp = (chrono::Utc::now().timestamp() + ttl_secs).max(0) as u64;
    let claims = IdTokenClaims {
        sub: sub.to_string(),
        email: email.map(str::to_string),
        name: None,
        exp,
        iss: None,
        aud: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("token encoding")
}
