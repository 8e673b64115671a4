//! Signing-key cache for identity-provider ID tokens.
//!
//! Keys are fetched from the provider's JWKS endpoint, kept for a TTL and
//! served from memory. When a refresh fails, a recently fetched key set may
//! still be used for up to [`MAX_STALE_CACHE_SECONDS`]. An unknown `kid`
//! refetches at most once per [`MIN_REFRESH_INTERVAL_SECONDS`], and callers
//! that miss at the same time share a single fetch.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// Shortest gap between two fetches triggered by unknown key ids (1 minute).
pub const MIN_REFRESH_INTERVAL_SECONDS: u64 = 60;

/// Google's published keys for Firebase ID tokens.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// A single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url)
    pub n: Option<String>,
    /// RSA exponent (base64url)
    pub e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

impl JwksDocument {
    /// Usable RSA signing keys, by kid. Keys without a kid are stored as "default".
    pub fn signing_keys(&self) -> HashMap<String, DecodingKey> {
        let mut keys = HashMap::new();

        for jwk in &self.keys {
            if jwk.kty != "RSA" || jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping non-signing key {:?}", jwk.kid);
                continue;
            }

            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                warn!("RSA key {:?} is missing its modulus or exponent", jwk.kid);
                continue;
            };

            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    keys.insert(kid, key);
                }
                Err(e) => warn!("Failed to parse JWK {:?}: {}", jwk.kid, e),
            }
        }

        keys
    }
}

#[derive(Default)]
struct KeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

impl KeySet {
    fn lookup(&self, kid: Option<&str>) -> Option<DecodingKey> {
        match kid {
            Some(k) => self.keys.get(k).cloned(),
            None => self.keys.values().next().cloned(),
        }
    }

    fn age(&self) -> Option<Duration> {
        self.fetched_at.map(|t| t.elapsed())
    }
}

/// JWKS cache shared by every request.
pub struct JwksCache {
    jwks_url: String,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    allow_stale: bool,
    key_set: RwLock<KeySet>,
    refresh_lock: Mutex<()>,
    client: reqwest::Client,
}

impl JwksCache {
    pub fn new(jwks_url: String, cache_ttl_seconds: u64, allow_stale: bool) -> Self {
        Self {
            jwks_url,
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            min_refresh_interval: Duration::from_secs(
                MIN_REFRESH_INTERVAL_SECONDS.min(cache_ttl_seconds),
            ),
            allow_stale,
            key_set: RwLock::new(KeySet::default()),
            refresh_lock: Mutex::new(()),
            client: reqwest::Client::new(),
        }
    }

    /// Override the refetch floor for unknown key ids. Never above the TTL.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval.min(self.cache_ttl);
        self
    }

    pub fn url(&self) -> &str {
        &self.jwks_url
    }

    /// Decoding key for `kid`, refreshing the key set when it is expired or
    /// does not contain the key (providers rotate keys without notice).
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksCacheError> {
        if let Some(found) = self.cached(kid).await {
            return found;
        }

        let _refreshing = self.refresh_lock.lock().await;
        // Another caller may have refreshed while this one waited.
        if let Some(found) = self.cached(kid).await {
            return found;
        }

        if let Err(e) = self.refresh().await {
            let set = self.key_set.read().await;
            let usable = self.allow_stale
                && set
                    .age()
                    .is_some_and(|age| age < Duration::from_secs(MAX_STALE_CACHE_SECONDS));
            if usable {
                if let Some(key) = set.lookup(kid) {
                    warn!("JWKS refresh failed, using stale keys: {}", e);
                    return Ok(key);
                }
            }
            return Err(e);
        }

        self.key_set
            .read()
            .await
            .lookup(kid)
            .ok_or_else(|| key_missing(kid))
    }

    /// Answer from memory, or `None` when a fetch is due.
    ///
    /// A fresh set that holds the key answers with it. A set fetched within
    /// the refresh floor answers even on a miss, so unknown key ids cannot
    /// force a fetch per request.
    async fn cached(&self, kid: Option<&str>) -> Option<Result<DecodingKey, JwksCacheError>> {
        let set = self.key_set.read().await;
        let age = set.age()?;
        let key = set.lookup(kid);

        if age < self.min_refresh_interval {
            if key.is_none() {
                debug!("Unknown key id {:?}, JWKS fetched {:?} ago", kid, age);
            }
            return Some(key.ok_or_else(|| key_missing(kid)));
        }
        if age <= self.cache_ttl {
            return key.map(Ok);
        }
        None
    }

    /// Fetch the key set from the endpoint and replace the cached one.
    pub async fn refresh(&self) -> Result<(), JwksCacheError> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| JwksCacheError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksCacheError::FetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksCacheError::ParseError(e.to_string()))?;

        let keys = document.signing_keys();
        if keys.is_empty() {
            return Err(JwksCacheError::NoValidKeys);
        }

        debug!("Cached {} signing keys", keys.len());
        *self.key_set.write().await = KeySet {
            keys,
            fetched_at: Some(Instant::now()),
        };
        Ok(())
    }

    pub async fn key_count(&self) -> usize {
        self.key_set.read().await.keys.len()
    }
}

fn key_missing(kid: Option<&str>) -> JwksCacheError {
    match kid {
        Some(k) => JwksCacheError::KeyNotFound(k.to_string()),
        None => JwksCacheError::NoKeysAvailable,
    }
}

#[derive(Debug, Clone)]
pub enum JwksCacheError {
    FetchError(String),
    ParseError(String),
    NoValidKeys,
    KeyNotFound(String),
    NoKeysAvailable,
}

impl fmt::Display for JwksCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
        }
    }
}

impl std::error::Error for JwksCacheError {}
