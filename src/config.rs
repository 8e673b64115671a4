use std::env;

use anyhow::{Result, anyhow};

use crate::session::PrivilegedAccount;

pub const API_URL_ENV: &str = "AUTHSYNC_API_URL";
pub const PROVIDER_API_KEY_ENV: &str = "FIREBASE_API_KEY";

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Settings for the client side (session) of the system.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub provider_api_key: Option<String>,
    pub privileged: PrivilegedAccount,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            provider_api_key: None,
            privileged: PrivilegedAccount::none(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            provider_api_key: env::var(PROVIDER_API_KEY_ENV)
                .ok()
                .filter(|k| !k.is_empty()),
            privileged: PrivilegedAccount::from_env(),
        }
    }

    /// Provider API key, required by every identity-provider call.
    pub fn require_provider_api_key(&self) -> Result<&str> {
        self.provider_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("{} is not set", PROVIDER_API_KEY_ENV))
    }
}
