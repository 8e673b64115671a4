//! Client side of the backend auth API.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::db::UserProfile;
use crate::session::provider::IdentityProvider;
use crate::types::Role;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No provider identity to authenticate the request with
    NotSignedIn,
    /// The backend answered with a failure envelope
    Status { status: u16, message: String },
    Network(String),
    /// The response did not match the expected envelope
    Decode(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSignedIn => write!(f, "Not signed in"),
            Self::Status { status, message } => write!(f, "Backend error {}: {}", status, message),
            Self::Network(msg) => write!(f, "Backend unreachable: {}", msg),
            Self::Decode(msg) => write!(f, "Unexpected backend response: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Backend auth API as seen by the session.
pub trait BackendApi: Send + Sync {
    /// Upsert the caller's record. `Some(Role::Admin)` asks for promotion.
    fn register(&self, role_hint: Option<Role>) -> BackendFuture<'_, ()>;

    /// Fetch the caller's record.
    fn verify(&self) -> BackendFuture<'_, UserProfile>;
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

/// [`BackendApi`] over HTTP, authenticated with the provider's ID token.
pub struct HttpBackend {
    base_url: Url,
    client: reqwest::Client,
    provider: Arc<dyn IdentityProvider>,
}

impl HttpBackend {
    /// `api_base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(api_base_url: &str, provider: Arc<dyn IdentityProvider>) -> Result<Self, BackendError> {
        let mut base = api_base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| BackendError::Network(format!("invalid API URL {}: {}", api_base_url, e)))?;

        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            provider,
        })
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Network(e.to_string()))
    }

    fn bearer(&self) -> Result<String, BackendError> {
        self.provider
            .current_user()
            .map(|user| user.id_token)
            .ok_or(BackendError::NotSignedIn)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Envelope<T>, BackendError> {
        let response = request
            .bearer_auth(self.bearer()?)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))?;

        if !status.is_success() || !envelope.success {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: envelope.message.unwrap_or_else(|| status.to_string()),
            });
        }
        Ok(envelope)
    }
}

impl BackendApi for HttpBackend {
    fn register(&self, role_hint: Option<Role>) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let body = match role_hint {
                Some(role) => json!({ "role": role }),
                None => json!({}),
            };
            let request = self.client.post(self.url("auth/register")?).json(&body);
            let envelope: Envelope<UserProfile> = self.send(request).await?;
            debug!("Backend register: {}", envelope.message.unwrap_or_default());
            Ok(())
        })
    }

    fn verify(&self) -> BackendFuture<'_, UserProfile> {
        Box::pin(async move {
            let request = self.client.get(self.url("auth/verify")?);
            let envelope: Envelope<UserProfile> = self.send(request).await?;
            envelope
                .data
                .ok_or_else(|| BackendError::Decode("verify response carried no data".to_string()))
        })
    }
}
