//! [`IdentityProvider`] over the Firebase Identity Toolkit REST API.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

use crate::session::provider::{IdentityProvider, ProviderError, ProviderFuture, ProviderUser};
use crate::types::{Email, ExternalUserId};

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Credential from an external IdP (e.g. a Google ID token) exchanged through
/// `accounts:signInWithIdp`.
#[derive(Debug, Clone)]
pub struct SocialCredential {
    /// Provider id such as `google.com`
    pub provider_id: String,
    pub id_token: String,
    /// Continue URI registered with the project
    pub request_uri: String,
}

/// Successful `accounts:*` response. Field names follow the REST API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

pub struct RestIdentityProvider {
    base_url: String,
    api_key: String,
    social: Option<SocialCredential>,
    client: reqwest::Client,
    current: watch::Sender<Option<ProviderUser>>,
}

impl RestIdentityProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(IDENTITY_TOOLKIT_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            social: None,
            client: reqwest::Client::new(),
            current,
        }
    }

    pub fn with_social_credential(mut self, credential: SocialCredential) -> Self {
        self.social = Some(credential);
        self
    }

    fn endpoint(&self, method: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&format!("{}/accounts:{}", self.base_url, method))
            .map_err(|e| ProviderError::Network(format!("invalid provider URL: {}", e)))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, ProviderError> {
        let url = self.endpoint(method)?;
        debug!("Identity provider call: accounts:{}", method);

        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if status.is_success() {
            Ok(payload)
        } else {
            Err(rejection(&payload, status.as_u16()))
        }
    }

    async fn account_call(&self, method: &str, body: Value) -> Result<ProviderUser, ProviderError> {
        let payload = self.call(method, body).await?;
        let account: AccountResponse = serde_json::from_value(payload)
            .map_err(|e| ProviderError::Network(format!("unexpected response: {}", e)))?;
        let id_token = account
            .id_token
            .ok_or_else(|| ProviderError::Network("response carried no idToken".to_string()))?;

        Ok(ProviderUser {
            uid: ExternalUserId::new(account.local_id),
            email: account.email.map(Email::new),
            display_name: account.display_name,
            id_token,
        })
    }

    fn publish(&self, user: Option<ProviderUser>) {
        self.current.send_replace(user);
    }

    async fn do_sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderUser, ProviderError> {
        let mut user = self
            .account_call(
                "signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;

        if let Some(name) = display_name {
            let updated = self
                .account_call(
                    "update",
                    json!({
                        "idToken": user.id_token,
                        "displayName": name,
                        "returnSecureToken": true,
                    }),
                )
                .await?;
            user.display_name = updated.display_name.or_else(|| Some(name.to_string()));
            user.id_token = updated.id_token;
        }

        info!("Created provider account {}", user.uid);
        Ok(user)
    }

    async fn do_social_sign_in(&self) -> Result<ProviderUser, ProviderError> {
        let credential = self.social.as_ref().ok_or_else(|| {
            ProviderError::Unsupported("no social credential configured".to_string())
        })?;

        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", &credential.id_token)
            .append_pair("providerId", &credential.provider_id)
            .finish();

        self.account_call(
            "signInWithIdp",
            json!({
                "postBody": post_body,
                "requestUri": credential.request_uri,
                "returnIdpCredential": true,
                "returnSecureToken": true,
            }),
        )
        .await
    }
}

/// Map a REST error body (`{"error": {"message": "EMAIL_NOT_FOUND", ...}}`).
fn rejection(payload: &Value, status: u16) -> ProviderError {
    let code = payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN_ERROR");

    // Messages may carry detail after the code: "WEAK_PASSWORD : Password should be ..."
    let message = match code.split(" : ").next().unwrap_or(code) {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "Invalid email or password".to_string()
        }
        "EMAIL_EXISTS" => "Email already in use".to_string(),
        "USER_DISABLED" => "User account is disabled".to_string(),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts, try again later".to_string(),
        "WEAK_PASSWORD" => "Password is too weak".to_string(),
        _ => format!("{} (HTTP {})", code, status),
    };
    ProviderError::Rejected(message)
}

impl IdentityProvider for RestIdentityProvider {
    fn sign_in<'a>(&'a self, email: &'a str, password: &'a str) -> ProviderFuture<'a, ProviderUser> {
        Box::pin(async move {
            let user = self
                .account_call(
                    "signInWithPassword",
                    json!({ "email": email, "password": password, "returnSecureToken": true }),
                )
                .await?;
            self.publish(Some(user.clone()));
            Ok(user)
        })
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        display_name: Option<&'a str>,
    ) -> ProviderFuture<'a, ProviderUser> {
        Box::pin(async move {
            let user = self.do_sign_up(email, password, display_name).await?;
            self.publish(Some(user.clone()));
            Ok(user)
        })
    }

    fn sign_in_with_social(&self) -> ProviderFuture<'_, ProviderUser> {
        Box::pin(async move {
            let user = self.do_social_sign_in().await?;
            self.publish(Some(user.clone()));
            Ok(user)
        })
    }

    fn sign_out(&self) -> ProviderFuture<'_, ()> {
        // Tokens are stateless; signing out only forgets them locally.
        Box::pin(async move {
            self.publish(None);
            Ok(())
        })
    }

    fn send_password_reset<'a>(&'a self, email: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.call(
                "sendOobCode",
                json!({ "requestType": "PASSWORD_RESET", "email": email }),
            )
            .await?;
            Ok(())
        })
    }

    fn current_user(&self) -> Option<ProviderUser> {
        self.current.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<ProviderUser>> {
        self.current.subscribe()
    }
}
