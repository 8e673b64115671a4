//! Request extractors: bearer-token identity and body parsing.

use axum::Form;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, request::Parts};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::api::error::ApiError;
use crate::auth::{AuthError, VerifiedIdentity};
use crate::server::AppState;

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidToken("expected Bearer scheme".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Caller identity, verified from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub VerifiedIdentity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(&parts.headers)?;
        let identity = state.verifier.verify(token).await?;
        Ok(AuthUser(identity))
    }
}

/// Request body accepted as JSON or URL-encoded form.
///
/// Requests with no body, or with a content type that is neither, yield
/// `T::default()`.
#[derive(Debug, Clone, Default)]
pub struct Payload<T>(pub T);

impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned + Default + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Payload(T::default()));
            }
            serde_json::from_slice(&bytes)
                .map(Payload)
                .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| Payload(value))
                .map_err(|e| ApiError::BadRequest(e.body_text()))
        } else {
            Ok(Payload(T::default()))
        }
    }
}

/// Success envelope: `{"success": true, "message"?, "data"?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Body1 {
        role: Option<String>,
    }

    fn request(content_type: Option<&str>, body: &'static str) -> Request {
        let mut builder = HttpRequest::builder().method("POST").uri("/");
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[test]
    fn test_bearer_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer  abc.def.ghi ".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_missing_or_wrong_scheme() {
        let headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(AuthError::InvalidToken(_))));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));
    }

    #[tokio::test]
    async fn test_payload_json() {
        let Payload(body) =
            Payload::<Body1>::from_request(request(Some("application/json"), r#"{"role":"admin"}"#), &())
                .await
                .unwrap();
        assert_eq!(body.role.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_payload_form() {
        let Payload(body) = Payload::<Body1>::from_request(
            request(Some("application/x-www-form-urlencoded"), "role=admin"),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(body.role.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_payload_empty_defaults() {
        let Payload(body) = Payload::<Body1>::from_request(request(Some("application/json"), ""), &())
            .await
            .unwrap();
        assert_eq!(body, Body1::default());

        let Payload(body) = Payload::<Body1>::from_request(request(None, "ignored"), &())
            .await
            .unwrap();
        assert_eq!(body, Body1::default());
    }

    #[tokio::test]
    async fn test_payload_malformed_json() {
        let err = Payload::<Body1>::from_request(request(Some("application/json"), "{nope"), &())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
