//! `/api/auth`: mirror the caller into the user table and read it back.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::debug;

use crate::api::error::{ApiError, not_found};
use crate::api::extract::{ApiResponse, AuthUser, Payload};
use crate::db::UserProfile;
use crate::server::AppState;
use crate::types::Role;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify", get(verify))
        .method_not_allowed_fallback(not_found)
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    /// Role hint; only `admin` has an effect on existing records.
    #[serde(default)]
    pub role: Option<Role>,
}

/// Upsert the caller's user record.
async fn register(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Payload(body): Payload<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserProfile>>), ApiError> {
    debug!(
        "Register for {} with role hint {:?}",
        identity.external_id(),
        body.role
    );

    let outcome = state.users.upsert_user(&identity, body.role).await?;
    let (status, message) = if outcome.is_created() {
        (StatusCode::CREATED, "User registered")
    } else {
        (StatusCode::OK, "User updated")
    };

    let profile = UserProfile::from(outcome.into_record());
    Ok((status, Json(ApiResponse::data(profile).with_message(message))))
}

/// Return the caller's user record. The caller registers first.
async fn verify(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let user = state
        .users
        .get_user_by_external_id(identity.external_id())
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(ApiResponse::data(UserProfile::from(user))))
}
