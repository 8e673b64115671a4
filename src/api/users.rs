//! `/api/users`: profile reads/updates for the caller plus admin listing.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{delete, get};
use axum::Router;
use serde::Deserialize;
use tracing::info;

use crate::api::error::{ApiError, not_found};
use crate::api::extract::{ApiResponse, AuthUser, Payload};
use crate::auth::VerifiedIdentity;
use crate::db::{UserProfile, UserRecord};
use crate::server::AppState;
use crate::types::ExternalUserId;

const MAX_DISPLAY_NAME_CHARS: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/me", get(me).put(update_me))
        .route("/{external_id}", delete(delete_user))
        .method_not_allowed_fallback(not_found)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

async fn current_record(state: &AppState, identity: &VerifiedIdentity) -> Result<UserRecord, ApiError> {
    state
        .users
        .get_user_by_external_id(identity.external_id())
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

/// The admin flag lives on the stored record, not in the token.
async fn require_admin(state: &AppState, identity: &VerifiedIdentity) -> Result<UserRecord, ApiError> {
    let record = current_record(state, identity).await?;
    if !record.role().is_admin() {
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }
    Ok(record)
}

async fn me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let record = current_record(&state, &identity).await?;
    Ok(Json(ApiResponse::data(record.into())))
}

async fn update_me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Payload(body): Payload<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let name = body
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("display_name is required".to_string()))?;

    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ApiError::BadRequest(format!(
            "display_name must be at most {} characters",
            MAX_DISPLAY_NAME_CHARS
        )));
    }

    let record = state
        .users
        .update_display_name(identity.external_id(), name)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(
        ApiResponse::data(record.into()).with_message("Profile updated"),
    ))
}

async fn list_users(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<ApiResponse<Vec<UserProfile>>>, ApiError> {
    require_admin(&state, &identity).await?;

    let users = state.users.list_users().await?;
    Ok(Json(ApiResponse::data(
        users.iter().map(UserProfile::from).collect(),
    )))
}

async fn delete_user(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(external_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let admin = require_admin(&state, &identity).await?;
    let target = ExternalUserId::new(external_id);

    if !state.users.delete_user(&target).await? {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    info!("User {} deleted by admin {}", target, admin.external_id);
    Ok(Json(ApiResponse {
        success: true,
        message: Some("User deleted".to_string()),
        data: None,
    }))
}
