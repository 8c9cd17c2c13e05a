use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::AppState;
use crate::auth::AdminPrincipal;
use crate::error::ChatResult;
use crate::models::{ApprovalStatus, MessageView, User};
use crate::repository::MIN_PASSWORD_LEN;

#[derive(Serialize)]
pub struct MemberList {
    users: Vec<User>,
    total: usize,
    pending: usize,
}

/// Every non-admin account, newest first, with the pending count.
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> Result<impl IntoResponse, StatusCode> {
    match state.repository.list_members().await {
        Ok(users) => {
            let pending = users
                .iter()
                .filter(|u| u.status == ApprovalStatus::Pending)
                .count();
            Ok(Json(MemberList {
                total: users.len(),
                pending,
                users,
            }))
        }
        Err(e) => {
            error!("Failed to list users: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn set_status(
    state: &AppState,
    admin: &AdminPrincipal,
    user_id: &str,
    status: ApprovalStatus,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.repository.set_user_status(user_id, status).await {
        Ok(true) => {
            info!(
                admin_id = %admin.0.id,
                user_id = %user_id,
                "User marked {}",
                status.as_str()
            );
            Ok(Json(serde_json::json!({ "success": true, "status": status })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Failed to update user status: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn approve_user(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    set_status(&state, &admin, &user_id, ApprovalStatus::Approved).await
}

/// Rejected accounts can no longer log in. Existing connections keep running
/// until they close.
pub async fn reject_user(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    set_status(&state, &admin, &user_id, ApprovalStatus::Rejected).await
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    admin: AdminPrincipal,
    Path(user_id): Path<String>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if req.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }

    match state
        .repository
        .set_user_password(&user_id, &req.new_password)
        .await
    {
        Ok(true) => {
            info!(admin_id = %admin.0.id, user_id = %user_id, "Password reset");
            Ok(Json(serde_json::json!({ "success": true })))
        }
        Ok(false) => Err((StatusCode::NOT_FOUND, "User not found".into())),
        Err(e) => {
            error!("Failed to reset password: {:#}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Server error".into()))
        }
    }
}

/// Full, unredacted history between two members, for moderation.
pub async fn get_conversation(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
    Path((a, b)): Path<(String, String)>,
) -> ChatResult<Json<Vec<MessageView>>> {
    let messages = state
        .repository
        .history(&a, &b, true, state.chat_config.history_limit)
        .await?;
    Ok(Json(messages))
}

pub async fn get_stats(
    State(state): State<AppState>,
    _admin: AdminPrincipal,
) -> Result<impl IntoResponse, StatusCode> {
    match state.db.get_stats().await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            error!("Failed to get database stats: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
