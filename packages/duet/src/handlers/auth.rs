//! Sign-up, login, logout and "who am I".

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::AppState;
use crate::auth::{clear_session_cookie, session_cookie, session_token, with_cookie};
use crate::models::{ApprovalStatus, Credentials, Principal, User};
use crate::repository::{ChatRepository, MIN_PASSWORD_LEN, is_unique_violation};

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

/// Normalize a requested username: trimmed and lowercased. Returns `None`
/// for names that are empty or contain whitespace.
fn normalize_username(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        None
    } else {
        Some(name)
    }
}

pub async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> Response {
    if !state.auth_config.allow_registration {
        return failure(StatusCode::FORBIDDEN, "Registration is closed");
    }

    let Some(username) = normalize_username(&req.username) else {
        return failure(StatusCode::BAD_REQUEST, "Username is required");
    };
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return failure(
            StatusCode::BAD_REQUEST,
            &format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        );
    }
    if req
        .confirm_password
        .as_deref()
        .is_some_and(|c| c != req.password)
    {
        return failure(StatusCode::BAD_REQUEST, "Passwords do not match");
    }

    match state.repository.get_user_by_username(&username).await {
        Ok(Some(_)) => return failure(StatusCode::CONFLICT, "Username already exists"),
        Ok(None) => {}
        Err(e) => {
            error!("Sign-up lookup failed: {:#}", e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
    }

    let password_hash = match ChatRepository::hash_password(&req.password) {
        Ok(h) => h,
        Err(e) => {
            error!("Failed to hash password: {:#}", e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
    };

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username,
        password_hash,
        is_admin: false,
        status: ApprovalStatus::Pending,
        last_seen: None,
        created_at: chrono::Utc::now().timestamp_millis(),
    };

    if let Err(e) = state.repository.create_user(&user).await {
        if is_unique_violation(&e) {
            return failure(StatusCode::CONFLICT, "Username already exists");
        }
        error!("Failed to create user: {:#}", e);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
    }

    info!(user_id = %user.id, "New sign-up pending approval: {}", user.username);
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Account created. Please wait for admin approval.",
            "user": Principal::from(&user),
        })),
    )
        .into_response()
}

pub async fn login(State(state): State<AppState>, Json(creds): Json<Credentials>) -> Response {
    let username = creds.username.trim().to_lowercase();

    let user = match state
        .repository
        .verify_user_password(&username, &creds.password)
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => return failure(StatusCode::UNAUTHORIZED, "Invalid username or password"),
        Err(e) => {
            error!("Login failed: {:#}", e);
            return failure(StatusCode::UNAUTHORIZED, "Invalid username or password");
        }
    };

    match user.status {
        ApprovalStatus::Approved => {}
        ApprovalStatus::Pending => {
            return failure(
                StatusCode::FORBIDDEN,
                "Your signup is pending admin approval",
            );
        }
        ApprovalStatus::Rejected => {
            return failure(StatusCode::UNAUTHORIZED, "Invalid username or password");
        }
    }

    if let Err(e) = state.repository.touch_last_seen(&user.id).await {
        error!(user_id = %user.id, "Failed to update last seen on login: {:#}", e);
    }

    let session = match state
        .repository
        .create_session(&user.id, state.auth_config.session_ttl_secs)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create session: {:#}", e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "Server error");
        }
    };

    info!(user_id = %user.id, "Login: {}", user.username);
    let response = Json(json!({
        "success": true,
        "user": Principal::from(&user),
    }))
    .into_response();
    with_cookie(response, session_cookie(&session.token, &state.auth_config))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers)
        && let Err(e) = state.repository.delete_session(&token).await
    {
        error!("Failed to delete session: {:#}", e);
    }

    let response = Json(json!({ "success": true })).into_response();
    with_cookie(response, clear_session_cookie(&state.auth_config))
}

/// The caller's principal, as bound by the identity gate.
pub async fn me(principal: Principal) -> Json<Principal> {
    Json(principal)
}
