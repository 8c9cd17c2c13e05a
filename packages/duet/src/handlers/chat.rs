use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info};

use crate::AppState;
use crate::auth::ApprovedPrincipal;
use crate::error::{ChatError, ChatResult};
use crate::models::{MessageView, MutationResponse, PartnerInfo};
use crate::ws::{ServerEvent, broadcast_restored};

/// Conversation between the caller and `user_id`, filtered for the caller.
pub async fn get_history(
    State(state): State<AppState>,
    ApprovedPrincipal(principal): ApprovedPrincipal,
    Path(user_id): Path<String>,
) -> ChatResult<Json<Vec<MessageView>>> {
    let messages = state
        .repository
        .history(
            &principal.id,
            &user_id,
            principal.is_admin,
            state.chat_config.history_limit,
        )
        .await?;
    Ok(Json(messages))
}

fn mutation_failure(err: ChatError) -> Response {
    if let ChatError::StoreUnavailable(ref e) = err {
        error!("Store error during message mutation: {}", e);
    }
    (
        err.status(),
        Json(MutationResponse::<()>::failed(err.client_message("Server error"))),
    )
        .into_response()
}

/// Soft-delete one of the caller's own messages and tell the other party.
pub async fn delete_message(
    State(state): State<AppState>,
    ApprovedPrincipal(principal): ApprovedPrincipal,
    Path(message_id): Path<i64>,
) -> Response {
    match state
        .repository
        .soft_delete_message(message_id, &principal)
        .await
    {
        Ok(message) => {
            info!(user_id = %principal.id, message_id, "message deleted");
            state.presence.deliver_to(
                message.counterpart_of(&principal.id),
                ServerEvent::MessageDeleted { message_id },
            );
            Json(MutationResponse::<()>::ok(None)).into_response()
        }
        Err(e) => mutation_failure(e),
    }
}

/// Restore a deleted message (admin only) and tell both parties.
pub async fn restore_message(
    State(state): State<AppState>,
    ApprovedPrincipal(principal): ApprovedPrincipal,
    Path(message_id): Path<i64>,
) -> Response {
    match state.repository.restore_message(message_id, &principal).await {
        Ok(view) => {
            info!(user_id = %principal.id, message_id, "message restored");
            broadcast_restored(&state.presence, view.clone());
            Json(MutationResponse::ok(Some(view))).into_response()
        }
        Err(e) => mutation_failure(e),
    }
}

/// People the caller can chat with, with live presence.
pub async fn list_partners(
    State(state): State<AppState>,
    ApprovedPrincipal(principal): ApprovedPrincipal,
) -> Result<Json<Vec<PartnerInfo>>, StatusCode> {
    let users = state
        .repository
        .list_partners(&principal.id)
        .await
        .map_err(|e| {
            error!("Failed to list partners: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(
        users
            .into_iter()
            .map(|u| PartnerInfo {
                online: state.presence.is_online(&u.id),
                id: u.id,
                username: u.username,
                last_seen: u.last_seen,
            })
            .collect(),
    ))
}
