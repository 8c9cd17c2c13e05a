use axum::{
    extract::{State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::AppState;
use crate::auth::ApprovedPrincipal;
use crate::error::ChatError;
use crate::ws;

/// Upgrade to the chat channel. The principal is fixed for the life of the
/// connection.
pub async fn chat_websocket_handler(
    State(state): State<AppState>,
    principal: Result<ApprovedPrincipal, ChatError>,
    ws: WebSocketUpgrade,
) -> Response {
    let ApprovedPrincipal(principal) = match principal {
        Ok(p) => p,
        Err(e) => {
            debug!("Rejected WebSocket upgrade: {}", e);
            state.metrics.upgrade_rejected();
            return e.into_response();
        }
    };

    let services = state.chat_services();
    ws.on_upgrade(move |socket| ws::handle_chat_ws(socket, principal, services))
}
