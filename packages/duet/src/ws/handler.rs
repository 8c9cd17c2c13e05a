//! WebSocket Handler
//!
//! Drives one upgraded connection: registers it in presence, pumps outbound
//! events from its bounded queue to the socket, feeds inbound frames to the
//! router one at a time, and tears everything down on close.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::metrics::ServerMetrics;
use crate::models::Principal;
use crate::repository::ChatRepository;

use super::presence::{ConnectionHandle, PresenceRegistry};
use super::protocol::{ClientEvent, ServerEvent};
use super::router::{ConnectionContext, SendLanes, dispatch_client_event, on_disconnect};

/// Shared services a connection needs; cloned out of `AppState` at upgrade.
#[derive(Clone)]
pub struct ChatServices {
    pub repository: Arc<ChatRepository>,
    pub presence: Arc<PresenceRegistry>,
    pub lanes: Arc<SendLanes>,
    pub chat_config: Arc<ChatConfig>,
    pub metrics: Arc<ServerMetrics>,
}

/// Handle an authenticated WebSocket connection until it closes.
pub async fn handle_chat_ws(socket: WebSocket, principal: Principal, services: ChatServices) {
    let (handle, mut rx) =
        ConnectionHandle::new(&principal.id, services.chat_config.outbound_buffer);
    let cancel = handle.cancellation();
    let connection_id = handle.id.clone();

    info!(
        conn_id = %connection_id,
        user_id = %principal.id,
        "WebSocket connected ({})",
        principal.username
    );
    services.metrics.connection_opened();

    services.presence.join(handle.clone());
    let ctx = ConnectionContext {
        principal: principal.clone(),
        handle,
        repository: services.repository,
        presence: services.presence,
        lanes: services.lanes,
        chat_config: services.chat_config,
        metrics: services.metrics.clone(),
    };

    ctx.presence.deliver_to_connection(
        &ctx.handle,
        ServerEvent::Connected {
            connection_id: connection_id.clone(),
            user: principal,
        },
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to send queued events to the WebSocket
    let sender_cancel = cancel.clone();
    let sender_metrics = services.metrics.clone();
    let sender_task = async move {
        loop {
            let event = tokio::select! {
                _ = sender_cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                sender_metrics.websocket_error();
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    };

    // Task to handle incoming frames, strictly in arrival order
    let input_cancel = cancel.clone();
    let input_task = async {
        loop {
            let frame = tokio::select! {
                _ = input_cancel.cancelled() => break,
                frame = ws_receiver.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    ctx.metrics.message_received();
                    match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => dispatch_client_event(&ctx, event).await,
                        Err(e) => {
                            debug!(conn_id = %ctx.handle.id, "Unparseable client frame: {}", e);
                            ctx.presence
                                .deliver_to_connection(&ctx.handle, ServerEvent::error("Invalid event"));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %ctx.handle.id, "WebSocket error: {}", e);
                    ctx.metrics.websocket_error();
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn_id = %connection_id, "Sender task ended"),
        _ = input_task => debug!(conn_id = %connection_id, "Input task ended"),
    }

    cancel.cancel();
    // Last-seen is recorded in the background; nothing here waits on it.
    drop(on_disconnect(&ctx));
    ctx.metrics.connection_closed();

    info!(
        conn_id = %connection_id,
        user_id = %ctx.principal.id,
        "WebSocket disconnected"
    );
}
