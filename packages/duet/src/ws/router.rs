//! Conversation Router
//!
//! Per-connection dispatch of `ClientEvent`s. Each event is validated,
//! persisted through the repository where needed, then fanned out through
//! the presence registry by recipient identity. Failures are reported to the
//! originating connection only and never close it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::metrics::ServerMetrics;
use crate::models::Principal;
use crate::repository::ChatRepository;

use super::presence::{ConnectionHandle, PresenceRegistry};
use super::protocol::{ChatPayload, ClientEvent, ServerEvent};

/// One async lock per sender. Held across append and fan-out so that two
/// connections of the same principal cannot interleave persistence and
/// delivery order.
#[derive(Default)]
pub struct SendLanes {
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl SendLanes {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, sender_id: &str) -> Arc<Mutex<()>> {
        self.lanes
            .entry(sender_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the sender's lane once no send holds or waits on it. The map
    /// itself owns the last reference at that point.
    fn release(&self, sender_id: &str) {
        self.lanes
            .remove_if(sender_id, |_, lane| Arc::strong_count(lane) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lanes.len()
    }
}

/// Per-connection context shared between the socket handler and the dispatcher.
pub(crate) struct ConnectionContext {
    pub principal: Principal,
    pub handle: ConnectionHandle,
    pub repository: Arc<ChatRepository>,
    pub presence: Arc<PresenceRegistry>,
    pub lanes: Arc<SendLanes>,
    pub chat_config: Arc<ChatConfig>,
    pub metrics: Arc<ServerMetrics>,
}

impl ConnectionContext {
    fn reply(&self, event: ServerEvent) {
        self.presence.deliver_to_connection(&self.handle, event);
    }

    /// Report a failed event to this connection only. Store failures are
    /// logged with their cause and replaced by `fallback` for the client.
    fn report(&self, err: &ChatError, fallback: &str) {
        match err {
            ChatError::StoreUnavailable(e) => {
                error!(
                    conn_id = %self.handle.id,
                    user_id = %self.principal.id,
                    "store error: {}", e
                );
                self.metrics.store_error();
            }
            other => {
                debug!(conn_id = %self.handle.id, "event rejected: {}", other);
            }
        }
        self.reply(ServerEvent::error(err.client_message(fallback)));
    }
}

/// Handle one inbound event. Callers await this before reading the next
/// frame, which keeps a connection's events in arrival order.
pub(crate) async fn dispatch_client_event(ctx: &ConnectionContext, event: ClientEvent) {
    match event {
        ClientEvent::PrivateMessage { to, message } => {
            handle_private_message(ctx, &to, &message).await
        }
        ClientEvent::Typing { to } => {
            if let Some(to) = typing_target(ctx, &to) {
                ctx.presence.deliver_to(
                    to,
                    ServerEvent::UserTyping {
                        from: ctx.principal.id.clone(),
                        username: ctx.principal.username.clone(),
                    },
                );
            }
        }
        ClientEvent::StopTyping { to } => {
            if let Some(to) = typing_target(ctx, &to) {
                ctx.presence.deliver_to(
                    to,
                    ServerEvent::UserStopTyping {
                        from: ctx.principal.id.clone(),
                    },
                );
            }
        }
        ClientEvent::DeleteMessage { message_id } => handle_delete(ctx, message_id).await,
        ClientEvent::RestoreMessage { message_id } => handle_restore(ctx, message_id).await,
        ClientEvent::MessageDeleted { message_id, to } => {
            relay_deleted(ctx, message_id, to.as_deref()).await
        }
        ClientEvent::MessageRestored { message_id, to, .. } => {
            relay_restored(ctx, message_id, to.as_deref()).await
        }
    }
}

fn typing_target<'a>(ctx: &ConnectionContext, to: &'a str) -> Option<&'a str> {
    (!to.is_empty() && to != ctx.principal.id).then_some(to)
}

async fn handle_private_message(ctx: &ConnectionContext, to: &str, body: &str) {
    let lane = ctx.lanes.lane(&ctx.principal.id);
    {
        let _guard = lane.lock().await;
        store_and_fan_out(ctx, to, body).await;
    }
    drop(lane);
    ctx.lanes.release(&ctx.principal.id);
}

async fn store_and_fan_out(ctx: &ConnectionContext, to: &str, body: &str) {
    let view = match ctx
        .repository
        .append_message(&ctx.principal, to, body, ctx.chat_config.max_message_len)
        .await
    {
        Ok(view) => view,
        Err(e) => {
            ctx.report(&e, "Failed to send message");
            return;
        }
    };

    ctx.metrics.message_stored();
    debug!(
        conn_id = %ctx.handle.id,
        user_id = %ctx.principal.id,
        message_id = view.id,
        "message stored"
    );

    let payload = ChatPayload::from(&view);
    ctx.presence
        .deliver_to(&view.to.id, ServerEvent::PrivateMessage(payload.clone()));

    if ctx.chat_config.confirm_to_all_sender_connections {
        ctx.presence
            .deliver_to(&ctx.principal.id, ServerEvent::MessageSent(payload));
    } else {
        ctx.reply(ServerEvent::MessageSent(payload));
    }
}

async fn handle_delete(ctx: &ConnectionContext, message_id: i64) {
    match ctx
        .repository
        .soft_delete_message(message_id, &ctx.principal)
        .await
    {
        Ok(message) => {
            ctx.presence.deliver_to(
                message.counterpart_of(&ctx.principal.id),
                ServerEvent::MessageDeleted { message_id },
            );
        }
        Err(e) => ctx.report(&e, "Failed to delete message"),
    }
}

async fn handle_restore(ctx: &ConnectionContext, message_id: i64) {
    match ctx
        .repository
        .restore_message(message_id, &ctx.principal)
        .await
    {
        Ok(view) => broadcast_restored(&ctx.presence, view),
        Err(e) => ctx.report(&e, "Failed to restore message"),
    }
}

/// Tell both parties of a restored message about it.
pub(crate) fn broadcast_restored(presence: &PresenceRegistry, view: crate::models::MessageView) {
    let from = view.from.id.clone();
    let to = view.to.id.clone();
    let message_id = view.id;
    presence.deliver_to(
        &to,
        ServerEvent::MessageRestored {
            message_id,
            message: view.clone(),
        },
    );
    presence.deliver_to(
        &from,
        ServerEvent::MessageRestored {
            message_id,
            message: view,
        },
    );
}

/// A client reports it deleted `message_id` over HTTP. Only forwarded when
/// the store agrees: the message is deleted and the caller wrote it.
async fn relay_deleted(ctx: &ConnectionContext, message_id: i64, claimed_to: Option<&str>) {
    let message = match ctx.repository.get_message(message_id).await {
        Ok(m) => m,
        Err(e) => {
            ctx.report(&e, "Failed to relay deletion");
            return;
        }
    };

    if message.from_id != ctx.principal.id || !message.deleted {
        warn!(
            conn_id = %ctx.handle.id,
            user_id = %ctx.principal.id,
            message_id,
            "ignoring unverified deletion relay"
        );
        ctx.reply(ServerEvent::error("Deletion could not be verified"));
        return;
    }

    let counterpart = message.counterpart_of(&ctx.principal.id);
    if claimed_to.is_some_and(|to| to != counterpart) {
        debug!(message_id, "relay named the wrong recipient, using stored one");
    }
    ctx.presence
        .deliver_to(counterpart, ServerEvent::MessageDeleted { message_id });
}

/// A client reports it restored `message_id` over HTTP. Only forwarded for
/// admins, and only when the stored message is live again.
async fn relay_restored(ctx: &ConnectionContext, message_id: i64, claimed_to: Option<&str>) {
    if !ctx.principal.is_admin {
        ctx.reply(ServerEvent::error("Admin access required"));
        return;
    }

    let view = match ctx.repository.get_message_view(message_id).await {
        Ok(v) => v,
        Err(e) => {
            ctx.report(&e, "Failed to relay restore");
            return;
        }
    };

    if view.deleted {
        ctx.reply(ServerEvent::error("Restore could not be verified"));
        return;
    }

    if claimed_to.is_some_and(|to| to != view.to.id && to != view.from.id) {
        debug!(message_id, "relay named the wrong recipient, using stored one");
    }
    broadcast_restored(&ctx.presence, view);
}

/// Teardown hook: leave presence, then record last-seen in the background.
/// A failed update is logged and never reaches a client.
pub(crate) fn on_disconnect(ctx: &ConnectionContext) -> tokio::task::JoinHandle<()> {
    let went_offline = ctx.presence.leave(&ctx.handle);
    debug!(
        conn_id = %ctx.handle.id,
        user_id = %ctx.principal.id,
        went_offline,
        "connection closed"
    );

    let repository = ctx.repository.clone();
    let user_id = ctx.principal.id.clone();
    tokio::spawn(async move {
        if let Err(e) = repository.touch_last_seen(&user_id).await {
            warn!(user_id = %user_id, "Failed to update last seen: {:#}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DELETED_PLACEHOLDER;
    use crate::repository::test_helpers::{self, seed_admin, seed_member};
    use tokio::sync::mpsc;

    struct Harness {
        repo: Arc<ChatRepository>,
        presence: Arc<PresenceRegistry>,
        lanes: Arc<SendLanes>,
        metrics: Arc<ServerMetrics>,
        config: Arc<ChatConfig>,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_config(ChatConfig::default()).await
        }

        async fn with_config(config: ChatConfig) -> Self {
            let metrics = Arc::new(ServerMetrics::new());
            Self {
                repo: Arc::new(test_helpers::test_repository().await),
                presence: Arc::new(PresenceRegistry::new(metrics.clone())),
                lanes: Arc::new(SendLanes::new()),
                metrics,
                config: Arc::new(config),
            }
        }

        /// Open a connection for `principal` and register it in presence.
        fn connect(&self, principal: &Principal) -> (ConnectionContext, mpsc::Receiver<ServerEvent>) {
            let (handle, rx) = ConnectionHandle::new(&principal.id, 32);
            self.presence.join(handle.clone());
            let ctx = ConnectionContext {
                principal: principal.clone(),
                handle,
                repository: self.repo.clone(),
                presence: self.presence.clone(),
                lanes: self.lanes.clone(),
                chat_config: self.config.clone(),
                metrics: self.metrics.clone(),
            };
            (ctx, rx)
        }
    }

    fn send(to: &Principal, message: &str) -> ClientEvent {
        ClientEvent::PrivateMessage {
            to: to.id.clone(),
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn send_lanes_are_released_after_each_send() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, _a1_rx) = h.connect(&alice);
        let (b1, _b1_rx) = h.connect(&bob);

        dispatch_client_event(&a1, send(&bob, "hi")).await;
        dispatch_client_event(&b1, send(&alice, "hey")).await;
        // A failed send releases its lane too
        dispatch_client_event(&a1, send(&bob, "")).await;

        assert_eq!(h.lanes.len(), 0);
        assert_eq!(h.metrics.snapshot().messages.stored, 2);
    }

    #[test]
    fn busy_lane_survives_release() {
        let lanes = SendLanes::new();
        let held = lanes.lane("alice");
        lanes.release("alice");
        assert_eq!(lanes.len(), 1);

        drop(held);
        lanes.release("alice");
        assert_eq!(lanes.len(), 0);
    }

    #[tokio::test]
    async fn private_message_reaches_all_recipient_tabs_and_confirms_origin() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;

        let (a1, mut a1_rx) = h.connect(&alice);
        let (_a2, mut a2_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);
        let (_b2, mut b2_rx) = h.connect(&bob);

        dispatch_client_event(&a1, send(&bob, "hi")).await;

        for rx in [&mut b1_rx, &mut b2_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::PrivateMessage(p) => {
                    assert_eq!(p.message, "hi");
                    assert_eq!(p.from.username, "alice");
                    assert_eq!(p.to.id, bob.id);
                }
                other => panic!("expected PrivateMessage, got {other:?}"),
            }
        }
        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::MessageSent(_)));
        // Other sender tab gets nothing by default
        assert!(a2_rx.try_recv().is_err());

        let history = h.repo.history(&alice.id, &bob.id, false, 100).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].deleted);
    }

    #[tokio::test]
    async fn confirmation_can_fan_out_to_every_sender_tab() {
        let h = Harness::with_config(ChatConfig {
            confirm_to_all_sender_connections: true,
            ..ChatConfig::default()
        })
        .await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;

        let (a1, mut a1_rx) = h.connect(&alice);
        let (_a2, mut a2_rx) = h.connect(&alice);

        dispatch_client_event(&a1, send(&bob, "hi")).await;

        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::MessageSent(_)));
        assert!(matches!(a2_rx.try_recv().unwrap(), ServerEvent::MessageSent(_)));
    }

    #[tokio::test]
    async fn send_to_offline_recipient_persists() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, mut a1_rx) = h.connect(&alice);

        dispatch_client_event(&a1, send(&bob, "later")).await;

        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::MessageSent(_)));
        let history = h.repo.history(&bob.id, &alice.id, false, 100).await.unwrap();
        assert_eq!(history[0].message, "later");
    }

    #[tokio::test]
    async fn failed_send_reports_error_to_origin_only() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, mut a1_rx) = h.connect(&alice);
        let (_a2, mut a2_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);

        dispatch_client_event(&a1, send(&bob, "   ")).await;

        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(a2_rx.try_recv().is_err());
        assert!(b1_rx.try_recv().is_err());

        // Connection is still usable afterwards
        dispatch_client_event(&a1, send(&bob, "ok")).await;
        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::MessageSent(_)));
    }

    #[tokio::test]
    async fn store_failure_is_generic_to_client() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, mut a1_rx) = h.connect(&alice);

        h.repo.pool.close().await;
        dispatch_client_event(&a1, send(&bob, "hi")).await;

        match a1_rx.try_recv().unwrap() {
            ServerEvent::Error { message } => assert_eq!(message, "Failed to send message"),
            other => panic!("expected Error, got {other:?}"),
        }
        assert_eq!(h.metrics.snapshot().errors.store, 1);
    }

    #[tokio::test]
    async fn typing_signals_go_to_peer_only() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, mut a1_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);

        dispatch_client_event(&a1, ClientEvent::Typing { to: bob.id.clone() }).await;
        dispatch_client_event(&a1, ClientEvent::StopTyping { to: bob.id.clone() }).await;

        match b1_rx.try_recv().unwrap() {
            ServerEvent::UserTyping { from, username } => {
                assert_eq!(from, alice.id);
                assert_eq!(username, "alice");
            }
            other => panic!("expected UserTyping, got {other:?}"),
        }
        match b1_rx.try_recv().unwrap() {
            ServerEvent::UserStopTyping { from } => assert_eq!(from, alice.id),
            other => panic!("expected UserStopTyping, got {other:?}"),
        }
        assert!(a1_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_notifies_counterpart_and_redacts_history() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let admin = seed_admin(&h.repo, "admin").await;
        let (a1, mut a1_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);

        dispatch_client_event(&a1, send(&bob, "hi")).await;
        let id = match a1_rx.try_recv().unwrap() {
            ServerEvent::MessageSent(p) => p.id,
            other => panic!("expected MessageSent, got {other:?}"),
        };
        let _ = b1_rx.try_recv();

        dispatch_client_event(&a1, ClientEvent::DeleteMessage { message_id: id }).await;

        match b1_rx.try_recv().unwrap() {
            ServerEvent::MessageDeleted { message_id } => assert_eq!(message_id, id),
            other => panic!("expected MessageDeleted, got {other:?}"),
        }

        let bob_view = h.repo.history(&bob.id, &alice.id, false, 100).await.unwrap();
        assert_eq!(bob_view[0].message, DELETED_PLACEHOLDER);
        let admin_view = h
            .repo
            .history(&alice.id, &bob.id, admin.is_admin, 100)
            .await
            .unwrap();
        assert_eq!(admin_view[0].message, "hi");
        assert!(admin_view[0].deleted);
    }

    #[tokio::test]
    async fn non_author_delete_is_forbidden() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (b1, mut b1_rx) = h.connect(&bob);

        let msg = h.repo.append_message(&alice, &bob.id, "hi", 100).await.unwrap();
        dispatch_client_event(&b1, ClientEvent::DeleteMessage { message_id: msg.id }).await;

        match b1_rx.try_recv().unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("Not authorized")),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(!h.repo.get_message(msg.id).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn admin_restore_notifies_both_parties() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let admin = seed_admin(&h.repo, "admin").await;
        let (_a1, mut a1_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);
        let (adm, _adm_rx) = h.connect(&admin);

        let msg = h.repo.append_message(&alice, &bob.id, "hi", 100).await.unwrap();
        h.repo.soft_delete_message(msg.id, &alice).await.unwrap();

        dispatch_client_event(&adm, ClientEvent::RestoreMessage { message_id: msg.id }).await;

        for rx in [&mut a1_rx, &mut b1_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::MessageRestored { message_id, message } => {
                    assert_eq!(message_id, msg.id);
                    assert_eq!(message.message, "hi");
                    assert!(!message.deleted);
                }
                other => panic!("expected MessageRestored, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn non_admin_restore_is_forbidden() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, mut a1_rx) = h.connect(&alice);

        let msg = h.repo.append_message(&alice, &bob.id, "hi", 100).await.unwrap();
        h.repo.soft_delete_message(msg.id, &alice).await.unwrap();
        let _ = a1_rx.try_recv();

        dispatch_client_event(&a1, ClientEvent::RestoreMessage { message_id: msg.id }).await;

        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(h.repo.get_message(msg.id).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn deletion_relay_requires_store_agreement() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let carol = seed_member(&h.repo, "carol").await;
        let (a1, mut a1_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);
        let (_c1, mut c1_rx) = h.connect(&carol);

        let msg = h.repo.append_message(&alice, &bob.id, "hi", 100).await.unwrap();

        // Not deleted yet: relay is refused
        dispatch_client_event(
            &a1,
            ClientEvent::MessageDeleted {
                message_id: msg.id,
                to: Some(bob.id.clone()),
            },
        )
        .await;
        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(b1_rx.try_recv().is_err());

        h.repo.soft_delete_message(msg.id, &alice).await.unwrap();

        // A bogus recipient is ignored in favor of the stored counterpart
        dispatch_client_event(
            &a1,
            ClientEvent::MessageDeleted {
                message_id: msg.id,
                to: Some(carol.id.clone()),
            },
        )
        .await;
        assert!(matches!(
            b1_rx.try_recv().unwrap(),
            ServerEvent::MessageDeleted { .. }
        ));
        assert!(c1_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn restore_relay_is_admin_only() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let admin = seed_admin(&h.repo, "admin").await;
        let (a1, mut a1_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);
        let (adm, _adm_rx) = h.connect(&admin);

        let msg = h.repo.append_message(&alice, &bob.id, "hi", 100).await.unwrap();

        let relay = ClientEvent::MessageRestored {
            message_id: msg.id,
            message: None,
            to: Some(bob.id.clone()),
        };
        dispatch_client_event(&a1, relay.clone()).await;
        assert!(matches!(a1_rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(b1_rx.try_recv().is_err());

        dispatch_client_event(&adm, relay).await;
        assert!(matches!(
            b1_rx.try_recv().unwrap(),
            ServerEvent::MessageRestored { .. }
        ));
        assert!(matches!(
            a1_rx.try_recv().unwrap(),
            ServerEvent::MessageRestored { .. }
        ));
    }

    #[tokio::test]
    async fn per_connection_order_is_preserved() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let bob = seed_member(&h.repo, "bob").await;
        let (a1, _a1_rx) = h.connect(&alice);
        let (_b1, mut b1_rx) = h.connect(&bob);

        for i in 0..10 {
            dispatch_client_event(&a1, send(&bob, &format!("m{i}"))).await;
        }

        let mut delivered = Vec::new();
        while let Ok(ServerEvent::PrivateMessage(p)) = b1_rx.try_recv() {
            delivered.push(p.id);
        }
        let stored: Vec<_> = h
            .repo
            .history(&alice.id, &bob.id, false, 100)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(delivered, stored);
    }

    #[tokio::test]
    async fn disconnect_leaves_presence_and_records_last_seen() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let (a1, _a1_rx) = h.connect(&alice);
        assert!(h.presence.is_online(&alice.id));

        on_disconnect(&a1).await.unwrap();

        assert!(!h.presence.is_online(&alice.id));
        let user = h.repo.get_user_by_id(&alice.id).await.unwrap().unwrap();
        assert!(user.last_seen.is_some());
    }

    #[tokio::test]
    async fn last_seen_failure_is_swallowed() {
        let h = Harness::new().await;
        let alice = seed_member(&h.repo, "alice").await;
        let (a1, _a1_rx) = h.connect(&alice);

        h.repo.pool.close().await;
        // Task completes without panicking even though the store is gone
        on_disconnect(&a1).await.unwrap();
        assert!(!h.presence.is_online(&alice.id));
    }
}
