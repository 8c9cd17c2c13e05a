//! Presence Registry
//!
//! Maps each principal to its live connections (one per browser tab, device,
//! and so on) and fans events out to them. Every connection owns a bounded
//! outbound queue; a connection whose queue is full is disconnected and
//! removed rather than allowed to stall the sender.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::ServerMetrics;

use super::protocol::ServerEvent;

/// Sending half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: String,
    pub principal_id: String,
    tx: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end its writer task drains.
    pub fn new(
        principal_id: impl Into<String>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.into(),
            tx,
            cancel: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Fires when the registry decides this connection must go away.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

enum SendOutcome {
    Queued,
    Overflow,
    Gone,
}

fn try_enqueue(handle: &ConnectionHandle, event: ServerEvent) -> SendOutcome {
    match handle.tx.try_send(event) {
        Ok(()) => SendOutcome::Queued,
        Err(TrySendError::Full(_)) => SendOutcome::Overflow,
        Err(TrySendError::Closed(_)) => SendOutcome::Gone,
    }
}

pub struct PresenceRegistry {
    /// principal id -> (connection id -> handle)
    connections: DashMap<String, HashMap<String, ConnectionHandle>>,
    metrics: Arc<ServerMetrics>,
}

impl PresenceRegistry {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            connections: DashMap::new(),
            metrics,
        }
    }

    pub fn join(&self, handle: ConnectionHandle) {
        debug!(
            conn_id = %handle.id,
            user_id = %handle.principal_id,
            "connection joined presence"
        );
        self.connections
            .entry(handle.principal_id.clone())
            .or_default()
            .insert(handle.id.clone(), handle);
    }

    /// Remove a connection. Returns true when this was the principal's last
    /// live connection. Removing an unknown connection is a no-op.
    pub fn leave(&self, handle: &ConnectionHandle) -> bool {
        self.remove(&handle.principal_id, &handle.id)
    }

    fn remove(&self, principal_id: &str, connection_id: &str) -> bool {
        let mut removed = false;
        let went_offline = match self.connections.get_mut(principal_id) {
            Some(mut conns) => {
                removed = conns.remove(connection_id).is_some();
                conns.is_empty()
            }
            None => false,
        };
        if went_offline {
            self.connections
                .remove_if(principal_id, |_, conns| conns.is_empty());
        }
        if removed {
            debug!(conn_id = %connection_id, user_id = %principal_id, "connection left presence");
        }
        removed && went_offline
    }

    /// Send `event` to every live connection of `principal_id`. Dropped
    /// silently when the principal has none. Returns how many connections
    /// accepted the event.
    pub fn deliver_to(&self, principal_id: &str, event: ServerEvent) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        if let Some(conns) = self.connections.get(principal_id) {
            for handle in conns.values() {
                match try_enqueue(handle, event.clone()) {
                    SendOutcome::Queued => delivered += 1,
                    SendOutcome::Overflow => evicted.push((handle.clone(), true)),
                    SendOutcome::Gone => evicted.push((handle.clone(), false)),
                }
            }
        }

        // The map guard is released before evicting to avoid re-locking the shard.
        for (handle, overflowed) in evicted {
            self.evict(&handle, overflowed);
        }

        self.record_sent(delivered);
        delivered
    }

    /// Send `event` to one specific connection only.
    pub fn deliver_to_connection(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        let queued = match try_enqueue(handle, event) {
            SendOutcome::Queued => true,
            SendOutcome::Overflow => {
                self.evict(handle, true);
                false
            }
            SendOutcome::Gone => {
                self.evict(handle, false);
                false
            }
        };
        self.record_sent(usize::from(queued));
        queued
    }

    fn record_sent(&self, delivered: usize) {
        for _ in 0..delivered {
            self.metrics.message_sent();
        }
    }

    /// Drop `handle` after a failed enqueue. The undelivered event counts as
    /// dropped either way.
    fn evict(&self, handle: &ConnectionHandle, overflowed: bool) {
        self.metrics.message_dropped();
        if overflowed {
            warn!(
                conn_id = %handle.id,
                user_id = %handle.principal_id,
                "outbound buffer full, disconnecting slow connection"
            );
            self.metrics.slow_consumer_disconnected();
        }
        handle.cancel.cancel();
        self.remove(&handle.principal_id, &handle.id);
    }

    pub fn is_online(&self, principal_id: &str) -> bool {
        self.connections
            .get(principal_id)
            .is_some_and(|conns| !conns.is_empty())
    }

    pub fn connection_count_for(&self, principal_id: &str) -> usize {
        self.connections
            .get(principal_id)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }

    pub fn online_user_count(&self) -> usize {
        self.connections.len()
    }

    /// Ask every live connection to close. Each one removes itself from the
    /// registry as it tears down.
    pub fn disconnect_all(&self) -> usize {
        let mut count = 0;
        for entry in self.connections.iter() {
            for handle in entry.value().values() {
                handle.cancel.cancel();
                count += 1;
            }
        }
        count
    }
}
