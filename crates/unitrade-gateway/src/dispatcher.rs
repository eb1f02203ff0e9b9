use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use unitrade_types::events::GatewayEvent;

/// Manages connected clients and fans events out to them.
///
/// Room traffic goes over one broadcast channel; every connection filters it
/// by the topics it joined. Chat traffic is targeted at the two participants
/// through their per-user channels.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for topic-tagged events
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Returns how many
    /// receivers it reached.
    pub fn broadcast(&self, event: GatewayEvent) -> usize {
        self.inner.broadcast_tx.send(event).unwrap_or(0)
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    ///
    /// A newer connection for the same user replaces the older one.
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id still
    /// owns it. A stale connection closing leaves the newer one in place.
    /// Returns whether the channel was removed.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut channels = self.inner.user_channels.write().await;
        let is_current = channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id);
        if is_current {
            channels.remove(&user_id);
        }
        is_current
    }

    /// Send a targeted event to a specific user. Returns `false` when the
    /// user has no live connection.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let channels = self.inner.user_channels.read().await;
        match channels.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }
}
