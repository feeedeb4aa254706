//! Real-time fan-out to dashboard clients
//!
//! Handlers talk to the [`PushChannel`] trait; the websocket hub is one
//! implementation of it. Delivery is best-effort to currently-connected
//! clients, with no replay for late joiners.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::metrics::Metrics;

/// Subscriber group receiving spot ticker updates.
pub const SPOT_COINS_GROUP: &str = "spot-coins";
/// Subscriber group receiving kline updates.
pub const KLINES_GROUP: &str = "klines";

/// Broadcast capability consumed by the queue handlers.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn broadcast_to_group(&self, group: &str, event: &str, payload: Value);
    async fn broadcast_to_all(&self, event: &str, payload: Value);
}

struct ClientConnection {
    sender: mpsc::UnboundedSender<String>,
    groups: HashSet<String>,
}

/// Registry of connected websocket clients and their group memberships.
///
/// Clients register on upgrade and pick groups with subscribe commands;
/// dead connections are pruned while broadcasting.
#[derive(Default)]
pub struct WsHub {
    clients: DashMap<Uuid, ClientConnection>,
    metrics: Option<Arc<Metrics>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a new client; returns its id and the frame receiver the
    /// socket task drains.
    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients.insert(
            id,
            ClientConnection {
                sender,
                groups: HashSet::new(),
            },
        );
        if let Some(m) = &self.metrics {
            m.ws_clients_connected.set(self.clients.len() as i64);
        }
        debug!(client = %id, "websocket client registered");
        (id, receiver)
    }

    pub fn unregister(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            debug!(client = %id, "websocket client unregistered");
        }
        if let Some(m) = &self.metrics {
            m.ws_clients_connected.set(self.clients.len() as i64);
        }
    }

    pub fn join_group(&self, id: Uuid, group: &str) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.groups.insert(group.to_string());
            debug!(client = %id, group = %group, "client joined group");
        }
    }

    pub fn leave_group(&self, id: Uuid, group: &str) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            client.groups.remove(group);
            debug!(client = %id, group = %group, "client left group");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn frame(event: &str, payload: &Value) -> String {
        json!({ "event": event, "payload": payload }).to_string()
    }

    fn send_where<F: Fn(&ClientConnection) -> bool>(&self, frame: &str, include: F) -> usize {
        let mut dead = Vec::new();
        let mut sent = 0;
        for entry in self.clients.iter() {
            if !include(entry.value()) {
                continue;
            }
            if entry.value().sender.send(frame.to_string()).is_ok() {
                sent += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.unregister(id);
        }
        sent
    }
}

#[async_trait]
impl PushChannel for WsHub {
    async fn broadcast_to_group(&self, group: &str, event: &str, payload: Value) {
        let frame = Self::frame(event, &payload);
        let sent = self.send_where(&frame, |client| client.groups.contains(group));
        debug!(group = %group, event = %event, clients = sent, "broadcast to group");
    }

    async fn broadcast_to_all(&self, event: &str, payload: Value) {
        let frame = Self::frame(event, &payload);
        let sent = self.send_where(&frame, |_| true);
        debug!(event = %event, clients = sent, "broadcast to all clients");
    }
}
