//! State-change notifications published to an external collaborator.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::State;

/// Environment variable overriding the node identifier carried by notifications.
pub const NODE_ID_ENV: &str = "CIRCUIT_GUARD_NODE_ID";

static LOCAL_NODE_ID: Lazy<String> =
    Lazy::new(|| std::env::var(NODE_ID_ENV).unwrap_or_else(|_| "local".to_string()));

/// Identifier of this process, resolved once.
pub fn local_node_id() -> &'static str {
    &LOCAL_NODE_ID
}

/// Snapshot of a breaker, as broadcast on every transition and periodically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNotification {
    /// State at the time of the snapshot.
    pub state: State,
    /// Breaker name.
    pub name: String,
    /// Failure count at the time of the snapshot.
    pub failures: u32,
    /// Emitting node.
    pub node: String,
}

impl StateNotification {
    /// Encodes the snapshot as the JSON mapping published on the bus.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state.as_str(),
            "name": self.name,
            "failures": self.failures,
            "node": self.node,
        })
    }
}

/// Collaborator that delivers notifications to an address.
pub trait NotificationSink: Send + Sync + 'static {
    /// Emits `notification` to `address`. Must not block.
    fn publish(&self, address: &str, notification: &StateNotification);
}

/// A sink that discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn publish(&self, _address: &str, _notification: &StateNotification) {}
}

/// A notification addressed to a bus destination.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEnvelope {
    /// Destination address.
    pub address: String,
    /// JSON payload, see [`StateNotification::to_json`].
    pub payload: serde_json::Value,
}

/// Forwards notifications into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelNotificationSink {
    tx: mpsc::UnboundedSender<NotificationEnvelope>,
}

impl ChannelNotificationSink {
    /// Creates a sink together with the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn publish(&self, address: &str, notification: &StateNotification) {
        let envelope = NotificationEnvelope {
            address: address.to_string(),
            payload: notification.to_json(),
        };

        if self.tx.send(envelope).is_err() {
            debug!(breaker = %notification.name, "notification receiver dropped");
        }
    }
}

/// Routes snapshots to the configured address, or nowhere.
pub(crate) struct NotificationEmitter {
    address: Option<String>,
    node: String,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationEmitter {
    pub(crate) fn new(
        address: Option<String>,
        node: String,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            address,
            node,
            sink,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.address.is_some()
    }

    pub(crate) fn emit(&self, name: &str, state: State, failures: u32) {
        let Some(address) = self.address.as_deref() else {
            return;
        };

        let notification = StateNotification {
            state,
            name: name.to_string(),
            failures,
            node: self.node.clone(),
        };
        self.sink.publish(address, &notification);
    }
}
