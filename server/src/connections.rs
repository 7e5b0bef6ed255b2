use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::coordinator::Outbound;
use crate::protocol::{ConnectionId, ServerEvent};

pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

/// Outbound queues of every open WebSocket, keyed by connection id
#[derive(Clone, Default)]
pub struct Connections {
    senders: Arc<DashMap<ConnectionId, ClientSender>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: ConnectionId, sender: ClientSender) {
        self.senders.insert(connection, sender);
        tracing::debug!("Registered connection {}", connection);
    }

    pub fn unregister(&self, connection: ConnectionId) {
        self.senders.remove(&connection);
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}

impl Outbound for Connections {
    fn deliver(&self, connection: ConnectionId, event: ServerEvent) {
        match self.senders.get(&connection) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!("Connection {} closed before delivery", connection);
                }
            }
            None => tracing::debug!("No open socket for connection {}", connection),
        }
    }
}
