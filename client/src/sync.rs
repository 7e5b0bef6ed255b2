use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::constants::KEEPALIVE_INTERVAL;
use crate::protocol::{ClientEvent, ServerEvent};

/// WebSocket transport to the room coordinator
pub struct SyncClient {
    inner: Arc<SyncClientState>,
}

struct SyncClientState {
    tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    stats: Mutex<SyncStats>,
}

#[derive(Default, Clone)]
struct SyncStats {
    bytes_out: u64,
    bytes_in: u64,
    messages_out: u64,
    messages_in: u64,
    undecodable: u64,
    last_message_at: Option<Instant>,
    last_ping_sent: Option<Instant>,
    last_ping_nonce: Option<u64>,
    last_rtt_ms: Option<f32>,
    connected_since: Option<Instant>,
    endpoint_label: Option<String>,
}

pub struct SyncStatsSnapshot {
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub messages_out: u64,
    pub messages_in: u64,
    pub undecodable: u64,
    pub last_rtt_ms: Option<f32>,
    pub last_message_age: Option<f32>,
    pub connected_duration: Option<f32>,
    pub endpoint_label: Option<String>,
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SyncClientState {
                tx: Mutex::new(None),
                stats: Mutex::new(SyncStats::default()),
            }),
        }
    }

    /// Connect to the coordinator. Returns a receiver that resolves when the socket closes.
    pub async fn connect<F>(&self, server_url: &str, on_event: F) -> Result<oneshot::Receiver<()>>
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        let (ws_stream, _) = connect_async(server_url)
            .await
            .context("Failed to connect to server")?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.inner.tx.lock() = Some(tx);

        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let disconnect_signal = Arc::new(Mutex::new(Some(disconnect_tx)));

        // Sender task
        let send_inner = Arc::clone(&self.inner);
        let send_signal = Arc::clone(&disconnect_signal);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            send_inner.clear_transport();
            if let Some(tx) = send_signal.lock().take() {
                let _ = tx.send(());
            }
        });

        let handler = Arc::new(on_event);
        let recv_inner = Arc::clone(&self.inner);
        let recv_signal = Arc::clone(&disconnect_signal);
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        recv_inner.record_incoming(text.len() as u64);
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => handler(event),
                            Err(e) => {
                                recv_inner.record_undecodable();
                                tracing::debug!("Ignoring undecodable server frame: {}", e);
                            }
                        }
                    }
                    Ok(WsMessage::Pong(payload)) => {
                        recv_inner.handle_ws_pong(&payload);
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
            recv_inner.clear_transport();
            if let Some(tx) = recv_signal.lock().take() {
                let _ = tx.send(());
            }
        });

        // Keep-alive pings
        let ping_inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                sleep(KEEPALIVE_INTERVAL).await;
                if ping_inner.send_keepalive().is_err() {
                    break;
                }
            }
        });

        Ok(disconnect_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.tx.lock().is_some()
    }

    pub fn mark_connected(&self, label: &str) {
        self.inner.mark_connected(label);
    }

    pub fn stats_snapshot(&self) -> SyncStatsSnapshot {
        self.inner.snapshot()
    }

    /// Queue an event for the coordinator.
    pub fn send(&self, event: &ClientEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        let tx = self
            .inner
            .tx
            .lock()
            .clone()
            .context("Not connected to a sync server")?;
        self.inner.record_outgoing(json.len() as u64);
        tx.send(WsMessage::Text(json.into()))
            .context("Failed to queue event to socket")?;
        Ok(())
    }
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClientState {
    fn record_outgoing(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_out += bytes;
        stats.messages_out += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_incoming(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_in += bytes;
        stats.messages_in += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_undecodable(&self) {
        self.stats.lock().undecodable += 1;
    }

    fn handle_ws_pong(&self, payload: &[u8]) {
        self.record_incoming(payload.len() as u64);
        if payload.len() < 8 {
            return;
        }
        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&payload[..8]);
        self.record_pong(u64::from_le_bytes(nonce_bytes));
    }

    fn record_pong(&self, nonce: u64) {
        let mut stats = self.stats.lock();
        if stats.last_ping_nonce == Some(nonce) {
            if let Some(sent) = stats.last_ping_sent {
                stats.last_rtt_ms = Some(sent.elapsed().as_secs_f32() * 1000.0);
            }
            stats.last_ping_nonce = None;
            stats.last_ping_sent = None;
        }
    }

    fn send_keepalive(&self) -> Result<(), ()> {
        let nonce = Uuid::new_v4().as_u128() as u64;
        {
            let mut stats = self.stats.lock();
            stats.last_ping_nonce = Some(nonce);
            stats.last_ping_sent = Some(Instant::now());
        }
        let payload = nonce.to_le_bytes().to_vec();
        self.record_outgoing(payload.len() as u64);
        self.enqueue_ws(WsMessage::Ping(payload.into()))
    }

    fn clear_transport(&self) {
        *self.tx.lock() = None;
        let mut stats = self.stats.lock();
        stats.connected_since = None;
        stats.last_ping_nonce = None;
        stats.last_ping_sent = None;
    }

    fn enqueue_ws(&self, message: WsMessage) -> Result<(), ()> {
        match self.tx.lock().clone() {
            Some(tx) => tx.send(message).map_err(|_| ()),
            None => Err(()),
        }
    }

    fn mark_connected(&self, label: &str) {
        let mut stats = self.stats.lock();
        stats.connected_since = Some(Instant::now());
        stats.endpoint_label = Some(label.to_string());
    }

    fn snapshot(&self) -> SyncStatsSnapshot {
        let stats = self.stats.lock();
        SyncStatsSnapshot {
            bytes_out: stats.bytes_out,
            bytes_in: stats.bytes_in,
            messages_out: stats.messages_out,
            messages_in: stats.messages_in,
            undecodable: stats.undecodable,
            last_rtt_ms: stats.last_rtt_ms,
            last_message_age: stats.last_message_at.map(|at| at.elapsed().as_secs_f32()),
            connected_duration: stats.connected_since.map(|at| at.elapsed().as_secs_f32()),
            endpoint_label: stats.endpoint_label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_transport_fails() {
        let client = SyncClient::new();
        let event = ClientEvent::LeaveRoom {
            room_id: "abc123".into(),
        };
        assert!(client.send(&event).is_err());
        assert!(!client.is_connected());
        assert_eq!(client.stats_snapshot().messages_out, 0);
    }

    #[test]
    fn pong_with_matching_nonce_records_rtt() {
        let client = SyncClient::new();
        {
            let mut stats = client.inner.stats.lock();
            stats.last_ping_nonce = Some(42);
            stats.last_ping_sent = Some(Instant::now());
        }
        client.inner.handle_ws_pong(&7u64.to_le_bytes());
        assert!(client.stats_snapshot().last_rtt_ms.is_none());

        client.inner.handle_ws_pong(&42u64.to_le_bytes());
        let snapshot = client.stats_snapshot();
        assert!(snapshot.last_rtt_ms.is_some());
        assert_eq!(snapshot.messages_in, 2);
    }

    #[tokio::test]
    async fn queued_events_are_counted() {
        let client = SyncClient::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *client.inner.tx.lock() = Some(tx);
        client.mark_connected("test");

        client
            .send(&ClientEvent::Play {
                room_id: "abc123".into(),
                current_time: 1.0,
            })
            .unwrap();

        let Some(WsMessage::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        assert!(text.as_str().contains("\"event\":\"play\""));
        let snapshot = client.stats_snapshot();
        assert_eq!(snapshot.messages_out, 1);
        assert_eq!(snapshot.endpoint_label.as_deref(), Some("test"));
        assert!(client.is_connected());
    }
}
