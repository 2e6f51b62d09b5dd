//! WebSocket broadcast endpoint (spec.md §4.9/§6): a single fan-out message
//! type carrying the current snapshot, plus `alert`/`alertResolved`/
//! `update:progress` messages. Grounded on the teacher's
//! `graphql/shell_ws.rs` WebSocketUpgrade + split-sink/stream handling,
//! generalized from a per-session bidirectional proxy to a one-way
//! `tokio::sync::broadcast` fan-out.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::metrics::CoreMetrics;
use crate::state::{Alert, StateSnapshot};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "snapshot")]
    Snapshot { data: Box<StateSnapshot>, timestamp: i64 },
    #[serde(rename = "alert")]
    Alert { data: Box<Alert>, timestamp: i64 },
    #[serde(rename = "alertResolved")]
    AlertResolved { id: String, timestamp: i64 },
    #[serde(rename = "update:progress")]
    UpdateProgress { instance: String, message: String, timestamp: i64 },
}

/// Shared broadcast sender; clones are cheap. Kept separate from
/// `StateStore` since it fans out to transport, not state.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<WsMessage>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn send(&self, msg: WsMessage) {
        // No subscribers is the common case between client connections;
        // not an error.
        let _ = self.tx.send(msg);
    }

    fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }
}

#[derive(Clone)]
pub struct WsRouterState {
    pub broadcaster: Broadcaster,
    pub metrics: CoreMetrics,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsRouterState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsRouterState) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = state.broadcaster.subscribe();
    state.metrics.ws_client_connected();

    // WebSocket broadcasts are fan-out only; inbound frames are drained so
    // pings/pongs/close are observed without blocking the write half.
    let drain = tokio::spawn(async move { while stream.next().await.is_some() {} });

    loop {
        match rx.recv().await {
            Ok(msg) => {
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "failed to encode ws message");
                        continue;
                    }
                };
                let len = text.len();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                state.metrics.ws_message_sent(len);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "ws client lagged, dropping skipped broadcasts");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    drain.abort();
    state.metrics.ws_client_disconnected();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_message_serializes_with_type_tag() {
        let msg = WsMessage::AlertResolved { id: "node1-cpu".to_string(), timestamp: 1000 };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"alertResolved\""));
        assert!(json.contains("\"id\":\"node1-cpu\""));
    }

    #[test]
    fn broadcaster_with_no_subscribers_does_not_panic() {
        let b = Broadcaster::new(16);
        b.send(WsMessage::UpdateProgress { instance: "pve1".to_string(), message: "polling".to_string(), timestamp: 0 });
    }

    #[tokio::test]
    async fn subscriber_receives_sent_message() {
        let b = Broadcaster::new(16);
        let mut rx = b.subscribe();
        b.send(WsMessage::UpdateProgress { instance: "pve1".to_string(), message: "polling".to_string(), timestamp: 0 });
        let received = rx.recv().await.unwrap();
        matches!(received, WsMessage::UpdateProgress { .. });
    }
}
