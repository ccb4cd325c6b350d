//! Live result-notification channel
//!
//! One subscriber set per payment id. A new subscriber immediately receives
//! the cached result when one exists; every published update fans out to the
//! current subscriber snapshot. Subscribers whose channel is gone are pruned
//! on the next publish.

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Subscriber = mpsc::UnboundedSender<String>;

/// Per-payment WebSocket subscriber registry.
#[derive(Default)]
pub struct WsManager {
    clients: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl WsManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber channel for a payment.
    pub fn subscribe(&self, payment_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.write().expect("ws clients poisoned");
        clients.entry(payment_id.to_string()).or_default().push(tx);
        info!(payment_id, "websocket client subscribed");
        rx
    }

    /// Publish a result to every subscriber of a payment.
    ///
    /// Delivery is at-most-once per subscriber per publish; per-subscriber
    /// ordering follows publish order. Dead subscribers are dropped.
    pub fn notify<T: Serialize>(&self, payment_id: &str, result: &T) {
        let message = match serde_json::to_string(result) {
            Ok(json) => json,
            Err(e) => {
                warn!(payment_id, error = %e, "failed to serialize notification");
                return;
            }
        };

        let mut clients = self.clients.write().expect("ws clients poisoned");
        let Some(subscribers) = clients.get_mut(payment_id) else {
            return;
        };

        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        if subscribers.is_empty() {
            clients.remove(payment_id);
        }
    }

    /// Subscribers currently attached to a payment.
    pub fn subscriber_count(&self, payment_id: &str) -> usize {
        self.clients
            .read()
            .expect("ws clients poisoned")
            .get(payment_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drive one accepted WebSocket until the client disconnects.
    ///
    /// `cached` is pushed first when present, so late subscribers observe the
    /// last known result before any live updates.
    pub async fn run_socket(&self, socket: WebSocket, payment_id: String, cached: Option<String>) {
        let (mut sink, mut stream) = socket.split();

        if let Some(result) = cached {
            use futures::SinkExt;
            if sink.send(Message::Text(result)).await.is_err() {
                debug!(payment_id, "client went away before cached push");
                return;
            }
            debug!(payment_id, "pushed cached result to new subscriber");
        }

        let mut rx = self.subscribe(&payment_id);

        loop {
            tokio::select! {
                update = rx.recv() => {
                    use futures::SinkExt;
                    match update {
                        Some(json) => {
                            if sink.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        // inbound frames are ignored; the channel is push-only
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        // receiver drops here; the sender side is pruned on the next publish
        info!(payment_id, "websocket client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_result() {
        let manager = WsManager::new();
        let mut rx = manager.subscribe("pay_1");

        manager.notify("pay_1", &serde_json::json!({"status": "SUCCESS"}));
        let received = rx.recv().await.unwrap();
        assert!(received.contains("SUCCESS"));
    }

    #[tokio::test]
    async fn publish_order_is_preserved_per_subscriber() {
        let manager = WsManager::new();
        let mut rx = manager.subscribe("pay_1");

        manager.notify("pay_1", &serde_json::json!({"seq": 1}));
        manager.notify("pay_1", &serde_json::json!({"seq": 2}));
        manager.notify("pay_1", &serde_json::json!({"seq": 3}));

        assert!(rx.recv().await.unwrap().contains("1"));
        assert!(rx.recv().await.unwrap().contains("2"));
        assert!(rx.recv().await.unwrap().contains("3"));
    }

    #[tokio::test]
    async fn notifications_are_scoped_to_the_payment() {
        let manager = WsManager::new();
        let mut rx1 = manager.subscribe("pay_1");
        let mut rx2 = manager.subscribe("pay_2");

        manager.notify("pay_1", &serde_json::json!({"status": "SUCCESS"}));
        assert!(rx1.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_publish() {
        let manager = WsManager::new();
        let rx = manager.subscribe("pay_1");
        assert_eq!(manager.subscriber_count("pay_1"), 1);

        drop(rx);
        manager.notify("pay_1", &serde_json::json!({"status": "SUCCESS"}));
        assert_eq!(manager.subscriber_count("pay_1"), 0);
    }

    #[tokio::test]
    async fn fanout_reaches_every_subscriber() {
        let manager = WsManager::new();
        let mut rx1 = manager.subscribe("pay_1");
        let mut rx2 = manager.subscribe("pay_1");

        manager.notify("pay_1", &serde_json::json!({"status": "FAILED"}));
        assert!(rx1.recv().await.unwrap().contains("FAILED"));
        assert!(rx2.recv().await.unwrap().contains("FAILED"));
    }
}
