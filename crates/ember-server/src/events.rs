//! State-change event fan-out
//!
//! One background worker drains a bounded channel and POSTs each event to
//! every enabled webhook sink whose filter matches. Delivery is
//! best-effort and at-most-once: non-2xx and transport errors are logged,
//! never retried, and a full queue drops the newest event rather than
//! ever blocking the provisioning path.

use crate::safenet::SafeClient;
use crate::store::{Store, System, Webhook};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Queue capacity; overflow drops the newest event
pub const QUEUE_CAPACITY: usize = 100;

/// Per-delivery timeout
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// An event as delivered to sinks
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl Event {
    /// Event for a machine entering `state`
    pub fn system(sys: &System, state: &str) -> Self {
        Self {
            event_type: format!("system.{}", state),
            timestamp: now_rfc3339(),
            data: serde_json::json!({
                "id": sys.id,
                "mac": sys.mac,
                "hostname": sys.hostname,
                "ip_addr": sys.ip_addr,
                "state": state,
            }),
        }
    }

    /// Event used by the operator "test delivery" path
    pub fn test() -> Self {
        Self {
            event_type: "test".to_string(),
            timestamp: now_rfc3339(),
            data: serde_json::json!({ "message": "test event" }),
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Error type for synchronous test deliveries
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] crate::safenet::SafenetError),

    #[error("sink returned HTTP {0}")]
    Status(u16),
}

/// Cheap-clone handle for firing events
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Enqueue an event. Returns immediately; a full queue drops the
    /// event with a log line.
    pub fn fire(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event_type = %event.event_type, "event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(event_type = %event.event_type, "event dispatcher stopped, dropping event");
            }
        }
    }
}

/// The dispatcher worker; owns the receiving end of the queue
pub struct EventDispatcher {
    store: Store,
    rx: mpsc::Receiver<Event>,
}

/// Create the fire handle and its worker
pub fn channel(store: Store) -> (EventSender, EventDispatcher) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (EventSender { tx }, EventDispatcher { store, rx })
}

impl EventDispatcher {
    /// Pop one queued event without delivering it. Lets tests and
    /// diagnostics observe the queue.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Run until shutdown; drains whatever is already queued before
    /// exiting.
    pub async fn run(mut self, shutdown: tokio::sync::watch::Receiver<bool>) {
        let client = SafeClient::new(DELIVERY_TIMEOUT);
        let mut shutdown = shutdown;

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.dispatch(&client, event).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Bounded drain: deliver what is already queued
                        while let Ok(event) = self.rx.try_recv() {
                            self.dispatch(&client, event).await;
                        }
                        info!("event dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, client: &SafeClient, event: Event) {
        let sinks = match self.store.list_enabled_webhooks().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to list webhook sinks");
                return;
            }
        };

        let body = match serde_json::to_vec(&event) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize event");
                return;
            }
        };

        for sink in sinks {
            if !matches_filter(&sink.events, &event.event_type) {
                continue;
            }
            if let Err(e) = deliver(client, &sink, &body).await {
                warn!(url = %sink.url, error = %e, "webhook delivery failed");
            } else {
                debug!(url = %sink.url, event_type = %event.event_type, "webhook delivered");
            }
        }
    }
}

/// Deliver one event body to one sink
async fn deliver(client: &SafeClient, sink: &Webhook, body: &[u8]) -> Result<(), DeliveryError> {
    let mut headers = Vec::new();
    if !sink.secret.is_empty() {
        headers.push(("X-Webhook-Signature", sign_body(&sink.secret, body)));
    }

    let resp = client.post_json(&sink.url, body.to_vec(), &headers).await?;
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(DeliveryError::Status(status.as_u16()));
    }
    Ok(())
}

/// Synchronous single delivery for the operator test endpoint; the
/// delivery error propagates to the caller.
pub async fn deliver_single(sink: &Webhook, event: Event) -> Result<(), DeliveryError> {
    let client = SafeClient::new(DELIVERY_TIMEOUT);
    let body = serde_json::to_vec(&event)?;
    deliver(&client, sink, &body).await
}

/// hex(HMAC-SHA256(secret, body))
fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// `*` matches everything; otherwise membership in the comma list
fn matches_filter(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    pattern.split(',').any(|p| p.trim() == event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_system() -> System {
        System {
            id: 7,
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
            hostname: "node01".to_string(),
            image_id: None,
            profile_id: None,
            vars: "{}".to_string(),
            ip_addr: "10.0.0.7".to_string(),
            last_seen_at: String::new(),
            state: "queued".to_string(),
            state_changed_at: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_event_shape() {
        let event = Event::system(&test_system(), "provisioning");
        assert_eq!(event.event_type, "system.provisioning");
        assert_eq!(event.data["id"], 7);
        assert_eq!(event.data["mac"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(event.data["hostname"], "node01");
        assert_eq!(event.data["ip_addr"], "10.0.0.7");
        assert_eq!(event.data["state"], "provisioning");

        // Timestamp is RFC3339 UTC with Z suffix
        assert!(event.timestamp.ends_with('Z'));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "system.provisioning");
    }

    #[test]
    fn test_filter_matching() {
        assert!(matches_filter("*", "system.ready"));
        assert!(matches_filter("system.ready", "system.ready"));
        assert!(matches_filter("system.failed, system.ready", "system.ready"));
        assert!(!matches_filter("system.failed", "system.ready"));
        assert!(!matches_filter("", "system.ready"));
    }

    #[test]
    fn test_body_signature() {
        // Stable reference value so the wire contract can't drift
        let sig = sign_body("secret", b"payload");
        assert_eq!(sig.len(), 64);
        assert_eq!(
            sig,
            "b82fcb791acec57859b989b430a826488ce2e479fdf92326bd0a2e8375a42ba4"
        );
    }

    #[tokio::test]
    async fn test_fire_never_blocks_on_full_queue() {
        let store = Store::open_in_memory().await.unwrap();
        // Keep the dispatcher parked so the queue fills
        let (sender, _dispatcher) = channel(store);

        for _ in 0..(QUEUE_CAPACITY + 10) {
            // try_send semantics: returns immediately even when full
            sender.fire(Event::test());
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_newest_not_oldest() {
        let store = Store::open_in_memory().await.unwrap();
        let (sender, mut dispatcher) = channel(store);

        for i in 0..(QUEUE_CAPACITY + 5) {
            let mut event = Event::test();
            event.event_type = format!("test.{}", i);
            sender.fire(event);
        }

        // The first QUEUE_CAPACITY events are still there, in order
        for i in 0..QUEUE_CAPACITY {
            let event = dispatcher.rx.try_recv().unwrap();
            assert_eq!(event.event_type, format!("test.{}", i));
        }
        assert!(dispatcher.rx.try_recv().is_err());
    }
}
