//! Live fan-out to WebSocket subscribers.
//!
//! The hub keeps the subscriber set behind a single mutex. Broadcast
//! serializes the envelope once and pushes it into each subscriber's
//! unbounded channel; a failed push means the session is gone and evicts
//! the subscriber. Delivery is best-effort and unordered across
//! subscribers, in-order within one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::metrics;

/// Message kinds delivered to subscribers. The wire envelope carries the
/// snake form in `type` and the uppercase legacy alias in `event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    NewEvent,
    NewIncident,
    CriticalAlert,
    IncidentResolved,
    IncidentUpdated,
    DeviceQuarantined,
}

impl BroadcastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastKind::NewEvent => "new_event",
            BroadcastKind::NewIncident => "new_incident",
            BroadcastKind::CriticalAlert => "critical_alert",
            BroadcastKind::IncidentResolved => "incident_resolved",
            BroadcastKind::IncidentUpdated => "incident_updated",
            BroadcastKind::DeviceQuarantined => "device_quarantined",
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// The set of live subscriber send-handles.
#[derive(Default)]
pub struct Hub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a subscriber; the returned receiver yields serialized frames.
    pub fn connect(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.push(Subscriber { id, tx });
        metrics::SUBSCRIBERS.set(subscribers.len() as f64);
        info!(subscriber = id, total = subscribers.len(), "subscriber connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.id != id);
        metrics::SUBSCRIBERS.set(subscribers.len() as f64);
        info!(subscriber = id, total = subscribers.len(), "subscriber disconnected");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Serialize once and deliver to every subscriber; evict on failed send.
    pub fn broadcast(&self, kind: BroadcastKind, data: Value) {
        let payload = json!({
            "type": kind.as_str(),
            "event": kind.as_str().to_uppercase(),
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string();

        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|s| s.tx.send(payload.clone()).is_ok());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            metrics::SUBSCRIBERS.set(subscribers.len() as f64);
            debug!(dropped, "evicted dead subscribers during broadcast");
        }
        metrics::BROADCASTS_TOTAL.inc();
    }
}
