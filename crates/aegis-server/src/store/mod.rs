//! Typed gateway over the external relational store.
//!
//! Two backends implement the same facade: `RestStore` speaks to a
//! PostgREST-style API, `MemoryStore` keeps everything in-process and is
//! selected when no store URL is configured (and by the test suite). All
//! operations are best-effort: failures surface as recoverable
//! `StoreError`s and are logged at the call site, never panicked on.
//!
//! The gateway also implements the model's narrow `CountProvider`
//! interface, which keeps the model decoupled from the full store surface.

mod memory;
mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aegis_core::event::{Event, EventKind, Incident, IncidentStatus, Severity};
use aegis_core::forensics::ForensicReport;
use aegis_core::ml::features::CountProvider;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected operation: {0}")]
    Rejected(String),
    #[error("store payload malformed: {0}")]
    Malformed(String),
}

/// Filters for the event listing surface. `limit` is clamped to 1..=500 by
/// the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub limit: usize,
    pub severity: Option<Severity>,
    pub kind: Option<EventKind>,
    pub source_ip: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub flagged: Option<bool>,
}

impl EventFilter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub limit: usize,
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_events: u64,
    pub total_incidents: u64,
    pub active_incidents: u64,
    pub ml_flagged: u64,
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError>;
    async fn get_incident(&self, id: &str) -> Result<Option<Incident>, StoreError>;
    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError>;
    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError>;

    async fn insert_report(&self, report: &ForensicReport) -> Result<(), StoreError>;
    /// Reports are keyed by the incident they belong to.
    async fn get_report(&self, incident_id: &str) -> Result<Option<ForensicReport>, StoreError>;
    async fn update_report(&self, report: &ForensicReport) -> Result<(), StoreError>;
    async fn list_reports(&self, limit: usize) -> Result<Vec<ForensicReport>, StoreError>;

    /// Single-row model blob, replaced in place on retrain.
    async fn save_model_blob(&self, blob: &[u8]) -> Result<(), StoreError>;
    async fn load_model_blob(&self) -> Result<Option<Vec<u8>>, StoreError>;

    async fn count_events(&self) -> Result<u64, StoreError>;
    async fn count_events_with_type(&self, kind: EventKind) -> Result<u64, StoreError>;
    async fn count_events_with_source(&self, ip: &str) -> Result<u64, StoreError>;
    async fn count_events_since(
        &self,
        ip: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn get_stats(&self) -> Result<StoreStats, StoreError>;

    async fn mark_device_isolated(
        &self,
        device_id: &str,
        source_ip: &str,
    ) -> Result<(), StoreError>;
    async fn log_audit(&self, action: &str, detail: &str) -> Result<(), StoreError>;
}

/// The feature deriver sees the gateway only through this counting lens;
/// backend failures degrade to `None` so enrichment falls back to neutral
/// feature values instead of failing the pipeline.
#[async_trait]
impl CountProvider for dyn StoreGateway {
    async fn total_events(&self) -> Option<u64> {
        self.count_events().await.ok()
    }

    async fn events_with_type(&self, kind: EventKind) -> Option<u64> {
        self.count_events_with_type(kind).await.ok()
    }

    async fn events_with_source(&self, ip: &str) -> Option<u64> {
        self.count_events_with_source(ip).await.ok()
    }

    async fn events_since(&self, ip: &str, cutoff: DateTime<Utc>) -> Option<u64> {
        self.count_events_since(ip, cutoff).await.ok()
    }
}
