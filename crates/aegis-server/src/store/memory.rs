//! In-process store backend.
//!
//! Serves the full gateway surface from mutex-guarded vectors. Counts are
//! linear scans, which is cheap at in-memory scale and keeps the backend
//! dependency-free for standalone and test runs.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aegis_core::event::{Event, EventKind, Incident, IncidentStatus};
use aegis_core::forensics::ForensicReport;

use super::{EventFilter, IncidentFilter, StoreError, StoreGateway, StoreStats};

#[derive(Debug, Clone)]
struct DeviceRow {
    device_id: String,
    source_ip: String,
    isolated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
#[allow(dead_code)] // audit rows are write-mostly; read by operators out of band
struct AuditRow {
    action: String,
    detail: String,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    incidents: Vec<Incident>,
    reports: Vec<ForensicReport>,
    model_blob: Option<Vec<u8>>,
    devices: Vec<DeviceRow>,
    audit: Vec<AuditRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices currently marked isolated, newest first.
    pub fn isolated_devices(&self) -> Vec<(String, String, DateTime<Utc>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .devices
            .iter()
            .rev()
            .map(|d| (d.device_id.clone(), d.source_ip.clone(), d.isolated_at))
            .collect()
    }
}

fn matches_event(event: &Event, filter: &EventFilter) -> bool {
    if let Some(severity) = filter.severity {
        if event.severity != severity {
            return false;
        }
    }
    if let Some(kind) = filter.kind {
        if event.kind != kind {
            return false;
        }
    }
    if let Some(ip) = &filter.source_ip {
        if &event.source_ip != ip {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if event.timestamp < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if event.timestamp > to {
            return false;
        }
    }
    if let Some(flagged) = filter.flagged {
        if event.ml_flagged != flagged {
            return false;
        }
    }
    true
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        self.inner.lock().unwrap().events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| matches_event(e, filter))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(filter.limit.max(1));
        Ok(events)
    }

    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        self.inner.lock().unwrap().incidents.push(incident.clone());
        Ok(())
    }

    async fn get_incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.incidents.iter().find(|i| i.id == id).cloned())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(existing) => {
                *existing = incident.clone();
                Ok(())
            }
            None => Err(StoreError::Rejected(format!(
                "unknown incident {}",
                incident.id
            ))),
        }
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut incidents: Vec<Incident> = inner
            .incidents
            .iter()
            .filter(|i| filter.status.map_or(true, |s| i.status == s))
            .filter(|i| filter.severity.map_or(true, |s| i.severity == s))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            incidents.truncate(filter.limit);
        }
        Ok(incidents)
    }

    async fn insert_report(&self, report: &ForensicReport) -> Result<(), StoreError> {
        self.inner.lock().unwrap().reports.push(report.clone());
        Ok(())
    }

    async fn get_report(&self, incident_id: &str) -> Result<Option<ForensicReport>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .reports
            .iter()
            .find(|r| r.incident_id == incident_id)
            .cloned())
    }

    async fn update_report(&self, report: &ForensicReport) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.reports.iter_mut().find(|r| r.id == report.id) {
            Some(existing) => {
                *existing = report.clone();
                Ok(())
            }
            None => Err(StoreError::Rejected(format!("unknown report {}", report.id))),
        }
    }

    async fn list_reports(&self, limit: usize) -> Result<Vec<ForensicReport>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut reports: Vec<ForensicReport> = inner.reports.clone();
        reports.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        reports.truncate(limit.max(1));
        Ok(reports)
    }

    async fn save_model_blob(&self, blob: &[u8]) -> Result<(), StoreError> {
        self.inner.lock().unwrap().model_blob = Some(blob.to_vec());
        Ok(())
    }

    async fn load_model_blob(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap().model_blob.clone())
    }

    async fn count_events(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().unwrap().events.len() as u64)
    }

    async fn count_events_with_type(&self, kind: EventKind) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.events.iter().filter(|e| e.kind == kind).count() as u64)
    }

    async fn count_events_with_source(&self, ip: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.events.iter().filter(|e| e.source_ip == ip).count() as u64)
    }

    async fn count_events_since(
        &self,
        ip: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.source_ip == ip && e.timestamp > cutoff)
            .count() as u64)
    }

    async fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(StoreStats {
            total_events: inner.events.len() as u64,
            total_incidents: inner.incidents.len() as u64,
            active_incidents: inner
                .incidents
                .iter()
                .filter(|i| i.status == IncidentStatus::Active)
                .count() as u64,
            ml_flagged: inner.events.iter().filter(|e| e.ml_flagged).count() as u64,
        })
    }

    async fn mark_device_isolated(
        &self,
        device_id: &str,
        source_ip: &str,
    ) -> Result<(), StoreError> {
        self.inner.lock().unwrap().devices.push(DeviceRow {
            device_id: device_id.to_string(),
            source_ip: source_ip.to_string(),
            isolated_at: Utc::now(),
        });
        Ok(())
    }

    async fn log_audit(&self, action: &str, detail: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().audit.push(AuditRow {
            action: action.to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::event::{Severity, ThreatType};
    use serde_json::Map;

    fn event(kind: EventKind, ip: &str, flagged: bool) -> Event {
        let mut e = Event::new(kind, ip, Severity::Low, Map::new());
        e.ml_flagged = flagged;
        e
    }

    fn incident(id: &str, status: IncidentStatus) -> Incident {
        Incident {
            id: id.to_string(),
            threat_type: ThreatType::Bruteforce,
            severity: Severity::High,
            description: "test".into(),
            confidence: 0.8,
            indicators: vec![],
            event_id: "event0000000000a".into(),
            source_ip: "10.0.0.1".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
            status,
            resolution_notes: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn test_counts_and_stats() {
        let store = MemoryStore::new();
        store
            .insert_event(&event(EventKind::LoginEvent, "10.0.0.1", false))
            .await
            .unwrap();
        store
            .insert_event(&event(EventKind::LoginEvent, "10.0.0.1", true))
            .await
            .unwrap();
        store
            .insert_event(&event(EventKind::NetworkEvent, "10.0.0.2", false))
            .await
            .unwrap();

        assert_eq!(store.count_events().await.unwrap(), 3);
        assert_eq!(
            store
                .count_events_with_type(EventKind::LoginEvent)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store.count_events_with_source("10.0.0.1").await.unwrap(),
            2
        );

        store
            .insert_incident(&incident("incident00000001", IncidentStatus::Active))
            .await
            .unwrap();
        store
            .insert_incident(&incident("incident00000002", IncidentStatus::Resolved))
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.total_incidents, 2);
        assert_eq!(stats.active_incidents, 1);
        assert_eq!(stats.ml_flagged, 1);
    }

    #[tokio::test]
    async fn test_event_filters() {
        let store = MemoryStore::new();
        store
            .insert_event(&event(EventKind::LoginEvent, "10.0.0.1", true))
            .await
            .unwrap();
        store
            .insert_event(&event(EventKind::NetworkEvent, "10.0.0.2", false))
            .await
            .unwrap();

        let mut filter = EventFilter::with_limit(100);
        filter.flagged = Some(true);
        let events = store.list_events(&filter).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].ml_flagged);

        let mut filter = EventFilter::with_limit(100);
        filter.kind = Some(EventKind::NetworkEvent);
        filter.source_ip = Some("10.0.0.2".to_string());
        assert_eq!(store.list_events(&filter).await.unwrap().len(), 1);

        let mut filter = EventFilter::with_limit(100);
        filter.source_ip = Some("10.9.9.9".to_string());
        assert!(store.list_events(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_incident_rejected() {
        let store = MemoryStore::new();
        let result = store
            .update_incident(&incident("missing0000000ab", IncidentStatus::Active))
            .await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_model_blob_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load_model_blob().await.unwrap().is_none());
        store.save_model_blob(&[1, 2, 3]).await.unwrap();
        assert_eq!(store.load_model_blob().await.unwrap().unwrap(), vec![1, 2, 3]);
        // Replaced in place on retrain.
        store.save_model_blob(&[9, 9]).await.unwrap();
        assert_eq!(store.load_model_blob().await.unwrap().unwrap(), vec![9, 9]);
    }
}
