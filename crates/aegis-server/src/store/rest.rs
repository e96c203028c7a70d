//! PostgREST-style store backend.
//!
//! Rows map one-to-one onto the serde representation of the core types;
//! JSON-typed columns hold `details`, `indicators`, `processes`,
//! `connections` and `packet_data`. Counts use `Prefer: count=exact` with a
//! zero-length range so cardinality queries stay cheap on the wire. The
//! model blob lives base64-encoded in the single-row `ml_model` table.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::json;
use tracing::warn;

use aegis_core::event::{Event, EventKind, Incident, IncidentStatus};
use aegis_core::forensics::ForensicReport;

use super::{EventFilter, IncidentFilter, StoreError, StoreGateway, StoreStats};

pub struct RestStore {
    http: reqwest::Client,
    base: String,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| StoreError::Rejected(format!("invalid store key: {e}")))?;
        headers.insert("apikey", key.clone());
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| StoreError::Rejected(format!("invalid store key: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base)
    }

    async fn insert_row(&self, table: &str, row: serde_json::Value) -> Result<(), StoreError> {
        let response = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_ok(table, response.status())
    }

    async fn fetch_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .http
            .get(self.table_url(table))
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_ok(table, response.status())?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))
    }

    /// Exact row count without transferring rows: zero-length range plus
    /// `count=exact`, answered through the Content-Range header.
    async fn count_rows(&self, table: &str, query: &[(String, String)]) -> Result<u64, StoreError> {
        let response = self
            .http
            .get(self.table_url(table))
            .query(query)
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_ok(table, response.status())?;

        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StoreError::Malformed("missing content-range".into()))?;
        range
            .rsplit('/')
            .next()
            .and_then(|total| total.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Malformed(format!("unparseable content-range: {range}")))
    }

    async fn patch_rows(
        &self,
        table: &str,
        query: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.table_url(table))
            .query(query)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_ok(table, response.status())
    }
}

fn ensure_ok(table: &str, status: StatusCode) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        warn!(table, %status, "store request rejected");
        Err(StoreError::Rejected(format!("{table}: {status}")))
    }
}

fn eq(column: &str, value: impl ToString) -> (String, String) {
    (column.to_string(), format!("eq.{}", value.to_string()))
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn event_query(filter: &EventFilter) -> Vec<(String, String)> {
    let mut query = vec![
        ("order".to_string(), "timestamp.desc".to_string()),
        ("limit".to_string(), filter.limit.max(1).to_string()),
    ];
    if let Some(severity) = filter.severity {
        query.push(eq("severity", severity.as_str()));
    }
    if let Some(kind) = filter.kind {
        query.push(eq("type", kind.as_str()));
    }
    if let Some(ip) = &filter.source_ip {
        query.push(eq("source_ip", ip));
    }
    if let Some(from) = filter.from {
        query.push(("timestamp".to_string(), format!("gte.{}", timestamp(from))));
    }
    if let Some(to) = filter.to {
        query.push(("timestamp".to_string(), format!("lte.{}", timestamp(to))));
    }
    if let Some(flagged) = filter.flagged {
        query.push(eq("ml_flagged", flagged));
    }
    query
}

#[async_trait::async_trait]
impl StoreGateway for RestStore {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let row = serde_json::to_value(event).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.insert_row("events", row).await
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        self.fetch_rows("events", &event_query(filter)).await
    }

    async fn insert_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let row =
            serde_json::to_value(incident).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.insert_row("incidents", row).await
    }

    async fn get_incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        let rows: Vec<Incident> = self.fetch_rows("incidents", &[eq("id", id)]).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let body =
            serde_json::to_value(incident).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.patch_rows("incidents", &[eq("id", &incident.id)], body)
            .await
    }

    async fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError> {
        let mut query = vec![("order".to_string(), "created_at.desc".to_string())];
        if filter.limit > 0 {
            query.push(("limit".to_string(), filter.limit.to_string()));
        }
        if let Some(status) = filter.status {
            let status = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            query.push(eq("status", status));
        }
        if let Some(severity) = filter.severity {
            query.push(eq("severity", severity.as_str()));
        }
        self.fetch_rows("incidents", &query).await
    }

    async fn insert_report(&self, report: &ForensicReport) -> Result<(), StoreError> {
        let row =
            serde_json::to_value(report).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.insert_row("forensic_reports", row).await
    }

    async fn get_report(&self, incident_id: &str) -> Result<Option<ForensicReport>, StoreError> {
        let rows: Vec<ForensicReport> = self
            .fetch_rows("forensic_reports", &[eq("incident_id", incident_id)])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_report(&self, report: &ForensicReport) -> Result<(), StoreError> {
        let body =
            serde_json::to_value(report).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.patch_rows("forensic_reports", &[eq("id", &report.id)], body)
            .await
    }

    async fn list_reports(&self, limit: usize) -> Result<Vec<ForensicReport>, StoreError> {
        let query = vec![
            ("order".to_string(), "captured_at.desc".to_string()),
            ("limit".to_string(), limit.max(1).to_string()),
        ];
        self.fetch_rows("forensic_reports", &query).await
    }

    async fn save_model_blob(&self, blob: &[u8]) -> Result<(), StoreError> {
        let row = json!({
            "id": 1,
            "blob": base64::engine::general_purpose::STANDARD.encode(blob),
            "trained_at": timestamp(Utc::now()),
        });
        let response = self
            .http
            .post(self.table_url("ml_model"))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_ok("ml_model", response.status())
    }

    async fn load_model_blob(&self) -> Result<Option<Vec<u8>>, StoreError> {
        #[derive(serde::Deserialize)]
        struct ModelRow {
            blob: String,
        }
        let rows: Vec<ModelRow> = self.fetch_rows("ml_model", &[eq("id", 1)]).await?;
        match rows.into_iter().next() {
            None => Ok(None),
            Some(row) => base64::engine::general_purpose::STANDARD
                .decode(row.blob)
                .map(Some)
                .map_err(|e| StoreError::Malformed(format!("model blob not base64: {e}"))),
        }
    }

    async fn count_events(&self) -> Result<u64, StoreError> {
        self.count_rows("events", &[]).await
    }

    async fn count_events_with_type(&self, kind: EventKind) -> Result<u64, StoreError> {
        self.count_rows("events", &[eq("type", kind.as_str())]).await
    }

    async fn count_events_with_source(&self, ip: &str) -> Result<u64, StoreError> {
        self.count_rows("events", &[eq("source_ip", ip)]).await
    }

    async fn count_events_since(
        &self,
        ip: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.count_rows(
            "events",
            &[
                eq("source_ip", ip),
                ("timestamp".to_string(), format!("gt.{}", timestamp(cutoff))),
            ],
        )
        .await
    }

    async fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let active = serde_json::to_value(IncidentStatus::Active)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Ok(StoreStats {
            total_events: self.count_rows("events", &[]).await?,
            total_incidents: self.count_rows("incidents", &[]).await?,
            active_incidents: self.count_rows("incidents", &[eq("status", active)]).await?,
            ml_flagged: self
                .count_rows("events", &[eq("ml_flagged", true)])
                .await?,
        })
    }

    async fn mark_device_isolated(
        &self,
        device_id: &str,
        source_ip: &str,
    ) -> Result<(), StoreError> {
        self.insert_row(
            "devices",
            json!({
                "device_id": device_id,
                "source_ip": source_ip,
                "isolated": true,
                "isolated_at": timestamp(Utc::now()),
            }),
        )
        .await
    }

    async fn log_audit(&self, action: &str, detail: &str) -> Result<(), StoreError> {
        self.insert_row(
            "audit_log",
            json!({
                "action": action,
                "detail": detail,
                "timestamp": timestamp(Utc::now()),
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_query_builds_filters() {
        let mut filter = EventFilter::with_limit(50);
        filter.severity = Some(aegis_core::event::Severity::High);
        filter.kind = Some(EventKind::NetworkEvent);
        filter.flagged = Some(true);

        let query = event_query(&filter);
        assert!(query.contains(&("limit".to_string(), "50".to_string())));
        assert!(query.contains(&("severity".to_string(), "eq.high".to_string())));
        assert!(query.contains(&("type".to_string(), "eq.network_event".to_string())));
        assert!(query.contains(&("ml_flagged".to_string(), "eq.true".to_string())));
    }

    #[test]
    fn test_store_requires_valid_key() {
        assert!(RestStore::new("https://store.example", "valid-key").is_ok());
        assert!(RestStore::new("https://store.example", "bad\nkey").is_err());
    }
}
