//! Event and incident envelopes shared across the pipeline.
//!
//! Events are immutable observations from a telemetry source. The `details`
//! payload stays a sparse JSON map so fields injected by operators or future
//! sensors round-trip through the store and broadcasts without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The four telemetry families emitted by sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OsEvent,
    LoginEvent,
    ProcessEvent,
    NetworkEvent,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::OsEvent,
        EventKind::LoginEvent,
        EventKind::ProcessEvent,
        EventKind::NetworkEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OsEvent => "os_event",
            EventKind::LoginEvent => "login_event",
            EventKind::ProcessEvent => "process_event",
            EventKind::NetworkEvent => "network_event",
        }
    }
}

/// Severity levels, ordered so that `Critical` compares greatest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Position on the [0, 1] scale used by the feature deriver.
    pub fn score(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

/// Threat classifications produced by the rule engine and ML escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    Bruteforce,
    PortScan,
    Malware,
    Ddos,
    SqlInjection,
    Exfiltration,
    PrivilegeEscalation,
    MlAnomaly,
    MaliciousTraffic,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Bruteforce => "bruteforce",
            ThreatType::PortScan => "port_scan",
            ThreatType::Malware => "malware",
            ThreatType::Ddos => "ddos",
            ThreatType::SqlInjection => "sql_injection",
            ThreatType::Exfiltration => "exfiltration",
            ThreatType::PrivilegeEscalation => "privilege_escalation",
            ThreatType::MlAnomaly => "ml_anomaly",
            ThreatType::MaliciousTraffic => "malicious_traffic",
        }
    }
}

/// Lifecycle of a materialized incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Active,
    Investigating,
    Resolved,
}

/// Store-backed feature context attached to an event during enrichment so
/// scoring can run without re-querying the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FeatureContext {
    pub type_rarity: f64,
    pub ip_rarity: f64,
    pub event_frequency: f64,
    pub payload_entropy: f64,
}

/// A single telemetry observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub source_ip: String,
    pub severity: Severity,
    pub details: Map<String, Value>,
    #[serde(default)]
    pub anomaly_score: f64,
    #[serde(default)]
    pub ml_flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_context: Option<FeatureContext>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        source_ip: impl Into<String>,
        severity: Severity,
        details: Map<String, Value>,
    ) -> Self {
        Self {
            id: generate_id(),
            timestamp: Utc::now(),
            kind,
            source_ip: source_ip.into(),
            severity,
            details,
            anomaly_score: 0.0,
            ml_flagged: false,
            ml_context: None,
        }
    }

    /// String-valued detail, if present.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Numeric detail coerced to u64; accepts integer JSON numbers only.
    pub fn detail_u64(&self, key: &str) -> Option<u64> {
        self.details.get(key).and_then(Value::as_u64)
    }

    pub fn detail_bool(&self, key: &str) -> Option<bool> {
        self.details.get(key).and_then(Value::as_bool)
    }

    /// The details map rendered as a JSON string, used for entropy and
    /// pattern matching.
    pub fn details_string(&self) -> String {
        serde_json::to_string(&self.details).unwrap_or_default()
    }
}

/// A materialized detection bound to one triggering event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub description: String,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub event_id: String,
    pub source_ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub status: IncidentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

/// 16-hex-character opaque identifier derived from a timestamp+nonce digest.
pub fn generate_id() -> String {
    let seed = format!("{}{}", Utc::now().to_rfc3339(), uuid::Uuid::new_v4());
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(seed.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_generated_id_format() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn test_event_round_trips_unknown_details() {
        let mut details = Map::new();
        details.insert("port".into(), Value::from(443u64));
        details.insert("custom_tag".into(), Value::from("opaque"));
        let event = Event::new(EventKind::NetworkEvent, "10.0.0.9", Severity::Low, details);

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.detail_u64("port"), Some(443));
        assert_eq!(back.detail_str("custom_tag"), Some("opaque"));
        assert_eq!(back.kind, EventKind::NetworkEvent);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::LoginEvent).unwrap();
        assert_eq!(json, "\"login_event\"");
        let json = serde_json::to_string(&ThreatType::SqlInjection).unwrap();
        assert_eq!(json, "\"sql_injection\"");
    }
}
