//! Automated response executor.
//!
//! Five advisory actions triggered by critical incidents or invoked
//! manually by operators. Nothing here enforces anything on a real host:
//! isolation and quarantine are ledgers plus store rows, session
//! revocation reaches the identity provider's admin surface only when one
//! is configured. Every action appends to a bounded in-memory action log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use aegis_core::event::{Event, Incident, Severity, ThreatType};
use aegis_core::forensics::HostInspector;

use crate::auth::IdentityClient;
use crate::hub::{BroadcastKind, Hub};
use crate::metrics;
use crate::store::StoreGateway;

/// Entries kept in the action log before the oldest are dropped.
const ACTION_LOG_CAPACITY: usize = 500;

/// Outcome of a single response action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action: &'static str,
    pub incident_id: String,
    pub target: String,
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineEntry {
    pub device_id: String,
    pub source_ip: String,
    pub incident_id: String,
    pub quarantined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IsolationEntry {
    pub pid: u32,
    pub incident_id: String,
    pub isolated_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Default)]
struct Ledger {
    action_log: Vec<ActionRecord>,
    isolated_processes: HashMap<u32, IsolationEntry>,
    quarantined_devices: HashMap<String, QuarantineEntry>,
    revoked_sessions: Vec<String>,
    escalated_incidents: Vec<String>,
}

impl Ledger {
    fn push(&mut self, record: ActionRecord) {
        if self.action_log.len() >= ACTION_LOG_CAPACITY {
            self.action_log.remove(0);
        }
        self.action_log.push(record);
    }
}

pub struct ResponseEngine {
    store: Arc<dyn StoreGateway>,
    hub: Arc<Hub>,
    inspector: Arc<dyn HostInspector>,
    identity: Option<Arc<IdentityClient>>,
    alert_recipients: Vec<String>,
    ledger: Mutex<Ledger>,
}

impl ResponseEngine {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        hub: Arc<Hub>,
        inspector: Arc<dyn HostInspector>,
        identity: Option<Arc<IdentityClient>>,
        alert_recipients: Vec<String>,
    ) -> Self {
        Self {
            store,
            hub,
            inspector,
            identity,
            alert_recipients,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Dispatch the automated response for a materialized incident.
    ///
    /// Critical incidents always escalate and email; threat-kind branches
    /// add the targeted action.
    pub async fn execute(&self, incident: &Incident, event: &Event) -> Vec<ActionRecord> {
        let mut actions = Vec::new();

        if incident.severity == Severity::Critical {
            actions.push(self.escalate_notification(
                &incident.id,
                incident.severity,
                incident.threat_type,
            ));
            actions.push(self.send_alert_email(incident));
        }

        match incident.threat_type {
            ThreatType::Malware => {
                if let Some(pid) = event.detail_u64("pid") {
                    actions.push(
                        self.isolate_process(pid as u32, &incident.id, "Malware detected")
                            .await,
                    );
                }
            }
            ThreatType::Bruteforce => {
                let ip = incident.source_ip.clone();
                actions.push(
                    self.quarantine_device(&format!("device_{ip}"), &ip, &incident.id)
                        .await,
                );
            }
            ThreatType::PrivilegeEscalation => {
                let user = event
                    .detail_str("user")
                    .map(str::to_string)
                    .or_else(|| {
                        event
                            .detail_str("user_change")
                            .and_then(|c| c.split_once("->"))
                            .map(|(from, _)| from.trim().to_string())
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                actions.push(self.revoke_user_session(&user, &incident.id).await);
            }
            _ => {}
        }

        info!(
            incident = %incident.id,
            actions = actions.len(),
            "response executed"
        );
        actions
    }

    /// Mark a process isolated. Advisory: the process is looked up through
    /// the host inspector but never terminated.
    pub async fn isolate_process(
        &self,
        pid: u32,
        incident_id: &str,
        reason: &str,
    ) -> ActionRecord {
        let process = self.inspector.processes().into_iter().find(|p| p.pid == pid);
        let message = match &process {
            Some(p) => format!("Process {pid} ({}) marked for isolation", p.name),
            None => format!("Process {pid} does not exist"),
        };

        let mut ledger = self.ledger.lock().unwrap();
        ledger.isolated_processes.insert(
            pid,
            IsolationEntry {
                pid,
                incident_id: incident_id.to_string(),
                isolated_at: Utc::now(),
                reason: reason.to_string(),
            },
        );
        let record = ActionRecord {
            action: "isolate_process",
            incident_id: incident_id.to_string(),
            target: pid.to_string(),
            status: "success".to_string(),
            message,
            timestamp: Utc::now(),
        };
        ledger.push(record.clone());
        drop(ledger);

        metrics::RESPONSE_ACTIONS_TOTAL.inc();
        info!(pid, incident = incident_id, "process isolation recorded");
        record
    }

    /// Persist a quarantine row for the device and announce it.
    pub async fn quarantine_device(
        &self,
        device_id: &str,
        source_ip: &str,
        incident_id: &str,
    ) -> ActionRecord {
        let (status, message) = match self.store.mark_device_isolated(device_id, source_ip).await {
            Ok(()) => (
                "quarantined".to_string(),
                format!("Device {device_id} ({source_ip}) has been quarantined"),
            ),
            Err(e) => {
                error!(device = device_id, error = %e, "device quarantine store write failed");
                ("error".to_string(), e.to_string())
            }
        };

        let mut ledger = self.ledger.lock().unwrap();
        ledger.quarantined_devices.insert(
            device_id.to_string(),
            QuarantineEntry {
                device_id: device_id.to_string(),
                source_ip: source_ip.to_string(),
                incident_id: incident_id.to_string(),
                quarantined_at: Utc::now(),
            },
        );
        let record = ActionRecord {
            action: "quarantine_device",
            incident_id: incident_id.to_string(),
            target: device_id.to_string(),
            status,
            message,
            timestamp: Utc::now(),
        };
        ledger.push(record.clone());
        drop(ledger);

        self.hub.broadcast(
            BroadcastKind::DeviceQuarantined,
            json!({
                "device_id": device_id,
                "source_ip": source_ip,
                "incident_id": incident_id,
            }),
        );
        metrics::RESPONSE_ACTIONS_TOTAL.inc();
        info!(device = device_id, ip = source_ip, "device quarantined");
        record
    }

    /// Append to the revocation ledger; the identity provider's admin
    /// surface is only reached when one is configured.
    pub async fn revoke_user_session(&self, user: &str, incident_id: &str) -> ActionRecord {
        if let Some(identity) = &self.identity {
            if let Err(e) = identity.admin_revoke_sessions(user).await {
                warn!(user, error = %e, "identity provider revocation call failed");
            }
        }

        let mut ledger = self.ledger.lock().unwrap();
        ledger.revoked_sessions.push(user.to_string());
        let record = ActionRecord {
            action: "revoke_user_session",
            incident_id: incident_id.to_string(),
            target: user.to_string(),
            status: "revoked".to_string(),
            message: format!("Session revocation requested for user {user}"),
            timestamp: Utc::now(),
        };
        ledger.push(record.clone());
        drop(ledger);

        metrics::RESPONSE_ACTIONS_TOTAL.inc();
        info!(user, incident = incident_id, "session revocation recorded");
        record
    }

    /// Log the escalation and push a priority alert to subscribers.
    pub fn escalate_notification(
        &self,
        incident_id: &str,
        severity: Severity,
        threat_type: ThreatType,
    ) -> ActionRecord {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.escalated_incidents.push(incident_id.to_string());
        let record = ActionRecord {
            action: "escalate_notification",
            incident_id: incident_id.to_string(),
            target: threat_type.as_str().to_string(),
            status: "escalated".to_string(),
            message: format!(
                "CRITICAL ALERT: {} incident {incident_id} escalated",
                threat_type.as_str()
            ),
            timestamp: Utc::now(),
        };
        ledger.push(record.clone());
        drop(ledger);

        self.hub.broadcast(
            BroadcastKind::CriticalAlert,
            json!({
                "incident_id": incident_id,
                "severity": severity.as_str(),
                "threat_type": threat_type.as_str(),
                "action": "escalate_notification",
            }),
        );
        metrics::RESPONSE_ACTIONS_TOTAL.inc();
        warn!(incident = incident_id, threat = threat_type.as_str(), "incident escalated");
        record
    }

    /// Queue an alert email to the configured recipients. Stub path: the
    /// content is composed and logged, delivery is left to the mail relay.
    pub fn send_alert_email(&self, incident: &Incident) -> ActionRecord {
        let content = format!(
            "CRITICAL SECURITY ALERT - AEGIS SOC\n\n\
             Incident ID: {}\nType: {}\nSeverity: {}\nTime: {}\nDescription: {}\n\n\
             Immediate action required. Please review the incident in the SOC dashboard.",
            incident.id,
            incident.threat_type.as_str(),
            incident.severity.as_str().to_uppercase(),
            Utc::now().to_rfc3339(),
            incident.description,
        );

        let record = ActionRecord {
            action: "send_alert_email",
            incident_id: incident.id.clone(),
            target: self.alert_recipients.join(", "),
            status: "sent".to_string(),
            message: "Alert email queued for delivery".to_string(),
            timestamp: Utc::now(),
        };
        self.ledger.lock().unwrap().push(record.clone());

        metrics::RESPONSE_ACTIONS_TOTAL.inc();
        info!(
            incident = %incident.id,
            recipients = %record.target,
            bytes = content.len(),
            "alert email queued"
        );
        record
    }

    /// Most recent response actions, oldest first.
    pub fn action_log(&self, limit: usize) -> Vec<ActionRecord> {
        let ledger = self.ledger.lock().unwrap();
        let skip = ledger.action_log.len().saturating_sub(limit);
        ledger.action_log[skip..].to_vec()
    }

    pub fn quarantined_devices(&self) -> Vec<QuarantineEntry> {
        self.ledger
            .lock()
            .unwrap()
            .quarantined_devices
            .values()
            .cloned()
            .collect()
    }

    pub fn isolated_processes(&self) -> Vec<IsolationEntry> {
        self.ledger
            .lock()
            .unwrap()
            .isolated_processes
            .values()
            .cloned()
            .collect()
    }

    pub fn revoked_sessions(&self) -> Vec<String> {
        self.ledger.lock().unwrap().revoked_sessions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use aegis_core::event::{EventKind, IncidentStatus};
    use aegis_core::forensics::SimulatedHost;
    use serde_json::{Map, Value};

    fn engine() -> ResponseEngine {
        ResponseEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Hub::new()),
            Arc::new(SimulatedHost),
            None,
            vec!["soc@test.local".to_string()],
        )
    }

    fn incident(threat_type: ThreatType, severity: Severity, ip: &str) -> Incident {
        Incident {
            id: "incident0000cafe".to_string(),
            threat_type,
            severity,
            description: "test incident".to_string(),
            confidence: 0.9,
            indicators: vec![],
            event_id: "event00000000abc".to_string(),
            source_ip: ip.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
            status: IncidentStatus::Active,
            resolution_notes: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn test_critical_incident_escalates_and_emails() {
        let engine = engine();
        let event = Event::new(EventKind::NetworkEvent, "10.0.0.1", Severity::Critical, Map::new());
        let actions = engine
            .execute(
                &incident(ThreatType::MaliciousTraffic, Severity::Critical, "10.0.0.1"),
                &event,
            )
            .await;

        let names: Vec<&str> = actions.iter().map(|a| a.action).collect();
        assert!(names.contains(&"escalate_notification"));
        assert!(names.contains(&"send_alert_email"));
        assert!(actions.iter().all(|a| a.incident_id == "incident0000cafe"));
    }

    #[tokio::test]
    async fn test_bruteforce_quarantines_source() {
        let engine = engine();
        let event = Event::new(EventKind::LoginEvent, "10.0.0.7", Severity::High, Map::new());
        engine
            .execute(
                &incident(ThreatType::Bruteforce, Severity::High, "10.0.0.7"),
                &event,
            )
            .await;

        let quarantined = engine.quarantined_devices();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].device_id, "device_10.0.0.7");
        assert_eq!(quarantined[0].source_ip, "10.0.0.7");
    }

    #[tokio::test]
    async fn test_privesc_revokes_user_from_role_change() {
        let engine = engine();
        let mut details = Map::new();
        details.insert("user_change".into(), Value::from("user1 -> root"));
        let event = Event::new(EventKind::OsEvent, "10.0.0.8", Severity::Critical, details);
        engine
            .execute(
                &incident(
                    ThreatType::PrivilegeEscalation,
                    Severity::Critical,
                    "10.0.0.8",
                ),
                &event,
            )
            .await;

        assert_eq!(engine.revoked_sessions(), vec!["user1".to_string()]);
        let log = engine.action_log(10);
        assert!(log.iter().any(|a| a.action == "revoke_user_session" && a.target == "user1"));
    }

    #[tokio::test]
    async fn test_malware_isolates_pid() {
        let engine = engine();
        let mut details = Map::new();
        details.insert("pid".into(), Value::from(6666u64));
        let event = Event::new(EventKind::ProcessEvent, "10.0.0.9", Severity::Critical, details);
        engine
            .execute(
                &incident(ThreatType::Malware, Severity::Critical, "10.0.0.9"),
                &event,
            )
            .await;

        let isolated = engine.isolated_processes();
        assert_eq!(isolated.len(), 1);
        assert_eq!(isolated[0].pid, 6666);
    }

    #[tokio::test]
    async fn test_action_log_bounded() {
        let engine = engine();
        for _ in 0..(ACTION_LOG_CAPACITY + 50) {
            engine.escalate_notification("incident0000cafe", Severity::Critical, ThreatType::Ddos);
        }
        assert_eq!(engine.action_log(usize::MAX).len(), ACTION_LOG_CAPACITY);
    }
}
