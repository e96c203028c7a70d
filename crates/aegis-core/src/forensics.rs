//! Forensic snapshot capture for incidents.
//!
//! Host process/connection inventory is an external facility, reached
//! through the `HostInspector` seam. The default `SimulatedHost` produces
//! plausible synthetic inventory; demo deployments swap in fixed fixtures.
//! Every report field is a plain nested serde structure so snapshots
//! survive the store and the broadcast path unchanged.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::detect::Threat;
use crate::event::{generate_id, Event, ThreatType};

/// Point-in-time host health numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_total_gb: f64,
    pub memory_available_gb: f64,
    pub disk_percent: f64,
    pub disk_total_gb: f64,
    pub boot_time: DateTime<Utc>,
    pub uptime_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub username: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub status: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub family: String,
    pub local_address: String,
    pub remote_address: Option<String>,
    pub status: String,
    pub pid: Option<u32>,
    pub process_name: String,
}

/// One entry of the synthetic packet trace attached to a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    pub sequence: u32,
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub source_port: u16,
    pub destination_ip: String,
    pub destination_port: u64,
    pub protocol: String,
    pub flags: String,
    pub size_bytes: u32,
    pub ttl: u8,
    pub payload_preview: String,
}

/// Incident-scoped forensic snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForensicReport {
    pub id: String,
    pub incident_id: String,
    pub captured_at: DateTime<Utc>,
    pub incident_type: ThreatType,
    pub system_info: SystemInfo,
    pub processes: Vec<ProcessInfo>,
    pub connections: Vec<ConnectionInfo>,
    pub packet_data: Vec<PacketRecord>,
    pub suspicious_indicators: Vec<String>,
    pub recommended_actions: Vec<String>,
    /// Narrative attached later by the external summarizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// External host-introspection facility.
pub trait HostInspector: Send + Sync {
    fn system_info(&self) -> SystemInfo;
    fn processes(&self) -> Vec<ProcessInfo>;
    fn connections(&self) -> Vec<ConnectionInfo>;
}

const PROCESS_POOL: [&str; 12] = [
    "nginx", "python", "node", "java", "postgres", "redis", "docker", "systemd", "sshd", "cron",
    "apache2", "aegisd",
];
const PROCESS_USERS: [&str; 4] = ["root", "www-data", "postgres", "aegis"];
const CONN_STATES: [&str; 4] = ["ESTABLISHED", "LISTEN", "TIME_WAIT", "CLOSE_WAIT"];

/// Synthetic host inventory used when no real introspection facility is
/// wired in.
#[derive(Debug, Default)]
pub struct SimulatedHost;

impl HostInspector for SimulatedHost {
    fn system_info(&self) -> SystemInfo {
        let mut rng = rand::rng();
        let uptime_hours: f64 = rng.random_range(1.0..720.0);
        SystemInfo {
            cpu_percent: (rng.random_range(2.0..65.0f64) * 100.0).round() / 100.0,
            memory_percent: (rng.random_range(20.0..85.0f64) * 100.0).round() / 100.0,
            memory_total_gb: 32.0,
            memory_available_gb: (rng.random_range(4.0..24.0f64) * 100.0).round() / 100.0,
            disk_percent: (rng.random_range(30.0..80.0f64) * 100.0).round() / 100.0,
            disk_total_gb: 512.0,
            boot_time: Utc::now() - Duration::seconds((uptime_hours * 3600.0) as i64),
            uptime_hours: (uptime_hours * 100.0).round() / 100.0,
        }
    }

    fn processes(&self) -> Vec<ProcessInfo> {
        let mut rng = rand::rng();
        let now = Utc::now();
        (0..30)
            .map(|_| ProcessInfo {
                pid: rng.random_range(100..65_535),
                name: PROCESS_POOL[rng.random_range(0..PROCESS_POOL.len())].to_string(),
                username: PROCESS_USERS[rng.random_range(0..PROCESS_USERS.len())].to_string(),
                cpu_percent: (rng.random_range(0.0..40.0f64) * 100.0).round() / 100.0,
                memory_percent: (rng.random_range(0.1..12.0f64) * 100.0).round() / 100.0,
                status: if rng.random_bool(0.8) {
                    "running".to_string()
                } else {
                    "sleeping".to_string()
                },
                created: now - Duration::seconds(rng.random_range(60..86_400)),
            })
            .collect()
    }

    fn connections(&self) -> Vec<ConnectionInfo> {
        let mut rng = rand::rng();
        (0..20)
            .map(|_| {
                let local_port: u16 = rng.random_range(1024..65_535);
                let remote = format!(
                    "{}.{}.{}.{}:{}",
                    rng.random_range(1..=223),
                    rng.random_range(0..=255),
                    rng.random_range(0..=255),
                    rng.random_range(1..=254),
                    [80u16, 443, 22, 5432][rng.random_range(0..4)]
                );
                ConnectionInfo {
                    family: "IPv4".to_string(),
                    local_address: format!("192.168.1.2:{local_port}"),
                    remote_address: Some(remote),
                    status: CONN_STATES[rng.random_range(0..CONN_STATES.len())].to_string(),
                    pid: Some(rng.random_range(100..65_535)),
                    process_name: PROCESS_POOL[rng.random_range(0..PROCESS_POOL.len())].to_string(),
                }
            })
            .collect()
    }
}

/// Processes kept in a report, top by CPU.
const PROCESS_LIMIT: usize = 20;
const CONNECTION_LIMIT: usize = 15;
const PACKET_TRACE_LENGTH: u32 = 5;

/// Builds forensic reports from host inventory and the triggering event.
pub struct ForensicsEngine {
    inspector: std::sync::Arc<dyn HostInspector>,
}

impl ForensicsEngine {
    pub fn new(inspector: std::sync::Arc<dyn HostInspector>) -> Self {
        Self { inspector }
    }

    /// Capture a complete snapshot for an incident.
    pub fn capture(&self, event: &Event, threat: &Threat, incident_id: &str) -> ForensicReport {
        let mut processes = self.inspector.processes();
        processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        processes.truncate(PROCESS_LIMIT);

        let mut connections = self.inspector.connections();
        connections.truncate(CONNECTION_LIMIT);

        ForensicReport {
            id: generate_id(),
            incident_id: incident_id.to_string(),
            captured_at: Utc::now(),
            incident_type: threat.threat_type,
            system_info: self.inspector.system_info(),
            processes,
            connections,
            packet_data: packet_trace(event, threat.threat_type),
            suspicious_indicators: extract_indicators(event, threat),
            recommended_actions: recommendations(threat.threat_type),
            summary: None,
        }
    }
}

fn packet_trace(event: &Event, threat_type: ThreatType) -> Vec<PacketRecord> {
    let mut rng = rand::rng();
    let destination_ip = event
        .detail_str("destination_ip")
        .unwrap_or("10.0.0.1")
        .to_string();
    let destination_port = event
        .detail_u64("port")
        .unwrap_or_else(|| [22u64, 80, 443, 3306, 8080][rng.random_range(0..5)]);
    let protocol = event.detail_str("protocol").unwrap_or("TCP").to_string();

    (1..=PACKET_TRACE_LENGTH)
        .map(|sequence| PacketRecord {
            sequence,
            timestamp: Utc::now(),
            source_ip: event.source_ip.clone(),
            source_port: rng.random_range(1024..65_535),
            destination_ip: destination_ip.clone(),
            destination_port,
            protocol: protocol.clone(),
            flags: ["SYN", "SYN-ACK", "ACK", "FIN", "RST", "PSH"][rng.random_range(0..6)]
                .to_string(),
            size_bytes: rng.random_range(64..1500),
            ttl: [64u8, 128, 255][rng.random_range(0..3)],
            payload_preview: payload_preview(threat_type).to_string(),
        })
        .collect()
}

fn payload_preview(threat_type: ThreatType) -> &'static str {
    match threat_type {
        ThreatType::Bruteforce => {
            "[AUTH] Failed password for admin from 192.168.1.x port 52341 ssh2"
        }
        ThreatType::Malware => "[BINARY] MZ\\x90\\x00\\x03\\x00\\x00\\x00...PE signature detected",
        ThreatType::Ddos => "[FLOOD] GET / HTTP/1.1\\r\\nHost: target.com\\r\\nUser-Agent: [RANDOMIZED]",
        ThreatType::SqlInjection => "[SQL] SELECT * FROM users WHERE id='1' OR '1'='1'--",
        ThreatType::Exfiltration => {
            "[DATA] POST /upload HTTP/1.1\\r\\nContent-Length: 524288\\r\\n[ENCRYPTED]"
        }
        ThreatType::PrivilegeEscalation => {
            "[SUDO] user : TTY=pts/0 ; PWD=/home/user ; USER=root ; COMMAND=/bin/bash"
        }
        ThreatType::MaliciousTraffic => "[C2] BEACON: id=0x4A2B status=ACTIVE interval=60s",
        _ => "[ENCRYPTED DATA]",
    }
}

fn extract_indicators(event: &Event, threat: &Threat) -> Vec<String> {
    let mut indicators = vec![
        format!("Event Type: {}", event.kind.as_str()),
        format!("Source IP: {}", event.source_ip),
        format!("Severity: {}", threat.severity.as_str()),
        format!("Detection Time: {}", Utc::now().to_rfc3339()),
    ];

    if let Some(dest) = event.detail_str("destination_ip") {
        indicators.push(format!("Destination IP: {dest}"));
    }
    if let Some(port) = event.detail_u64("port") {
        indicators.push(format!("Target Port: {port}"));
    }
    if let Some(process) = event.detail_str("process_name") {
        indicators.push(format!("Process: {process}"));
    }
    if let Some(hash) = event.detail_str("hash") {
        indicators.push(format!("Hash: {hash}"));
    }
    if let Some(username) = event.detail_str("username") {
        indicators.push(format!("Username: {username}"));
    }
    indicators
}

fn recommendations(threat_type: ThreatType) -> Vec<String> {
    let specific: &[&str] = match threat_type {
        ThreatType::Bruteforce => &[
            "Block source IP at firewall level",
            "Force password reset for targeted accounts",
            "Enable account lockout policy",
            "Implement multi-factor authentication",
            "Review authentication logs for successful compromise",
        ],
        ThreatType::Malware => &[
            "Isolate affected system immediately",
            "Kill malicious process and quarantine files",
            "Run full antivirus/EDR scan",
            "Check for persistence mechanisms",
            "Scan network for lateral movement indicators",
        ],
        ThreatType::Ddos => &[
            "Enable rate limiting on affected services",
            "Activate CDN/DDoS protection services",
            "Block attacking IP ranges at edge",
            "Scale infrastructure if possible",
            "Contact ISP for upstream filtering",
        ],
        ThreatType::SqlInjection => &[
            "Block source IP immediately",
            "Review database for unauthorized changes",
            "Check for data exfiltration",
            "Patch vulnerable application",
            "Implement Web Application Firewall (WAF) rules",
        ],
        ThreatType::Exfiltration => &[
            "Block destination IP and domain",
            "Identify scope of data potentially leaked",
            "Preserve logs for forensic analysis",
            "Notify security leadership immediately",
            "Prepare for potential breach disclosure",
        ],
        ThreatType::PrivilegeEscalation => &[
            "Revoke elevated privileges immediately",
            "Reset all affected user credentials",
            "Audit recent admin actions",
            "Check for unauthorized changes to system files",
            "Review sudo/admin group memberships",
        ],
        ThreatType::MaliciousTraffic => &[
            "Block C2 IP/domain at DNS and firewall",
            "Isolate infected host from network",
            "Scan for additional compromised systems",
            "Check for beaconing patterns in proxy logs",
            "Identify initial infection vector",
        ],
        _ => &[
            "Investigate event source and context",
            "Check for related suspicious activity",
            "Escalate if severity is high or critical",
            "Monitor for recurrence",
        ],
    };

    let mut actions: Vec<String> = specific.iter().map(|s| s.to_string()).collect();
    actions.extend(
        [
            "Document all findings for incident report",
            "Review related logs for additional context",
            "Update incident response runbook if needed",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Severity};
    use serde_json::{Map, Value};

    fn sample_threat(threat_type: ThreatType) -> Threat {
        Threat {
            threat_type,
            severity: Severity::Critical,
            description: "test threat".into(),
            confidence: 0.9,
            indicators: vec![],
        }
    }

    fn sample_event() -> Event {
        let mut details = Map::new();
        details.insert("destination_ip".into(), Value::from("45.33.32.156"));
        details.insert("port".into(), Value::from(443u64));
        details.insert("protocol".into(), Value::from("TCP"));
        Event::new(EventKind::NetworkEvent, "192.168.1.77", Severity::High, details)
    }

    #[test]
    fn test_report_shape() {
        let engine = ForensicsEngine::new(std::sync::Arc::new(SimulatedHost));
        let report = engine.capture(
            &sample_event(),
            &sample_threat(ThreatType::MaliciousTraffic),
            "incident0001abcd",
        );

        assert_eq!(report.incident_id, "incident0001abcd");
        assert_eq!(report.packet_data.len(), 5);
        assert!(report.processes.len() <= 20);
        assert!(report.connections.len() <= 15);
        assert!(report
            .suspicious_indicators
            .iter()
            .any(|i| i.contains("45.33.32.156")));
        assert!(report.summary.is_none());
    }

    #[test]
    fn test_processes_sorted_by_cpu() {
        let engine = ForensicsEngine::new(std::sync::Arc::new(SimulatedHost));
        let report = engine.capture(
            &sample_event(),
            &sample_threat(ThreatType::Malware),
            "incident0002abcd",
        );
        for pair in report.processes.windows(2) {
            assert!(pair[0].cpu_percent >= pair[1].cpu_percent);
        }
    }

    #[test]
    fn test_packet_trace_reflects_event() {
        let engine = ForensicsEngine::new(std::sync::Arc::new(SimulatedHost));
        let report = engine.capture(
            &sample_event(),
            &sample_threat(ThreatType::Ddos),
            "incident0003abcd",
        );
        for packet in &report.packet_data {
            assert_eq!(packet.source_ip, "192.168.1.77");
            assert_eq!(packet.destination_ip, "45.33.32.156");
            assert_eq!(packet.destination_port, 443);
            assert!(packet.payload_preview.starts_with("[FLOOD]"));
        }
    }

    #[test]
    fn test_recommendations_per_threat_kind() {
        let ddos = recommendations(ThreatType::Ddos);
        assert!(ddos.iter().any(|r| r.contains("rate limiting")));
        assert!(ddos.iter().any(|r| r.contains("upstream filtering")));

        let malware = recommendations(ThreatType::Malware);
        assert!(malware.iter().any(|r| r.contains("Isolate")));
        assert!(malware.iter().any(|r| r.contains("scan")));

        // Base recommendations are always appended.
        assert!(ddos.iter().any(|r| r.contains("runbook")));
    }

    #[test]
    fn test_report_serializes_to_plain_json() {
        let engine = ForensicsEngine::new(std::sync::Arc::new(SimulatedHost));
        let report = engine.capture(
            &sample_event(),
            &sample_threat(ThreatType::Bruteforce),
            "incident0004abcd",
        );
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("system_info").unwrap().is_object());
        assert!(json.get("packet_data").unwrap().is_array());
        let back: ForensicReport = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, report.id);
    }
}
