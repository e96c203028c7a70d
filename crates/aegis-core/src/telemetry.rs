//! Simulated security telemetry.
//!
//! Two producers share the event envelope: a random generator that ticks in
//! the background for live operation, and an attack-chain injector that
//! replays deterministic multi-stage attacks through the same pipeline so
//! the window-based detectors trigger naturally.

use rand::Rng;
use serde_json::{Map, Value};

use crate::event::{generate_id, Event, EventKind, Severity};

const SEVERITY_WEIGHTS: [(Severity, f64); 4] = [
    (Severity::Low, 0.40),
    (Severity::Medium, 0.35),
    (Severity::High, 0.20),
    (Severity::Critical, 0.05),
];

const EXTERNAL_IPS: [&str; 4] = ["8.8.8.8", "1.1.1.1", "208.67.222.222", "9.9.9.9"];
const COMMON_PORTS: [u16; 8] = [22, 80, 443, 3306, 5432, 8080, 8443, 3389];

/// Known-bad sources occasionally injected into suspicious events.
const BLACKLIST_IPS: [&str; 5] = [
    "45.33.32.156",
    "198.51.100.42",
    "203.0.113.0",
    "192.0.2.1",
    "10.255.255.1",
];

const USERNAMES: [&str; 8] = [
    "admin",
    "root",
    "user1",
    "user2",
    "developer",
    "analyst",
    "guest",
    "service_account",
];

const NORMAL_PROCESSES: [&str; 11] = [
    "nginx", "python", "node", "java", "postgres", "redis", "docker", "systemd", "sshd", "cron",
    "apache2",
];
const SUSPICIOUS_PROCESSES: [&str; 3] = ["suspicious.exe", "cryptominer", "backdoor.sh"];

const OS_ACTIONS: [&str; 6] = [
    "file_access",
    "file_modify",
    "registry_change",
    "service_start",
    "service_stop",
    "config_change",
];

/// Share of generated events that are made mildly suspicious.
const SUSPICIOUS_RATE: f64 = 0.05;

/// Random telemetry generator for live operation.
#[derive(Debug, Default)]
pub struct TelemetryGenerator {
    event_count: u64,
}

impl TelemetryGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Emit one event. Severity is weighted toward low/medium; 5% of events
    /// are marked suspicious, which may upgrade severity and pick a
    /// known-bad source address.
    pub fn generate(&mut self) -> Event {
        self.event_count += 1;
        let mut rng = rand::rng();

        let kind = EventKind::ALL[rng.random_range(0..EventKind::ALL.len())];
        let is_suspicious = rng.random_bool(SUSPICIOUS_RATE);

        let severity = if is_suspicious {
            if rng.random_bool(0.5) {
                Severity::Medium
            } else {
                Severity::High
            }
        } else {
            weighted_severity(&mut rng)
        };

        let source_ip = if is_suspicious && rng.random_bool(0.3) {
            BLACKLIST_IPS[rng.random_range(0..BLACKLIST_IPS.len())].to_string()
        } else {
            format!("192.168.1.{}", rng.random_range(1..255))
        };

        let details = match kind {
            EventKind::LoginEvent => login_details(&mut rng, is_suspicious),
            EventKind::ProcessEvent => process_details(&mut rng, is_suspicious),
            EventKind::NetworkEvent => network_details(&mut rng, is_suspicious),
            EventKind::OsEvent => os_details(&mut rng, is_suspicious),
        };

        Event::new(kind, source_ip, severity, details)
    }
}

fn weighted_severity(rng: &mut impl Rng) -> Severity {
    let roll: f64 = rng.random();
    let mut cumulative = 0.0;
    for (severity, weight) in SEVERITY_WEIGHTS {
        cumulative += weight;
        if roll < cumulative {
            return severity;
        }
    }
    Severity::Critical
}

fn login_details(rng: &mut impl Rng, is_suspicious: bool) -> Map<String, Value> {
    // 10% failure rate under normal conditions.
    let success = !is_suspicious && rng.random_bool(0.9);
    let mut details = Map::new();
    details.insert(
        "username".into(),
        Value::from(USERNAMES[rng.random_range(0..USERNAMES.len())]),
    );
    details.insert("success".into(), Value::from(success));
    details.insert(
        "method".into(),
        Value::from(["ssh", "console", "rdp", "api"][rng.random_range(0..4)]),
    );
    details.insert(
        "attempts".into(),
        Value::from(if success { 1 } else { rng.random_range(1..=3) }),
    );
    details.insert(
        "client_version".into(),
        Value::from(format!(
            "OpenSSH_{}.{}",
            rng.random_range(7..=9),
            rng.random_range(0..10)
        )),
    );
    details
}

fn process_details(rng: &mut impl Rng, is_suspicious: bool) -> Map<String, Value> {
    let process_name = if is_suspicious && rng.random_bool(0.5) {
        SUSPICIOUS_PROCESSES[rng.random_range(0..SUSPICIOUS_PROCESSES.len())]
    } else {
        NORMAL_PROCESSES[rng.random_range(0..NORMAL_PROCESSES.len())]
    };
    let mut details = Map::new();
    details.insert("process_name".into(), Value::from(process_name));
    details.insert("pid".into(), Value::from(rng.random_range(1000..65536)));
    details.insert("ppid".into(), Value::from(rng.random_range(1..1000)));
    details.insert(
        "hash".into(),
        Value::from(format!(
            "{:016x}{:016x}",
            rng.random::<u64>(),
            rng.random::<u64>()
        )),
    );
    details.insert(
        "cpu_percent".into(),
        Value::from((rng.random::<f64>() * 15.0 * 100.0).round() / 100.0),
    );
    details.insert("memory_mb".into(), Value::from(rng.random_range(10..500)));
    details.insert(
        "user".into(),
        Value::from(USERNAMES[rng.random_range(0..USERNAMES.len())]),
    );
    details
}

fn network_details(rng: &mut impl Rng, is_suspicious: bool) -> Map<String, Value> {
    let (dest_ip, bytes) = if is_suspicious && rng.random_bool(0.4) {
        (
            BLACKLIST_IPS[rng.random_range(0..BLACKLIST_IPS.len())].to_string(),
            rng.random_range(10_000..100_000u64),
        )
    } else if rng.random_bool(0.5) {
        (
            EXTERNAL_IPS[rng.random_range(0..EXTERNAL_IPS.len())].to_string(),
            rng.random_range(64..5000u64),
        )
    } else {
        (
            format!("192.168.1.{}", rng.random_range(1..11)),
            rng.random_range(64..5000u64),
        )
    };

    let mut details = Map::new();
    details.insert("destination_ip".into(), Value::from(dest_ip));
    details.insert(
        "port".into(),
        Value::from(COMMON_PORTS[rng.random_range(0..COMMON_PORTS.len())]),
    );
    details.insert(
        "protocol".into(),
        Value::from(if rng.random_bool(0.5) { "TCP" } else { "UDP" }),
    );
    details.insert("bytes".into(), Value::from(bytes));
    details.insert(
        "direction".into(),
        Value::from(if rng.random_bool(0.5) {
            "inbound"
        } else {
            "outbound"
        }),
    );
    details.insert(
        "connection_state".into(),
        Value::from(
            ["ESTABLISHED", "SYN_SENT", "TIME_WAIT", "CLOSE_WAIT"][rng.random_range(0..4)],
        ),
    );
    details
}

fn os_details(rng: &mut impl Rng, is_suspicious: bool) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert(
        "action".into(),
        Value::from(OS_ACTIONS[rng.random_range(0..OS_ACTIONS.len())]),
    );
    details.insert(
        "path".into(),
        Value::from(format!(
            "/var/log/{}{}",
            if is_suspicious { "suspicious/" } else { "" },
            ["syslog", "auth.log", "messages"][rng.random_range(0..3)]
        )),
    );
    details.insert(
        "user".into(),
        Value::from(USERNAMES[rng.random_range(0..USERNAMES.len())]),
    );
    details.insert(
        "result".into(),
        Value::from(if is_suspicious && rng.random_bool(0.5) {
            "failure"
        } else {
            "success"
        }),
    );
    details.insert(
        "audit_id".into(),
        Value::from(rng.random_range(10_000..100_000)),
    );
    details
}

/// The attack chains the simulation surface can replay.
pub const CHAIN_NAMES: [&str; 9] = [
    "bruteforce",
    "brute_force",
    "port_scan",
    "malware",
    "malware_detection",
    "ddos",
    "sql_injection",
    "privilege_escalation",
    "exfiltration",
];

/// Deterministic multi-stage attack chain generator.
#[derive(Debug, Default)]
pub struct AttackChainGenerator;

impl AttackChainGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Build the named chain against `target`, or `None` for an unknown
    /// name. `data_exfiltration` and `brute_force`/`malware_detection` are
    /// accepted aliases.
    pub fn generate(&self, attack_type: &str, target: &str) -> Option<Vec<Event>> {
        match attack_type.to_lowercase().as_str() {
            "bruteforce" | "brute_force" => Some(self.bruteforce_chain()),
            "port_scan" => Some(self.portscan_chain(target)),
            "malware" | "malware_detection" => Some(self.malware_chain()),
            "ddos" => Some(self.ddos_chain(target)),
            "sql_injection" => Some(self.sqli_chain(target)),
            "privilege_escalation" => Some(self.privesc_chain()),
            "exfiltration" | "data_exfiltration" => Some(self.exfiltration_chain()),
            _ => None,
        }
    }

    fn attack_event(
        &self,
        kind: EventKind,
        severity: Severity,
        source_ip: Option<String>,
        details: Map<String, Value>,
    ) -> Event {
        let source = source_ip
            .unwrap_or_else(|| format!("192.168.1.{}", rand::rng().random_range(1..=255)));
        Event {
            id: generate_id(),
            timestamp: chrono::Utc::now(),
            kind,
            source_ip: source,
            severity,
            details,
            anomaly_score: 0.0,
            ml_flagged: false,
            ml_context: None,
        }
    }

    /// Six failed logins from one attacker followed by a success.
    fn bruteforce_chain(&self) -> Vec<Event> {
        let mut rng = rand::rng();
        let attacker_ip = format!("10.0.0.{}", rng.random_range(1..=255));
        let mut events = Vec::with_capacity(7);

        for i in 0..6 {
            let mut details = Map::new();
            details.insert(
                "username".into(),
                Value::from(["admin", "root", "administrator"][rng.random_range(0..3)]),
            );
            details.insert("success".into(), Value::from(false));
            details.insert("method".into(), Value::from("ssh"));
            details.insert("attempts".into(), Value::from(1));
            details.insert("reason".into(), Value::from("invalid_password"));
            events.push(self.attack_event(
                EventKind::LoginEvent,
                if i < 4 { Severity::Medium } else { Severity::High },
                Some(attacker_ip.clone()),
                details,
            ));
        }

        let mut details = Map::new();
        details.insert("username".into(), Value::from("admin"));
        details.insert("success".into(), Value::from(true));
        details.insert("method".into(), Value::from("ssh"));
        details.insert("attempts".into(), Value::from(1));
        details.insert("suspicious".into(), Value::from(true));
        events.push(self.attack_event(
            EventKind::LoginEvent,
            Severity::Critical,
            Some(attacker_ip),
            details,
        ));
        events
    }

    /// SYN probes against a fixed ten-port set.
    fn portscan_chain(&self, target: &str) -> Vec<Event> {
        let attacker_ip = format!("10.0.0.{}", rand::rng().random_range(1..=255));
        [22u16, 23, 80, 443, 445, 3306, 3389, 5432, 8080, 8443]
            .iter()
            .map(|&port| {
                let mut details = Map::new();
                details.insert("destination_ip".into(), Value::from(target));
                details.insert("port".into(), Value::from(port));
                details.insert("protocol".into(), Value::from("TCP"));
                details.insert("bytes".into(), Value::from(64));
                details.insert("flags".into(), Value::from("SYN"));
                details.insert("scan_detected".into(), Value::from(true));
                self.attack_event(
                    EventKind::NetworkEvent,
                    Severity::Medium,
                    Some(attacker_ip.clone()),
                    details,
                )
            })
            .collect()
    }

    /// Dropper process, C2 beacon, persistence write.
    fn malware_chain(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(3);

        let mut details = Map::new();
        details.insert("process_name".into(), Value::from("suspicious.exe"));
        details.insert("pid".into(), Value::from(6666));
        details.insert("hash".into(), Value::from("abc123malicious"));
        details.insert("parent_process".into(), Value::from("explorer.exe"));
        details.insert(
            "command_line".into(),
            Value::from("suspicious.exe -hidden -persist"),
        );
        events.push(self.attack_event(EventKind::ProcessEvent, Severity::Critical, None, details));

        let mut details = Map::new();
        details.insert("destination_ip".into(), Value::from(BLACKLIST_IPS[0]));
        details.insert("port".into(), Value::from(443));
        details.insert("protocol".into(), Value::from("TCP"));
        details.insert("bytes".into(), Value::from(5000));
        details.insert("beacon".into(), Value::from(true));
        events.push(self.attack_event(EventKind::NetworkEvent, Severity::Critical, None, details));

        let mut details = Map::new();
        details.insert("action".into(), Value::from("file_modify"));
        details.insert("path".into(), Value::from("/etc/crontab"));
        details.insert("user".into(), Value::from("root"));
        details.insert("suspicious".into(), Value::from(true));
        events.push(self.attack_event(EventKind::OsEvent, Severity::High, None, details));

        events
    }

    /// Ten high-volume flows from random sources.
    fn ddos_chain(&self, target: &str) -> Vec<Event> {
        let mut rng = rand::rng();
        (0..10)
            .map(|_| {
                let mut details = Map::new();
                details.insert("destination_ip".into(), Value::from(target));
                details.insert("port".into(), Value::from(80));
                details.insert("protocol".into(), Value::from("TCP"));
                details.insert(
                    "bytes".into(),
                    Value::from(rng.random_range(5000..=15_000u64)),
                );
                details.insert(
                    "flags".into(),
                    Value::from(["SYN", "ACK", "RST"][rng.random_range(0..3)]),
                );
                details.insert("flood_detected".into(), Value::from(true));
                let source = format!(
                    "{}.{}.{}.{}",
                    rng.random_range(1..=255),
                    rng.random_range(1..=255),
                    rng.random_range(1..=255),
                    rng.random_range(1..=255)
                );
                self.attack_event(
                    EventKind::NetworkEvent,
                    Severity::Critical,
                    Some(source),
                    details,
                )
            })
            .collect()
    }

    /// Database connection followed by an injected query.
    fn sqli_chain(&self, target: &str) -> Vec<Event> {
        let attacker_ip = format!("10.0.0.{}", rand::rng().random_range(1..=255));
        let mut events = Vec::with_capacity(2);

        let mut details = Map::new();
        details.insert("destination_ip".into(), Value::from(target));
        details.insert("port".into(), Value::from(3306));
        details.insert("protocol".into(), Value::from("TCP"));
        details.insert("bytes".into(), Value::from(512));
        details.insert("service".into(), Value::from("mysql"));
        events.push(self.attack_event(
            EventKind::NetworkEvent,
            Severity::Medium,
            Some(attacker_ip.clone()),
            details,
        ));

        let mut details = Map::new();
        details.insert("action".into(), Value::from("database_query"));
        details.insert(
            "command".into(),
            Value::from("SELECT * FROM users WHERE id=1 OR 1=1; DROP TABLE users;--"),
        );
        details.insert("database".into(), Value::from("production_db"));
        details.insert("injection_detected".into(), Value::from(true));
        events.push(self.attack_event(
            EventKind::OsEvent,
            Severity::High,
            Some(attacker_ip),
            details,
        ));

        events
    }

    /// Benign login, sudo spawn, role change to root.
    fn privesc_chain(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(3);

        let mut details = Map::new();
        details.insert("username".into(), Value::from("user1"));
        details.insert("success".into(), Value::from(true));
        details.insert("method".into(), Value::from("ssh"));
        events.push(self.attack_event(EventKind::LoginEvent, Severity::Low, None, details));

        let mut details = Map::new();
        details.insert("process_name".into(), Value::from("sudo"));
        details.insert("pid".into(), Value::from(8888));
        details.insert("hash".into(), Value::from("privilege_esc"));
        details.insert("command_line".into(), Value::from("sudo -i"));
        events.push(self.attack_event(EventKind::ProcessEvent, Severity::High, None, details));

        let mut details = Map::new();
        details.insert("action".into(), Value::from("role_change"));
        details.insert("user_change".into(), Value::from("user1 -> root"));
        details.insert("user".into(), Value::from("user1"));
        details.insert("method".into(), Value::from("sudo"));
        details.insert("suspicious".into(), Value::from(true));
        events.push(self.attack_event(EventKind::OsEvent, Severity::Critical, None, details));

        events
    }

    /// Archive staging followed by a bulk outbound transfer.
    fn exfiltration_chain(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(2);

        let mut details = Map::new();
        details.insert("process_name".into(), Value::from("tar"));
        details.insert("pid".into(), Value::from(7777));
        details.insert("hash".into(), Value::from("compress_data"));
        details.insert(
            "command_line".into(),
            Value::from("tar -czf /tmp/data.tar.gz /var/sensitive/"),
        );
        events.push(self.attack_event(EventKind::ProcessEvent, Severity::Medium, None, details));

        let mut details = Map::new();
        details.insert("destination_ip".into(), Value::from(BLACKLIST_IPS[1]));
        details.insert("port".into(), Value::from(443));
        details.insert("protocol".into(), Value::from("TCP"));
        details.insert("bytes".into(), Value::from(500_000));
        details.insert("direction".into(), Value::from("outbound"));
        details.insert("exfiltration_suspected".into(), Value::from(true));
        events.push(self.attack_event(EventKind::NetworkEvent, Severity::Critical, None, details));

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_events_are_well_formed() {
        let mut generator = TelemetryGenerator::new();
        for _ in 0..200 {
            let event = generator.generate();
            assert_eq!(event.id.len(), 16);
            assert!(!event.details.is_empty());
            assert!(event.source_ip.contains('.'));
        }
        assert_eq!(generator.event_count(), 200);
    }

    #[test]
    fn test_bruteforce_chain_shape() {
        let chain = AttackChainGenerator::new()
            .generate("bruteforce", "192.168.1.100")
            .unwrap();
        assert_eq!(chain.len(), 7);
        let failures = chain
            .iter()
            .filter(|e| e.detail_bool("success") == Some(false))
            .count();
        assert_eq!(failures, 6);
        assert!(chain[6].detail_bool("success").unwrap());
        // The whole chain comes from one attacker.
        assert!(chain.iter().all(|e| e.source_ip == chain[0].source_ip));
    }

    #[test]
    fn test_portscan_chain_hits_ten_distinct_ports() {
        let chain = AttackChainGenerator::new()
            .generate("port_scan", "192.168.1.100")
            .unwrap();
        assert_eq!(chain.len(), 10);
        let mut ports: Vec<u64> = chain.iter().filter_map(|e| e.detail_u64("port")).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 10);
        assert!(chain
            .iter()
            .all(|e| e.detail_str("destination_ip") == Some("192.168.1.100")));
    }

    #[test]
    fn test_chain_aliases_resolve() {
        let generator = AttackChainGenerator::new();
        for name in CHAIN_NAMES {
            assert!(
                generator.generate(name, "192.168.1.100").is_some(),
                "chain {name} must resolve"
            );
        }
        assert!(generator.generate("data_exfiltration", "x").is_some());
        assert!(generator.generate("unknown_attack", "x").is_none());
    }

    #[test]
    fn test_ddos_chain_volume() {
        let chain = AttackChainGenerator::new()
            .generate("ddos", "192.168.1.100")
            .unwrap();
        assert_eq!(chain.len(), 10);
        for event in &chain {
            let bytes = event.detail_u64("bytes").unwrap();
            assert!((5000..=15_000).contains(&bytes));
        }
    }

    #[test]
    fn test_privesc_chain_carries_role_change() {
        let chain = AttackChainGenerator::new()
            .generate("privilege_escalation", "x")
            .unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].detail_str("user_change"), Some("user1 -> root"));
        assert_eq!(chain[2].detail_str("user"), Some("user1"));
    }
}
