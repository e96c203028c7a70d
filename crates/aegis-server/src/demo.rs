//! Deterministic fixtures for demo deployments.
//!
//! When `DEMO_MODE` is set, the composition root swaps the simulated host
//! inspector and the LLM summarizer for the fixed data here, so demos
//! replay identically. Nothing in the pipeline branches on the flag.

use chrono::{Duration, TimeZone, Utc};

use aegis_core::forensics::{ConnectionInfo, HostInspector, ProcessInfo, SystemInfo};

pub const DEMO_SUMMARY: &str = "## Incident Summary\n\n\
**Pattern Confidence:** HIGH\n\n\
### Executive Summary\n\
A coordinated intrusion attempt was detected and contained by automated response. \
Credential abuse followed by command-and-control traffic indicates a scripted attack kit.\n\n\
### Technical Analysis\n\
- T1078: Valid Accounts - Credential abuse detected\n\
- T1059: Command and Scripting Interpreter - Shell execution observed\n\
- T1071: Application Layer Protocol - C2 communication over HTTPS\n\n\
### Remediation Recommendations\n\
1. Isolate affected hosts from the network immediately\n\
2. Reset credentials for compromised accounts\n\
3. Block identified C2 IP addresses at the firewall\n\
4. Review authentication logs for lateral movement\n\
5. Re-image compromised hosts before reconnecting\n\n\
*Demo mode analysis.*";

/// Fixed host inventory for reproducible demo forensics.
#[derive(Debug, Default)]
pub struct DemoHost;

impl HostInspector for DemoHost {
    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            cpu_percent: 37.5,
            memory_percent: 62.1,
            memory_total_gb: 32.0,
            memory_available_gb: 12.1,
            disk_percent: 54.3,
            disk_total_gb: 512.0,
            boot_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            uptime_hours: 168.0,
        }
    }

    fn processes(&self) -> Vec<ProcessInfo> {
        let created = Utc::now() - Duration::hours(3);
        [
            (6666u32, "suspicious.exe", "root", 87.2, 4.5),
            (1337, "nginx", "www-data", 12.4, 1.2),
            (2001, "postgres", "postgres", 8.8, 6.3),
            (412, "sshd", "root", 0.3, 0.4),
            (1, "systemd", "root", 0.1, 0.2),
        ]
        .into_iter()
        .map(|(pid, name, user, cpu, mem)| ProcessInfo {
            pid,
            name: name.to_string(),
            username: user.to_string(),
            cpu_percent: cpu,
            memory_percent: mem,
            status: "running".to_string(),
            created,
        })
        .collect()
    }

    fn connections(&self) -> Vec<ConnectionInfo> {
        vec![
            ConnectionInfo {
                family: "IPv4".to_string(),
                local_address: "192.168.1.2:51442".to_string(),
                remote_address: Some("45.33.32.156:443".to_string()),
                status: "ESTABLISHED".to_string(),
                pid: Some(6666),
                process_name: "suspicious.exe".to_string(),
            },
            ConnectionInfo {
                family: "IPv4".to_string(),
                local_address: "192.168.1.2:22".to_string(),
                remote_address: Some("10.0.0.44:60122".to_string()),
                status: "ESTABLISHED".to_string(),
                pid: Some(412),
                process_name: "sshd".to_string(),
            },
            ConnectionInfo {
                family: "IPv4".to_string(),
                local_address: "192.168.1.2:5432".to_string(),
                remote_address: None,
                status: "LISTEN".to_string(),
                pid: Some(2001),
                process_name: "postgres".to_string(),
            },
        ]
    }
}
