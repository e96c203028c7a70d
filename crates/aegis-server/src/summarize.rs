//! External-LLM incident summarization.
//!
//! The narrative is a post-hoc nicety: any failure (no key, transport
//! error, empty candidate text) falls back to a deterministic summary
//! assembled from the report itself, and the caller never sees an error.
//! Demo mode short-circuits to a canned analysis.

use serde_json::{json, Value};
use tracing::warn;

use aegis_core::event::Incident;
use aegis_core::forensics::ForensicReport;

use crate::demo;

pub struct Summarizer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    demo_mode: bool,
}

impl Summarizer {
    pub fn new(api_url: &str, api_key: &str, demo_mode: bool) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            demo_mode,
        }
    }

    /// Produce the narrative for an incident. Infallible by contract.
    pub async fn summarize(&self, incident: &Incident, report: &ForensicReport) -> String {
        if self.demo_mode {
            return demo::DEMO_SUMMARY.to_string();
        }
        if self.api_key.is_empty() {
            return fallback_summary(incident, report);
        }

        match self.call_llm(incident, report).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => fallback_summary(incident, report),
            Err(e) => {
                warn!(error = %e, incident = %incident.id, "LLM summarization failed, using fallback");
                fallback_summary(incident, report)
            }
        }
    }

    async fn call_llm(
        &self,
        incident: &Incident,
        report: &ForensicReport,
    ) -> Result<String, reqwest::Error> {
        let body = json!({
            "contents": [{"parts": [{"text": build_prompt(incident, report)}]}],
            "generationConfig": {
                "temperature": 0.2,
                "topP": 0.8,
                "topK": 40,
                "maxOutputTokens": 2048,
            },
        });

        let response: Value = self
            .http
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

fn build_prompt(incident: &Incident, report: &ForensicReport) -> String {
    let top_processes: Vec<String> = report
        .processes
        .iter()
        .take(5)
        .map(|p| format!("{} (pid {}, cpu {:.1}%)", p.name, p.pid, p.cpu_percent))
        .collect();
    let indicators: Vec<String> = report
        .suspicious_indicators
        .iter()
        .map(|i| format!("- {i}"))
        .collect();

    format!(
        "You are a Senior SOC (Security Operations Center) Analyst.\n\
         Summarize this forensic snapshot for Incident Response (IR) analysis.\n\
         Provide remediation in 5 bullets.\n\n\
         === INCIDENT DETAILS ===\n\
         Incident Type: {}\n\
         Severity Level: {}\n\
         Description: {}\n\
         Detection Time: {}\n\
         Confidence: {:.2}\n\n\
         === SYSTEM STATE AT CAPTURE ===\n\
         CPU Usage: {:.1}%\nMemory Usage: {:.1}%\nDisk Usage: {:.1}%\nUptime: {:.1} hours\n\n\
         === TOP PROCESSES (by CPU) ===\n{}\n\n\
         === NETWORK CONNECTIONS ===\nActive Connections: {}\n\n\
         === INDICATORS OF COMPROMISE (IOCs) ===\n{}\n\n\
         === REQUIRED OUTPUT ===\n\
         1. **Executive Summary** (2-3 sentences for management briefing)\n\
         2. **Technical Analysis** (What happened, attack vector, affected components)\n\
         3. **Impact Assessment** (What systems/data may be compromised)\n\
         4. **Remediation Recommendations** (Exactly 5 specific, actionable bullet points)\n\
         5. **Prevention Measures** (How to prevent recurrence)\n\n\
         Format your response in clear markdown with the headers above.\n\
         Be specific and actionable. Avoid generic advice.",
        incident.threat_type.as_str(),
        incident.severity.as_str().to_uppercase(),
        incident.description,
        incident.created_at.to_rfc3339(),
        incident.confidence,
        report.system_info.cpu_percent,
        report.system_info.memory_percent,
        report.system_info.disk_percent,
        report.system_info.uptime_hours,
        top_processes.join("\n"),
        report.connections.len(),
        indicators.join("\n"),
    )
}

/// Deterministic narrative assembled from the report when the LLM path is
/// unavailable.
pub fn fallback_summary(incident: &Incident, report: &ForensicReport) -> String {
    let indicators: Vec<String> = report
        .suspicious_indicators
        .iter()
        .map(|i| format!("- {i}"))
        .collect();
    let recommendations: Vec<String> = report
        .recommended_actions
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, r)| format!("{}. {r}", i + 1))
        .collect();

    format!(
        "## Incident Summary\n\n\
         **Type:** {}\n**Severity:** {}\n**Status:** {:?}\n\n\
         ### Executive Summary\n\
         A {} severity {} incident has been detected and requires immediate attention. \
         The automated forensic capture has collected system state data for analysis.\n\n\
         ### Technical Analysis\n{}\n\n\
         ### Indicators of Compromise\n{}\n\n\
         ### System State at Detection\n\
         - **CPU:** {:.1}%\n- **Memory:** {:.1}%\n- **Disk:** {:.1}%\n\
         - **Active Processes:** {}\n- **Network Connections:** {}\n\n\
         ### Remediation Recommendations\n{}\n\n\
         ---\n*Note: This is an automated summary. AI-powered analysis is currently unavailable.*",
        incident.threat_type.as_str(),
        incident.severity.as_str().to_uppercase(),
        incident.status,
        incident.severity.as_str(),
        incident.threat_type.as_str(),
        incident.description,
        indicators.join("\n"),
        report.system_info.cpu_percent,
        report.system_info.memory_percent,
        report.system_info.disk_percent,
        report.processes.len(),
        report.connections.len(),
        recommendations.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::detect::Threat;
    use aegis_core::event::{Event, EventKind, IncidentStatus, Severity, ThreatType};
    use aegis_core::forensics::{ForensicsEngine, SimulatedHost};
    use chrono::Utc;
    use serde_json::Map;

    fn fixtures() -> (Incident, ForensicReport) {
        let event = Event::new(EventKind::NetworkEvent, "10.0.0.4", Severity::Critical, Map::new());
        let threat = Threat {
            threat_type: ThreatType::Ddos,
            severity: Severity::Critical,
            description: "DDoS attack detected".into(),
            confidence: 0.85,
            indicators: vec![],
        };
        let incident = Incident {
            id: "incident0000beef".into(),
            threat_type: threat.threat_type,
            severity: threat.severity,
            description: threat.description.clone(),
            confidence: threat.confidence,
            indicators: vec![],
            event_id: event.id.clone(),
            source_ip: event.source_ip.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
            status: IncidentStatus::Active,
            resolution_notes: None,
            resolved_by: None,
        };
        let report = ForensicsEngine::new(std::sync::Arc::new(SimulatedHost)).capture(
            &event,
            &threat,
            &incident.id,
        );
        (incident, report)
    }

    #[tokio::test]
    async fn test_no_key_falls_back() {
        let (incident, report) = fixtures();
        let summarizer = Summarizer::new("https://llm.example", "", false);
        let summary = summarizer.summarize(&incident, &report).await;
        assert!(summary.contains("## Incident Summary"));
        assert!(summary.contains("ddos"));
        assert!(summary.contains("AI-powered analysis is currently unavailable"));
    }

    #[tokio::test]
    async fn test_demo_mode_returns_canned_summary() {
        let (incident, report) = fixtures();
        let summarizer = Summarizer::new("https://llm.example", "key", true);
        let summary = summarizer.summarize(&incident, &report).await;
        assert_eq!(summary, demo::DEMO_SUMMARY);
    }

    #[test]
    fn test_prompt_carries_incident_facts() {
        let (incident, report) = fixtures();
        let prompt = build_prompt(&incident, &report);
        assert!(prompt.contains("Senior SOC"));
        assert!(prompt.contains("remediation in 5 bullets"));
        assert!(prompt.contains("ddos"));
        assert!(prompt.contains("CRITICAL"));
    }
}
