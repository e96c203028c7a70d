//! Environment-driven configuration.

use std::env;

/// Runtime settings, read once at startup. Every field has a default so the
/// service boots standalone (in-memory store, no external collaborators).
#[derive(Debug, Clone)]
pub struct Config {
    /// External store base URL; empty selects the in-memory store.
    pub store_url: String,
    pub store_key: String,
    /// External LLM API key; empty selects the fallback narrative.
    pub llm_api_key: String,
    pub llm_api_url: String,
    /// Identity provider base URL; empty disables delegated auth.
    pub identity_url: String,
    pub identity_key: String,
    pub cors_origins: String,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub telemetry_interval_seconds: u64,
    pub ml_anomaly_threshold: f64,
    pub ml_contamination: f64,
    /// Swaps forensics and the LLM collaborator for deterministic fixtures.
    pub demo_mode: bool,
    pub alert_recipients: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: String::new(),
            store_key: String::new(),
            llm_api_key: String::new(),
            llm_api_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent".to_string(),
            identity_url: String::new(),
            identity_key: String::new(),
            cors_origins: "*".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            debug: true,
            telemetry_interval_seconds: 5,
            ml_anomaly_threshold: 0.75,
            ml_contamination: 0.1,
            demo_mode: false,
            alert_recipients: vec!["soc-team@aegis.local".to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            store_url: env_or("STORE_URL", &defaults.store_url),
            store_key: env_or("STORE_KEY", &defaults.store_key),
            llm_api_key: env_or("LLM_API_KEY", &defaults.llm_api_key),
            llm_api_url: env_or("LLM_API_URL", &defaults.llm_api_url),
            identity_url: env_or("IDENTITY_URL", &defaults.identity_url),
            identity_key: env_or("IDENTITY_KEY", &defaults.identity_key),
            cors_origins: env_or("CORS_ORIGINS", &defaults.cors_origins),
            host: env_or("HOST", &defaults.host),
            port: env_parsed("PORT", defaults.port),
            debug: env_parsed("DEBUG", defaults.debug),
            telemetry_interval_seconds: env_parsed(
                "TELEMETRY_INTERVAL_SECONDS",
                defaults.telemetry_interval_seconds,
            ),
            ml_anomaly_threshold: env_parsed("ML_ANOMALY_THRESHOLD", defaults.ml_anomaly_threshold),
            ml_contamination: env_parsed("ML_CONTAMINATION", defaults.ml_contamination),
            demo_mode: env_parsed("DEMO_MODE", defaults.demo_mode),
            alert_recipients: env::var("ALERT_RECIPIENTS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.alert_recipients),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.telemetry_interval_seconds, 5);
        assert_eq!(config.ml_anomaly_threshold, 0.75);
        assert_eq!(config.ml_contamination, 0.1);
        assert_eq!(config.port, 8000);
        assert!(!config.demo_mode);
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }
}
