//! Online feature derivation for the anomaly model.
//!
//! Each event maps to a 10-element real-valued vector. The first three
//! features need store cardinality queries; they are derived once per event
//! and attached to the envelope as `ml_context` so scoring and retraining
//! never re-query the store.

use async_trait::async_trait;
use chrono::{Duration, Timelike, Utc};

use crate::event::{Event, FeatureContext};

/// Narrow counting interface the model depends on, instead of the full
/// store gateway. A `None` answer means the backend is unavailable and the
/// caller substitutes a neutral value.
#[async_trait]
pub trait CountProvider: Send + Sync {
    async fn total_events(&self) -> Option<u64>;
    async fn events_with_type(&self, kind: crate::event::EventKind) -> Option<u64>;
    async fn events_with_source(&self, ip: &str) -> Option<u64>;
    /// Events from `ip` newer than `cutoff`.
    async fn events_since(&self, ip: &str, cutoff: chrono::DateTime<Utc>) -> Option<u64>;
}

pub const FEATURE_NAMES: [&str; 10] = [
    "event_type_rarity",
    "source_ip_rarity",
    "event_frequency",
    "payload_entropy",
    "severity_score",
    "hour_of_day",
    "ip_last_octet",
    "port_normalized",
    "bytes_normalized",
    "details_complexity",
];

/// Window used for the per-source frequency feature.
const FREQUENCY_WINDOW_MINUTES: i64 = 5;

/// Derive the store-backed feature context for an event.
///
/// Rarity is `1 - count(matching) / count(all)`: higher means rarer.
/// Unavailable counts degrade to the 0.5 neutral value.
pub async fn derive_context<C>(event: &Event, counts: &C) -> FeatureContext
where
    C: CountProvider + ?Sized,
{
    let total = counts.total_events().await;

    let type_rarity = match (counts.events_with_type(event.kind).await, total) {
        (Some(matching), Some(total)) if total > 0 => 1.0 - matching as f64 / total as f64,
        _ => 0.5,
    };
    let ip_rarity = match (counts.events_with_source(&event.source_ip).await, total) {
        (Some(matching), Some(total)) if total > 0 => 1.0 - matching as f64 / total as f64,
        _ => 0.5,
    };

    let cutoff = Utc::now() - Duration::minutes(FREQUENCY_WINDOW_MINUTES);
    let event_frequency = counts
        .events_since(&event.source_ip, cutoff)
        .await
        .map(|n| n as f64)
        .unwrap_or(0.0);

    FeatureContext {
        type_rarity,
        ip_rarity,
        event_frequency,
        payload_entropy: payload_entropy(&event.details_string()),
    }
}

/// Assemble the full 10-element vector from an event and its context.
///
/// Works on un-enriched events too: missing context components fall back to
/// neutral values, matching the degraded-store behavior.
pub fn feature_vector(event: &Event) -> Vec<f64> {
    let ctx = event.ml_context.unwrap_or(FeatureContext {
        type_rarity: 0.5,
        ip_rarity: 0.5,
        event_frequency: 0.0,
        payload_entropy: 0.5,
    });

    let hour_normalized = event.timestamp.hour() as f64 / 24.0;

    let last_octet = event
        .source_ip
        .rsplit('.')
        .next()
        .and_then(|o| o.parse::<u64>().ok())
        .map(|o| o as f64 / 255.0)
        .unwrap_or(0.5);

    let port_normalized = (event.detail_u64("port").unwrap_or(0) as f64 / 65535.0).min(1.0);
    let bytes_normalized = (event.detail_u64("bytes").unwrap_or(0) as f64 / 100_000.0).min(1.0);
    let details_complexity = (event.details_string().len() as f64 / 1000.0).min(1.0);
    let freq_normalized = (ctx.event_frequency / 100.0).min(1.0);

    vec![
        ctx.type_rarity,
        ctx.ip_rarity,
        freq_normalized,
        ctx.payload_entropy,
        event.severity.score(),
        hour_normalized,
        last_octet,
        port_normalized,
        bytes_normalized,
        details_complexity,
    ]
}

/// Shannon entropy of a string, normalized by the log of the observed
/// alphabet size and clamped to [0, 1]. High entropy suggests encrypted or
/// encoded payloads.
pub fn payload_entropy(data: &str) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    for c in data.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }
    let total = data.chars().count() as f64;

    let mut entropy = 0.0;
    for &count in freq.values() {
        let prob = count as f64 / total;
        entropy -= prob * prob.log2();
    }

    let alphabet = freq.len().min(256) as f64;
    let max_entropy = alphabet.log2();
    if max_entropy <= 0.0 {
        return 0.0;
    }

    let normalized = (entropy / max_entropy).min(1.0);
    (normalized * 10_000.0).round() / 10_000.0
}
