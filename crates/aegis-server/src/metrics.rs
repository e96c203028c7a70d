//! Prometheus instrumentation.

use once_cell::sync::Lazy;
use prometheus::{Counter, Encoder, Gauge, TextEncoder};

pub static EVENTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("aegis_events_total", "Total events processed").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static INCIDENTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("aegis_incidents_total", "Total incidents materialized").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static ML_FLAGGED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("aegis_ml_flagged_total", "Events flagged by the anomaly model").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static BROADCASTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new("aegis_broadcasts_total", "Messages broadcast to subscribers").unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static RESPONSE_ACTIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let c = Counter::new(
        "aegis_response_actions_total",
        "Automated response actions executed",
    )
    .unwrap();
    prometheus::register(Box::new(c.clone())).unwrap();
    c
});

pub static SUBSCRIBERS: Lazy<Gauge> = Lazy::new(|| {
    let g = Gauge::new("aegis_subscribers", "Live fan-out subscribers").unwrap();
    prometheus::register(Box::new(g.clone())).unwrap();
    g
});

/// Touch every metric so registration happens before the first scrape.
pub fn init() {
    let _ = &*EVENTS_TOTAL;
    let _ = &*INCIDENTS_TOTAL;
    let _ = &*ML_FLAGGED_TOTAL;
    let _ = &*BROADCASTS_TOTAL;
    let _ = &*RESPONSE_ACTIONS_TOTAL;
    let _ = &*SUBSCRIBERS;
}

/// Text exposition for the `/metrics` endpoint.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
