//! Router-level tests for the operator surface.
//!
//! Requests are driven through the axum router directly; the standalone
//! configuration (in-memory store, no identity provider) keeps the suite
//! hermetic.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{Map, Value};
use tower::ServiceExt;

use aegis_core::event::{Event, EventKind, Severity};
use aegis_server::config::Config;
use aegis_server::routes::{router, AppState};
use aegis_server::{build_state, metrics};

fn harness() -> (AppState, Router) {
    metrics::init();
    let state = build_state(&Config::default());
    let app = router(state.clone(), "*");
    (state, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Materialize one incident by injecting a blacklisted-destination flow.
async fn seed_incident(state: &AppState) -> String {
    let mut details = Map::new();
    details.insert("destination_ip".into(), Value::from("45.33.32.156"));
    details.insert("port".into(), Value::from(443u64));
    details.insert("protocol".into(), Value::from("TCP"));
    details.insert("bytes".into(), Value::from(512u64));
    let event = Event::new(
        EventKind::NetworkEvent,
        "192.168.1.80",
        Severity::Medium,
        details,
    );
    state
        .pipeline
        .process_event(event)
        .await
        .expect("blacklisted destination materializes")
        .id
}

#[tokio::test]
async fn test_liveness_and_health() {
    let (_state, app) = harness();

    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], true);
    assert_eq!(body["model"], false);
}

#[tokio::test]
async fn test_unknown_incident_is_404() {
    let (_state, app) = harness();
    let (status, _) = send(&app, "GET", "/api/incident/ffffffffffffffff", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_attack_chain_is_400() {
    let (_state, app) = harness();
    let (status, body) = send(
        &app,
        "POST",
        "/api/simulate/attack",
        Some(serde_json::json!({ "attack_type": "teardrop" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("teardrop"));
}

#[tokio::test]
async fn test_event_limit_bounds() {
    let (_state, app) = harness();

    let (status, _) = send(&app, "GET", "/api/events?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/events?limit=501", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/events?limit=500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["events"].is_array());

    let (status, _) = send(&app, "GET", "/api/events?severity=apocalyptic", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resolve_is_idempotent() {
    let (state, app) = harness();
    let incident_id = seed_incident(&state).await;
    let (_, mut rx) = state.pipeline.hub().connect();

    let uri = format!("/api/incident/{incident_id}/resolve");
    let body = serde_json::json!({ "resolution_notes": "false positive" });

    let (status, response) = send(&app, "POST", &uri, Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "resolved");
    assert_eq!(
        response["incident"]["resolution_notes"],
        "false positive"
    );

    // Second resolve: no state change, no extra broadcast.
    let (status, response) = send(&app, "POST", &uri, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "resolved");
    assert_eq!(
        response["incident"]["resolution_notes"],
        "false positive"
    );

    let mut resolved_frames = 0;
    while let Ok(frame) = rx.try_recv() {
        let value: Value = serde_json::from_str(&frame).unwrap();
        if value["type"] == "incident_resolved" {
            resolved_frames += 1;
        }
    }
    assert_eq!(resolved_frames, 1);

    // The stored incident satisfies the resolution ordering.
    let stored = state
        .pipeline
        .store()
        .get_incident(&incident_id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.resolved_at.unwrap() >= stored.created_at);
}

#[tokio::test]
async fn test_investigate_transitions_and_broadcasts() {
    let (state, app) = harness();
    let incident_id = seed_incident(&state).await;
    let (_, mut rx) = state.pipeline.hub().connect();

    let uri = format!("/api/incident/{incident_id}/investigate");
    let (status, response) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "investigating");

    let frames: Vec<Value> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|f| serde_json::from_str(&f).unwrap())
        .collect();
    assert!(frames.iter().any(|f| f["type"] == "incident_updated"));
}

#[tokio::test]
async fn test_stats_and_counts_reflect_incidents() {
    let (state, app) = harness();
    seed_incident(&state).await;

    let (status, stats) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_events"], 1);
    assert_eq!(stats["total_incidents"], 1);
    assert_eq!(stats["active_incidents"], 1);

    let (status, counts) = send(&app, "GET", "/api/incidents/counts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counts["total"], 1);
    assert_eq!(counts["active"], 1);
    assert_eq!(counts["by_severity"]["critical"], 1);
}

#[tokio::test]
async fn test_report_and_summary_flow() {
    let (state, app) = harness();
    let incident_id = seed_incident(&state).await;

    let (status, report) = send(&app, "GET", &format!("/api/report/{incident_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["incident_id"], incident_id.as_str());
    assert!(report["packet_data"].as_array().unwrap().len() == 5);

    // No LLM key configured: the deterministic fallback is attached.
    let (status, response) = send(
        &app,
        "POST",
        &format!("/api/gemini/summarize/{incident_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let summary = response["summary"].as_str().unwrap();
    assert!(summary.contains("## Incident Summary"));

    let (_, report) = send(&app, "GET", &format!("/api/report/{incident_id}"), None).await;
    assert_eq!(report["summary"].as_str().unwrap(), summary);
}

#[tokio::test]
async fn test_ml_train_insufficient_via_api() {
    let (_state, app) = harness();
    let (status, body) = send(&app, "POST", "/api/ml/train", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "Not enough data to train model");
    assert_eq!(body["min_required"], 10);
    assert_eq!(body["current_count"], 0);

    let (status, body) = send(&app, "GET", "/api/ml/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_trained"], false);
}

#[tokio::test]
async fn test_manual_response_actions() {
    let (state, app) = harness();
    let incident_id = seed_incident(&state).await;

    let (status, record) = send(
        &app,
        "POST",
        "/api/response/quarantine",
        Some(serde_json::json!({
            "source_ip": "10.0.0.66",
            "incident_id": incident_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["action"], "quarantine_device");
    assert_eq!(record["status"], "quarantined");

    let (status, body) = send(&app, "GET", "/api/response/quarantined", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["devices"]
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["source_ip"] == "10.0.0.66"));

    let (status, body) = send(&app, "GET", "/api/response/actions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["actions"].as_array().unwrap().is_empty());
}
