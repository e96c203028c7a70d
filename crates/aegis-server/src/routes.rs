//! HTTP and WebSocket surface.
//!
//! JSON in, JSON out. Authenticated endpoints validate bearer tokens
//! against the external identity provider; a deployment without a provider
//! runs open (demo/standalone mode). Store failures on read paths degrade
//! to empty results, per the best-effort gateway contract.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use aegis_core::event::{EventKind, Incident, IncidentStatus, Severity};

use crate::auth::{AuthContext, AuthError, IdentityClient};
use crate::hub::BroadcastKind;
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::store::{EventFilter, IncidentFilter};
use crate::summarize::Summarizer;
use std::sync::Arc;

const EVENT_LIMIT_MAX: usize = 500;
const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub identity: Option<Arc<IdentityClient>>,
    pub summarizer: Arc<Summarizer>,
}

/// API failure mapped onto the error-code taxonomy.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    TooManyRequests(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(d) => (StatusCode::BAD_REQUEST, d),
            ApiError::Unauthorized(d) => (StatusCode::UNAUTHORIZED, d),
            ApiError::Forbidden(d) => (StatusCode::FORBIDDEN, d),
            ApiError::NotFound(d) => (StatusCode::NOT_FOUND, d),
            ApiError::TooManyRequests(d) => (StatusCode::TOO_MANY_REQUESTS, d),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unverified => ApiError::Forbidden(e.to_string()),
            AuthError::RateLimited => ApiError::TooManyRequests(e.to_string()),
            _ => ApiError::Unauthorized(e.to_string()),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

/// Validate the bearer token when an identity provider is configured.
/// Without one the deployment runs open and callers are anonymous.
async fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let Some(identity) = &state.identity else {
        return Ok(AuthContext {
            user_id: String::new(),
            email: "operator@local".to_string(),
        });
    };
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    Ok(identity.validate_token(token).await?)
}

pub fn router(state: AppState, cors_origins: &str) -> Router {
    let cors = if cors_origins.trim() == "*" {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = cors_origins
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/auth/signup", post(auth_signup))
        .route("/api/auth/login", post(auth_login))
        .route("/api/auth/logout", post(auth_logout))
        .route("/api/auth/refresh", post(auth_refresh))
        .route("/api/auth/reset-password", post(auth_reset_password))
        .route("/api/auth/me", get(auth_me))
        .route("/api/events", get(list_events))
        .route("/api/events/live", get(websocket_upgrade))
        .route("/ws", get(websocket_upgrade))
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/counts", get(incident_counts))
        .route("/api/incident/{id}", get(get_incident))
        .route("/api/incident/{id}/resolve", post(resolve_incident))
        .route("/api/incident/{id}/investigate", post(investigate_incident))
        .route("/api/stats", get(stats))
        .route("/api/reports", get(list_reports))
        .route("/api/report/{id}", get(get_report))
        .route("/api/simulate/attack", post(simulate_attack))
        .route("/api/ml/train", post(ml_train))
        .route("/api/ml/status", get(ml_status))
        .route("/api/gemini/summarize/{id}", post(summarize_incident))
        .route("/api/response/isolate", post(response_isolate))
        .route("/api/response/quarantine", post(response_quarantine))
        .route("/api/response/revoke", post(response_revoke))
        .route("/api/response/escalate", post(response_escalate))
        .route("/api/response/actions", get(response_actions))
        .route("/api/response/quarantined", get(response_quarantined))
        .layer(cors)
        .with_state(state)
}

async fn liveness() -> Json<Value> {
    Json(json!({ "service": "aegis", "status": "ok" }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.pipeline.store().count_events().await.is_ok();
    Json(json!({
        "status": if store_ok { "healthy" } else { "degraded" },
        "store": store_ok,
        "model": state.pipeline.model().is_loaded(),
        "subscribers": state.pipeline.hub().subscriber_count(),
        "telemetry": state.pipeline.generator_running(),
    }))
}

async fn metrics_handler() -> String {
    metrics::gather()
}

// --- auth -----------------------------------------------------------------

#[derive(Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Deserialize)]
struct ResetRequest {
    email: String,
}

fn identity_or_unauthorized(state: &AppState) -> Result<&Arc<IdentityClient>, ApiError> {
    state
        .identity
        .as_ref()
        .ok_or_else(|| ApiError::Unauthorized("identity provider not configured".to_string()))
}

async fn auth_signup(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = identity_or_unauthorized(&state)?;
    Ok(Json(identity.signup(&request.email, &request.password).await?))
}

async fn auth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = identity_or_unauthorized(&state)?;
    let session = identity
        .login(&request.email, &request.password, &client_ip(&headers))
        .await?;
    Ok(Json(session))
}

async fn auth_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = identity_or_unauthorized(&state)?;
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
    identity.logout(token).await?;
    Ok(Json(json!({ "status": "signed_out" })))
}

async fn auth_refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<Value>, ApiError> {
    let identity = identity_or_unauthorized(&state)?;
    Ok(Json(identity.refresh(&request.refresh_token).await?))
}

async fn auth_reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> Json<Value> {
    if let Some(identity) = &state.identity {
        identity.reset_password(&request.email).await;
    }
    // Account existence is never revealed here.
    Json(json!({ "status": "ok", "message": "If the account exists, a reset email was sent" }))
}

async fn auth_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let context = require_auth(&state, &headers).await?;
    Ok(Json(json!({ "id": context.user_id, "email": context.email })))
}

// --- events ---------------------------------------------------------------

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
    severity: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    source_ip: Option<String>,
    from: Option<String>,
    to: Option<String>,
    flagged: Option<bool>,
}

fn parse_severity(value: &str) -> Result<Severity, ApiError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| ApiError::BadRequest(format!("unknown severity '{value}'")))
}

fn parse_kind(value: &str) -> Result<EventKind, ApiError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| ApiError::BadRequest(format!("unknown event type '{value}'")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("unparseable timestamp '{value}'")))
}

async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;

    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    if limit == 0 || limit > EVENT_LIMIT_MAX {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {EVENT_LIMIT_MAX}"
        )));
    }

    let filter = EventFilter {
        limit,
        severity: query.severity.as_deref().map(parse_severity).transpose()?,
        kind: query.kind.as_deref().map(parse_kind).transpose()?,
        source_ip: query.source_ip,
        from: query.from.as_deref().map(parse_timestamp).transpose()?,
        to: query.to.as_deref().map(parse_timestamp).transpose()?,
        flagged: query.flagged,
    };

    let events = state
        .pipeline
        .store()
        .list_events(&filter)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "event listing degraded to empty");
            Vec::new()
        });
    Ok(Json(json!({ "events": events })))
}

// --- incidents ------------------------------------------------------------

#[derive(Deserialize, Default)]
struct IncidentsQuery {
    status: Option<String>,
    severity: Option<String>,
    limit: Option<usize>,
}

async fn list_incidents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IncidentsQuery>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;

    let status = query
        .status
        .as_deref()
        .map(|s| {
            serde_json::from_value::<IncidentStatus>(Value::String(s.to_string()))
                .map_err(|_| ApiError::BadRequest(format!("unknown status '{s}'")))
        })
        .transpose()?;

    let filter = IncidentFilter {
        status,
        severity: query.severity.as_deref().map(parse_severity).transpose()?,
        limit: query.limit.unwrap_or(0),
    };

    let incidents = state
        .pipeline
        .store()
        .list_incidents(&filter)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "incident listing degraded to empty");
            Vec::new()
        });
    Ok(Json(json!({ "incidents": incidents })))
}

async fn incident_counts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;

    let incidents = state
        .pipeline
        .store()
        .list_incidents(&IncidentFilter::default())
        .await
        .unwrap_or_default();

    let count_status = |status: IncidentStatus| -> usize {
        incidents.iter().filter(|i| i.status == status).count()
    };
    let count_severity =
        |severity: Severity| -> usize { incidents.iter().filter(|i| i.severity == severity).count() };

    Ok(Json(json!({
        "total": incidents.len(),
        "active": count_status(IncidentStatus::Active),
        "investigating": count_status(IncidentStatus::Investigating),
        "resolved": count_status(IncidentStatus::Resolved),
        "by_severity": {
            "low": count_severity(Severity::Low),
            "medium": count_severity(Severity::Medium),
            "high": count_severity(Severity::High),
            "critical": count_severity(Severity::Critical),
        },
    })))
}

async fn load_incident(state: &AppState, id: &str) -> Result<Incident, ApiError> {
    state
        .pipeline
        .store()
        .get_incident(id)
        .await
        .map_err(|e| {
            warn!(error = %e, incident = id, "incident lookup failed");
            ApiError::NotFound(format!("incident {id} not found"))
        })?
        .ok_or_else(|| ApiError::NotFound(format!("incident {id} not found")))
}

async fn get_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Incident>, ApiError> {
    require_auth(&state, &headers).await?;
    Ok(Json(load_incident(&state, &id).await?))
}

#[derive(Deserialize, Default)]
struct ResolveRequest {
    #[serde(default)]
    resolution_notes: Option<String>,
}

async fn resolve_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Value>, ApiError> {
    let context = require_auth(&state, &headers).await?;
    let mut incident = load_incident(&state, &id).await?;

    // Resolving twice is a no-op: no state change, no extra broadcast.
    if incident.status == IncidentStatus::Resolved {
        return Ok(Json(json!({ "status": "resolved", "incident": incident })));
    }

    let now = Utc::now();
    incident.status = IncidentStatus::Resolved;
    incident.resolved_at = Some(now);
    incident.updated_at = now;
    incident.resolution_notes = body.resolution_notes;
    incident.resolved_by = Some(context.email.clone());

    if let Err(e) = state.pipeline.store().update_incident(&incident).await {
        warn!(error = %e, incident = %incident.id, "incident resolve persistence failed");
    }
    if let Err(e) = state
        .pipeline
        .store()
        .log_audit("incident_resolved", &incident.id)
        .await
    {
        warn!(error = %e, "audit write failed");
    }

    if let Ok(data) = serde_json::to_value(&incident) {
        state
            .pipeline
            .hub()
            .broadcast(BroadcastKind::IncidentResolved, data);
    }
    info!(incident = %incident.id, by = %context.email, "incident resolved");
    Ok(Json(json!({ "status": "resolved", "incident": incident })))
}

async fn investigate_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let mut incident = load_incident(&state, &id).await?;

    if incident.status == IncidentStatus::Resolved {
        return Err(ApiError::BadRequest(
            "incident is already resolved".to_string(),
        ));
    }
    if incident.status == IncidentStatus::Investigating {
        return Ok(Json(json!({ "status": "investigating", "incident": incident })));
    }

    incident.status = IncidentStatus::Investigating;
    incident.updated_at = Utc::now();

    if let Err(e) = state.pipeline.store().update_incident(&incident).await {
        warn!(error = %e, incident = %incident.id, "incident update persistence failed");
    }
    if let Ok(data) = serde_json::to_value(&incident) {
        state
            .pipeline
            .hub()
            .broadcast(BroadcastKind::IncidentUpdated, data);
    }
    Ok(Json(json!({ "status": "investigating", "incident": incident })))
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let stats = state
        .pipeline
        .store()
        .get_stats()
        .await
        .unwrap_or_default();
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

// --- reports --------------------------------------------------------------

#[derive(Deserialize, Default)]
struct ReportsQuery {
    limit: Option<usize>,
}

async fn list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let reports = state
        .pipeline
        .store()
        .list_reports(query.limit.unwrap_or(50))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "report listing degraded to empty");
            Vec::new()
        });
    Ok(Json(json!({ "reports": reports })))
}

async fn get_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(incident_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let report = state
        .pipeline
        .store()
        .get_report(&incident_id)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ApiError::NotFound(format!("report for incident {incident_id} not found")))?;
    Ok(Json(serde_json::to_value(report).unwrap_or_default()))
}

// --- simulation -----------------------------------------------------------

#[derive(Deserialize)]
struct AttackSimulationRequest {
    attack_type: String,
    #[serde(default = "default_target")]
    target: String,
}

fn default_target() -> String {
    "192.168.1.100".to_string()
}

async fn simulate_attack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AttackSimulationRequest>,
) -> Result<Json<Value>, ApiError> {
    // Auth is optional here so demos can inject without a session, but a
    // presented token is still validated.
    if state.identity.is_some() && bearer_token(&headers).is_some() {
        require_auth(&state, &headers).await?;
    }

    let events = state
        .pipeline
        .start_chain(&request.attack_type, &request.target)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("unknown attack chain '{}'", request.attack_type))
        })?;

    if let Err(e) = state
        .pipeline
        .store()
        .log_audit("attack_simulated", &request.attack_type)
        .await
    {
        warn!(error = %e, "audit write failed");
    }
    info!(attack = %request.attack_type, events, "attack simulation accepted");
    Ok(Json(json!({
        "status": "attack_simulation_started",
        "attack_type": request.attack_type,
        "events": events,
    })))
}

// --- model ----------------------------------------------------------------

async fn ml_train(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;

    match state.pipeline.train_model().await {
        Ok(summary) => Ok(Json(json!({
            "status": "model_trained",
            "samples": summary.samples,
            "features_per_sample": summary.features_per_sample,
            "feature_names": summary.feature_names,
            "contamination": summary.contamination,
            "threshold": summary.threshold,
        }))),
        Err(aegis_core::ml::ModelError::NotEnoughData {
            min_required,
            current_count,
        }) => Ok(Json(json!({
            "status": "error",
            "error": "Not enough data to train model",
            "min_required": min_required,
            "current_count": current_count,
        }))),
        Err(e) => Ok(Json(json!({ "status": "error", "error": e.to_string() }))),
    }
}

async fn ml_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    Ok(Json(state.pipeline.ml_status()))
}

// --- summarization --------------------------------------------------------

async fn summarize_incident(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let incident = load_incident(&state, &id).await?;
    let mut report = state
        .pipeline
        .store()
        .get_report(&id)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ApiError::NotFound(format!("report for incident {id} not found")))?;

    let summary = state.summarizer.summarize(&incident, &report).await;
    report.summary = Some(summary.clone());
    if let Err(e) = state.pipeline.store().update_report(&report).await {
        warn!(error = %e, incident = %id, "summary persistence failed");
    }

    Ok(Json(json!({ "incident_id": id, "summary": summary })))
}

// --- manual response ------------------------------------------------------

#[derive(Deserialize)]
struct IsolateRequest {
    pid: u32,
    incident_id: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn response_isolate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IsolateRequest>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let record = state
        .pipeline
        .response()
        .isolate_process(
            request.pid,
            &request.incident_id,
            request.reason.as_deref().unwrap_or("Operator action"),
        )
        .await;
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}

#[derive(Deserialize)]
struct QuarantineRequest {
    source_ip: String,
    incident_id: String,
    #[serde(default)]
    device_id: Option<String>,
}

async fn response_quarantine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QuarantineRequest>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let device_id = request
        .device_id
        .unwrap_or_else(|| format!("device_{}", request.source_ip));
    let record = state
        .pipeline
        .response()
        .quarantine_device(&device_id, &request.source_ip, &request.incident_id)
        .await;
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}

#[derive(Deserialize)]
struct RevokeRequest {
    user: String,
    incident_id: String,
}

async fn response_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RevokeRequest>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let record = state
        .pipeline
        .response()
        .revoke_user_session(&request.user, &request.incident_id)
        .await;
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}

#[derive(Deserialize)]
struct EscalateRequest {
    incident_id: String,
}

async fn response_escalate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EscalateRequest>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let incident = load_incident(&state, &request.incident_id).await?;
    let record = state.pipeline.response().escalate_notification(
        &incident.id,
        incident.severity,
        incident.threat_type,
    );
    Ok(Json(serde_json::to_value(record).unwrap_or_default()))
}

#[derive(Deserialize, Default)]
struct ActionsQuery {
    limit: Option<usize>,
}

async fn response_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActionsQuery>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let actions = state.pipeline.response().action_log(query.limit.unwrap_or(50));
    Ok(Json(json!({ "actions": actions })))
}

async fn response_quarantined(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers).await?;
    let devices = state.pipeline.response().quarantined_devices();
    Ok(Json(json!({ "devices": devices })))
}

// --- websocket ------------------------------------------------------------

async fn websocket_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| subscriber_session(socket, state))
}

/// One subscriber session: server-push only. Client frames are read and
/// discarded as keep-alives; the session ends on either side closing or on
/// the first failed send.
async fn subscriber_session(mut socket: WebSocket, state: AppState) {
    let (id, mut rx) = state.pipeline.hub().connect();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(_)) => {} // keep-alive, discarded
                    _ => break,
                }
            }
        }
    }

    state.pipeline.hub().disconnect(id);
}
