//! The incident materializer.
//!
//! Every event flows through the same sequence: derive features, score,
//! rule-evaluate, escalate ML-only anomalies, persist, materialize any
//! detection as an incident with an attached forensic report, broadcast,
//! and hand critical incidents to the response executor. Each step catches
//! and logs its own failures so one bad event or a flaky store never halts
//! the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aegis_core::detect::{RuleEngine, Threat};
use aegis_core::event::{generate_id, Event, Incident, IncidentStatus, Severity, ThreatType};
use aegis_core::forensics::ForensicsEngine;
use aegis_core::ml::features::{derive_context, feature_vector, FEATURE_NAMES};
use aegis_core::ml::{AnomalyModel, ModelError, MIN_TRAINING_SAMPLES};
use aegis_core::telemetry::{AttackChainGenerator, TelemetryGenerator};

use crate::hub::{BroadcastKind, Hub};
use crate::metrics;
use crate::response::ResponseEngine;
use crate::store::{EventFilter, StoreGateway};

/// Pause between chain events so window-based detectors see a realistic
/// arrival pattern.
const CHAIN_STEP_DELAY: Duration = Duration::from_millis(300);

/// Events pulled from the store for a training run.
const TRAINING_FETCH_LIMIT: usize = 200;

/// Shared handle to the current model. Replaced atomically on retrain;
/// scorers clone the inner `Arc` and read without further locking.
#[derive(Default)]
pub struct ModelHandle {
    inner: RwLock<Option<Arc<AnomalyModel>>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<AnomalyModel>> {
        self.inner.read().unwrap().clone()
    }

    pub fn replace(&self, model: AnomalyModel) {
        *self.inner.write().unwrap() = Some(Arc::new(model));
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().unwrap().is_some()
    }
}

/// Successful training statistics, mirrored into the API response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainSummary {
    pub samples: usize,
    pub features_per_sample: usize,
    pub feature_names: Vec<&'static str>,
    pub contamination: f64,
    pub threshold: f64,
}

pub struct Pipeline {
    store: Arc<dyn StoreGateway>,
    hub: Arc<Hub>,
    rules: Arc<RuleEngine>,
    model: Arc<ModelHandle>,
    forensics: Arc<ForensicsEngine>,
    response: Arc<ResponseEngine>,
    generator: Mutex<TelemetryGenerator>,
    chains: AttackChainGenerator,
    threshold: f64,
    contamination: f64,
    generator_running: AtomicBool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StoreGateway>,
        hub: Arc<Hub>,
        rules: Arc<RuleEngine>,
        model: Arc<ModelHandle>,
        forensics: Arc<ForensicsEngine>,
        response: Arc<ResponseEngine>,
        threshold: f64,
        contamination: f64,
    ) -> Self {
        Self {
            store,
            hub,
            rules,
            model,
            forensics,
            response,
            generator: Mutex::new(TelemetryGenerator::new()),
            chains: AttackChainGenerator::new(),
            threshold,
            contamination,
            generator_running: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn StoreGateway> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn response(&self) -> &Arc<ResponseEngine> {
        &self.response
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn generator_running(&self) -> bool {
        self.generator_running.load(Ordering::Relaxed)
    }

    /// Run one event through the full pipeline. Returns the materialized
    /// incident, if the event produced one.
    pub async fn process_event(&self, mut event: Event) -> Option<Incident> {
        metrics::EVENTS_TOTAL.inc();

        // 1. Store-backed feature context. Enrichment is idempotent: an
        //    already-attached context is kept as-is.
        if event.ml_context.is_none() {
            event.ml_context = Some(derive_context(&event, self.store.as_ref()).await);
        }

        // 2. Anomaly score. An unloaded model scores (0, false).
        let (score, flagged) = match self.model.current() {
            Some(model) => model.predict(&event, self.threshold),
            None => (0.0, false),
        };
        event.anomaly_score = score;
        event.ml_flagged = flagged;
        if flagged {
            metrics::ML_FLAGGED_TOTAL.inc();
        }

        // 3. Rule evaluation, then 4. ML escalation when rules stay quiet.
        let threat = self.rules.analyze(&event).or_else(|| {
            flagged.then(|| Threat {
                threat_type: ThreatType::MlAnomaly,
                severity: Severity::High,
                description: format!(
                    "ML anomaly detected: behavioral outlier with score {score:.2}"
                ),
                confidence: score,
                indicators: vec![
                    format!("Anomaly score: {score:.2}"),
                    format!("Source IP: {}", event.source_ip),
                    format!("Event type: {}", event.kind.as_str()),
                ],
            })
        });

        // 5. Persist. A store failure is logged and never blocks broadcast.
        if let Err(e) = self.store.insert_event(&event).await {
            warn!(event = %event.id, error = %e, "event persistence failed");
        }

        // 6. Materialize the detection.
        let incident = match threat {
            Some(threat) => self.materialize(&event, threat).await,
            None => None,
        };

        // 7. Fan the enriched event out.
        match serde_json::to_value(&event) {
            Ok(data) => self.hub.broadcast(BroadcastKind::NewEvent, data),
            Err(e) => error!(event = %event.id, error = %e, "event serialization failed"),
        }

        incident
    }

    async fn materialize(&self, event: &Event, threat: Threat) -> Option<Incident> {
        let now = Utc::now();
        let incident = Incident {
            id: generate_id(),
            threat_type: threat.threat_type,
            severity: threat.severity,
            description: threat.description.clone(),
            confidence: threat.confidence,
            indicators: threat.indicators.clone(),
            event_id: event.id.clone(),
            source_ip: event.source_ip.clone(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status: IncidentStatus::Active,
            resolution_notes: None,
            resolved_by: None,
        };

        info!(
            incident = %incident.id,
            threat = threat.threat_type.as_str(),
            severity = threat.severity.as_str(),
            confidence = threat.confidence,
            "incident materialized"
        );
        metrics::INCIDENTS_TOTAL.inc();

        if let Err(e) = self.store.insert_incident(&incident).await {
            warn!(incident = %incident.id, error = %e, "incident persistence failed");
        }

        let report = self.forensics.capture(event, &threat, &incident.id);
        if let Err(e) = self.store.insert_report(&report).await {
            warn!(incident = %incident.id, error = %e, "forensic report persistence failed");
        }

        let kind = if incident.severity == Severity::Critical {
            BroadcastKind::CriticalAlert
        } else {
            BroadcastKind::NewIncident
        };
        match serde_json::to_value(&incident) {
            Ok(data) => self.hub.broadcast(kind, data),
            Err(e) => error!(incident = %incident.id, error = %e, "incident serialization failed"),
        }

        if incident.severity == Severity::Critical {
            self.response.execute(&incident, event).await;
        }

        Some(incident)
    }

    /// Emit and process one generated event.
    pub async fn tick(&self) -> Option<Incident> {
        let event = self.generator.lock().unwrap().generate();
        self.process_event(event).await
    }

    /// Replay a named attack chain through the pipeline. `None` means the
    /// chain name is unknown.
    pub fn start_chain(self: &Arc<Self>, attack_type: &str, target: &str) -> Option<usize> {
        let events = self.chains.generate(attack_type, target)?;
        let count = events.len();
        let pipeline = Arc::clone(self);
        let attack = attack_type.to_string();
        tokio::spawn(async move {
            info!(attack = %attack, events = count, "attack chain injection started");
            for event in events {
                pipeline.process_event(event).await;
                tokio::time::sleep(CHAIN_STEP_DELAY).await;
            }
            info!(attack = %attack, "attack chain injection finished");
        });
        Some(count)
    }

    /// Replay a chain inline, without the background task or inter-event
    /// delay compression. Used by tests and synchronous callers.
    pub async fn run_chain_now(&self, attack_type: &str, target: &str) -> Option<Vec<Incident>> {
        let events = self.chains.generate(attack_type, target)?;
        let mut incidents = Vec::new();
        for event in events {
            if let Some(incident) = self.process_event(event).await {
                incidents.push(incident);
            }
        }
        Some(incidents)
    }

    /// Long-running generator task; cancellation is observed at the next
    /// sleep boundary.
    pub fn spawn_generator(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        pipeline.generator_running.store(true, Ordering::Relaxed);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "telemetry generator started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        pipeline.tick().await;
                    }
                }
            }
            pipeline.generator_running.store(false, Ordering::Relaxed);
            info!("telemetry generator stopped");
        })
    }

    /// Load the persisted model blob, if any, before the pipeline opens.
    pub async fn load_model(&self) -> Result<bool, ModelError> {
        let blob = match self.store.load_model_blob().await {
            Ok(Some(blob)) => blob,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(error = %e, "model blob load failed");
                return Ok(false);
            }
        };
        let model = AnomalyModel::from_blob(&blob)?;
        info!(samples = model.training_samples, "anomaly model loaded from store");
        self.model.replace(model);
        Ok(true)
    }

    /// Train on recent persisted events and replace the model in place.
    pub async fn train_model(&self) -> Result<TrainSummary, ModelError> {
        let events = self
            .store
            .list_events(&EventFilter::with_limit(TRAINING_FETCH_LIMIT))
            .await
            .unwrap_or_default();

        if events.len() < MIN_TRAINING_SAMPLES {
            return Err(ModelError::NotEnoughData {
                min_required: MIN_TRAINING_SAMPLES,
                current_count: events.len(),
            });
        }

        let mut matrix = Vec::with_capacity(events.len());
        for mut event in events {
            if event.ml_context.is_none() {
                event.ml_context = Some(derive_context(&event, self.store.as_ref()).await);
            }
            matrix.push(feature_vector(&event));
        }

        let model = AnomalyModel::train(&matrix, self.contamination)?;
        let summary = TrainSummary {
            samples: model.training_samples,
            features_per_sample: FEATURE_NAMES.len(),
            feature_names: FEATURE_NAMES.to_vec(),
            contamination: self.contamination,
            threshold: self.threshold,
        };

        match model.to_blob() {
            Ok(blob) => {
                if let Err(e) = self.store.save_model_blob(&blob).await {
                    warn!(error = %e, "model blob persistence failed");
                }
            }
            Err(e) => warn!(error = %e, "model serialization failed"),
        }

        info!(samples = summary.samples, "anomaly model trained");
        self.model.replace(model);
        Ok(summary)
    }

    /// Model lifecycle status for the operator surface.
    pub fn ml_status(&self) -> serde_json::Value {
        match self.model.current() {
            Some(model) => json!({
                "is_trained": true,
                "training_samples": model.training_samples,
                "feature_names": model.feature_names,
                "contamination": model.contamination,
                "threshold": self.threshold,
            }),
            None => json!({
                "is_trained": false,
                "training_samples": 0,
                "feature_names": FEATURE_NAMES,
                "contamination": self.contamination,
                "threshold": self.threshold,
            }),
        }
    }
}
