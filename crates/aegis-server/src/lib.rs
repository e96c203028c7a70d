//! Aegis SOC backend service.
//!
//! Wires the detection core against the store gateway, subscriber hub,
//! response executor and external collaborators, and serves the operator
//! HTTP/WebSocket surface.

pub mod auth;
pub mod config;
pub mod demo;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod response;
pub mod routes;
pub mod store;
pub mod summarize;

use std::sync::Arc;

use tracing::warn;

use aegis_core::detect::RuleEngine;
use aegis_core::forensics::{ForensicsEngine, HostInspector, SimulatedHost};

use auth::IdentityClient;
use config::Config;
use hub::Hub;
use pipeline::{ModelHandle, Pipeline};
use response::ResponseEngine;
use routes::AppState;
use store::{MemoryStore, RestStore, StoreGateway};
use summarize::Summarizer;

/// Composition root: build the collaborator graph from configuration.
///
/// An empty store URL (or a store that rejects its key) selects the
/// in-memory backend so the service always comes up.
pub fn build_state(config: &Config) -> AppState {
    let store: Arc<dyn StoreGateway> = if config.store_url.is_empty() {
        Arc::new(MemoryStore::new())
    } else {
        match RestStore::new(&config.store_url, &config.store_key) {
            Ok(rest) => Arc::new(rest),
            Err(e) => {
                warn!(error = %e, "REST store unusable, falling back to in-memory");
                Arc::new(MemoryStore::new())
            }
        }
    };

    let inspector: Arc<dyn HostInspector> = if config.demo_mode {
        Arc::new(demo::DemoHost)
    } else {
        Arc::new(SimulatedHost)
    };

    let hub = Arc::new(Hub::new());
    let identity = IdentityClient::new(&config.identity_url, &config.identity_key).map(Arc::new);

    let response = Arc::new(ResponseEngine::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&inspector),
        identity.clone(),
        config.alert_recipients.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        store,
        hub,
        Arc::new(RuleEngine::new()),
        Arc::new(ModelHandle::new()),
        Arc::new(ForensicsEngine::new(inspector)),
        response,
        config.ml_anomaly_threshold,
        config.ml_contamination,
    ));

    let summarizer = Arc::new(Summarizer::new(
        &config.llm_api_url,
        &config.llm_api_key,
        config.demo_mode,
    ));

    AppState {
        pipeline,
        identity,
        summarizer,
    }
}
