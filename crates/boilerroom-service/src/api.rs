//! HTTP command surface.
//!
//! Every `GET /api/plant/...` endpoint returns the formatted text of one
//! subsystem as `{"text": "..."}`, ready to be relayed to an operator chat.
//! `GET /api/status` returns the same information in machine-readable form.
//!
//! # Example
//!
//! ```ignore
//! use boilerroom_service::api;
//!
//! let app = api::router().with_state(plant);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use boilerroom_core::TransportSnapshot;
use boilerroom_types::RelayOverride;

use crate::plant::Plant;

/// Create the API router.
pub fn router() -> Router<Arc<Plant>> {
    Router::new()
        // Service
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Operator commands
        .route("/api/plant", get(overview))
        .route("/api/plant/health", get(plant_health))
        .route("/api/plant/heat-demand", get(heat_demand))
        .route("/api/plant/boiler", get(boiler))
        .route("/api/plant/relay", get(relay).post(set_relay))
        .route("/api/plant/valve", get(valve))
        .route("/api/plant/alarms", get(alarms))
        .route("/api/plant/bus", get(bus))
        .route("/api/plant/summary", get(summary))
        .route("/api/plant/relay/force-on", post(force_on))
        .route("/api/plant/relay/force-off", post(force_off))
        .route("/api/plant/relay/auto", post(release))
}

/// Service liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Service liveness. Plant health is at `/api/plant/health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Machine-readable plant status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_seconds: u64,
    pub health: &'static str,
    pub heat_demand: &'static str,
    pub boiler: &'static str,
    pub relay_mode: RelayOverride,
    pub relay_on: Option<bool>,
    pub valve_percent: Option<u8>,
    pub transport: TransportSnapshot,
}

async fn get_status(State(plant): State<Arc<Plant>>) -> Json<StatusResponse> {
    let now = OffsetDateTime::now_utc();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_seconds: (now - plant.started_at()).whole_seconds().max(0) as u64,
        health: plant.health().label(),
        heat_demand: plant.heat_demand().label(),
        boiler: plant.boiler().label(),
        relay_mode: plant.relay().mode(),
        relay_on: plant.relay().relay_on(),
        valve_percent: plant.valve().position().map(|p| p.percent()),
        transport: plant.transport().snapshot(),
    })
}

/// Formatted text for an operator.
#[derive(Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

impl From<String> for TextResponse {
    fn from(text: String) -> Self {
        Self { text }
    }
}

async fn overview(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.overview().into())
}

async fn plant_health(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.health_status().into())
}

async fn heat_demand(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.heat_demand_status().into())
}

async fn boiler(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.boiler_status().into())
}

async fn relay(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.relay_status().into())
}

async fn valve(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.valve_status().into())
}

async fn alarms(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.alarms_status().into())
}

async fn bus(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.transport_status().into())
}

async fn summary(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.summary().into())
}

/// Request body for `POST /api/plant/relay`.
#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub mode: RelayOverride,
}

async fn set_relay(
    State(plant): State<Arc<Plant>>,
    Json(request): Json<RelayRequest>,
) -> Json<TextResponse> {
    Json(plant.set_boiler_override(request.mode).await.into())
}

async fn force_on(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.set_boiler_override(RelayOverride::ForceOn).await.into())
}

async fn force_off(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.set_boiler_override(RelayOverride::ForceOff).await.into())
}

async fn release(State(plant): State<Arc<Plant>>) -> Json<TextResponse> {
    Json(plant.set_boiler_override(RelayOverride::Auto).await.into())
}
