use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::correlation::ConnectionSummary;
use crate::http::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub jobs_enabled: bool,
    pub services: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        connections: state.store.len(),
        jobs_enabled: state.jobs.is_some(),
        services: state.proxy.services().len(),
    })
}

/// Registered job connections and how many keys each has issued.
pub async fn get_connections(State(state): State<AppState>) -> Json<Vec<ConnectionSummary>> {
    Json(state.store.summaries())
}
