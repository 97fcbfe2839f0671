//! Health endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use vault_orchestrator::Ledger;

use super::SharedOrchestrator;
use crate::types::HealthResponse;

/// Health router; stays outside API key checks
pub fn health_router<L: Ledger + 'static>(orchestrator: SharedOrchestrator<L>) -> Router {
    Router::new()
        .route("/health", get(health_check::<L>))
        .with_state(orchestrator)
}

/// Reports the cached snapshot. Never waits on an in-flight call: while one
/// holds the orchestrator the status is `busy` and no snapshot is attached.
async fn health_check<L: Ledger + 'static>(
    State(orchestrator): State<SharedOrchestrator<L>>,
) -> Json<HealthResponse> {
    let record = orchestrator.try_lock().ok().map(|guard| guard.record());

    let status = match &record {
        None => "busy",
        Some(record) if !record.account.halt_flags().is_empty() => "halted",
        Some(_) => "healthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        vault: record.as_ref().map(|record| record.address.to_string()),
        snapshot_version: record.as_ref().map(|record| record.version),
        timestamp: Utc::now().timestamp(),
    })
}
