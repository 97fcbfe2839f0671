//! Error types for the vault keeper

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_orchestrator::{ErrorKind, ExecutionError, OrchestratorError};

use crate::types::ConfirmationResponse;

/// Keeper error types
#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,

    /// Raw program error code of a reverted simulation or rejected batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_code: Option<u32>,

    /// Batches that stayed confirmed before the failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmed: Vec<ConfirmationResponse>,

    /// Failure to close a wrapped-asset account, reported alongside the
    /// primary error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
}

fn classify(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::State => (StatusCode::CONFLICT, "STATE_ERROR"),
        ErrorKind::Simulation => (StatusCode::UNPROCESSABLE_ENTITY, "SIMULATION_REVERTED"),
        ErrorKind::BatchConfirmation => (StatusCode::BAD_GATEWAY, "BATCH_REJECTED"),
        ErrorKind::Configuration => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
        ErrorKind::ResourceLifecycle => (StatusCode::INTERNAL_SERVER_ERROR, "RESOURCE_LIFECYCLE"),
        ErrorKind::Transport => (StatusCode::SERVICE_UNAVAILABLE, "TRANSPORT_ERROR"),
        ErrorKind::Math => (StatusCode::UNPROCESSABLE_ENTITY, "MATH_ERROR"),
        ErrorKind::Input => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
    }
}

fn program_code(err: &OrchestratorError) -> Option<u32> {
    match err {
        OrchestratorError::SimulationReverted { code, .. }
        | OrchestratorError::BatchRejected { code, .. } => *code,
        _ => None,
    }
}

impl IntoResponse for KeeperError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            KeeperError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            KeeperError::Orchestrator(err) => classify(err.kind()),
            KeeperError::Execution(err) => classify(err.kind()),
        };

        let body = match self {
            KeeperError::Execution(err) => ErrorResponse {
                error: err.source.to_string(),
                code: code.to_string(),
                program_code: program_code(&err.source),
                confirmed: err.confirmed.iter().map(ConfirmationResponse::from).collect(),
                cleanup: err.cleanup.as_ref().map(ToString::to_string),
            },
            KeeperError::Orchestrator(err) => ErrorResponse {
                error: err.to_string(),
                code: code.to_string(),
                program_code: program_code(&err),
                confirmed: Vec::new(),
                cleanup: None,
            },
            KeeperError::BadRequest(message) => ErrorResponse {
                error: format!("Invalid request: {message}"),
                code: code.to_string(),
                program_code: None,
                confirmed: Vec::new(),
                cleanup: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for keeper handlers
pub type Result<T> = std::result::Result<T, KeeperError>;
