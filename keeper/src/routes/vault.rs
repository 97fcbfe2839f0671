//! Vault endpoints

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tracing::info;
use vault_orchestrator::{Confirmation, Ledger, VaultOrchestrator, Venue};

use crate::{
    error::{KeeperError, Result},
    types::{
        ConfirmationResponse, DepositRequest, ExecutionResponse, PreviewResponse,
        RebalanceRequest, VaultResponse, VenueValueResponse, WithdrawRequest,
    },
};

/// Orchestrator shared between the routes and the rebalance loop. Calls are
/// serialized: each one reloads the record it started from.
pub type SharedOrchestrator<L> = Arc<Mutex<VaultOrchestrator<L>>>;

/// Application state shared across handlers
pub struct AppState<L: Ledger> {
    pub orchestrator: SharedOrchestrator<L>,
}

impl<L: Ledger> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

/// Create vault router
pub fn vault_router<L: Ledger + 'static>(orchestrator: SharedOrchestrator<L>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/api/vault", get(vault_summary::<L>))
        .route("/api/vault/venues/{venue}", get(venue_value::<L>))
        .route("/api/vault/preview/deposit/{amount}", get(preview_deposit::<L>))
        .route("/api/vault/preview/withdraw/{amount}", get(preview_withdraw::<L>))
        .route("/api/vault/reload", post(reload::<L>))
        .route("/api/vault/rebalance", post(rebalance::<L>))
        .route("/api/vault/deposit", post(deposit::<L>))
        .route("/api/vault/withdraw", post(withdraw::<L>))
        .with_state(state)
}

fn parse_amount(amount: &str) -> Result<u64> {
    amount
        .parse()
        .map_err(|_| KeeperError::BadRequest(format!("amount {amount:?} is not a u64")))
}

fn parse_venue(venue: &str) -> Result<Venue> {
    Venue::from_str(venue).map_err(|_| KeeperError::BadRequest(format!("unknown venue {venue:?}")))
}

fn parse_pubkey(key: &str) -> Result<Pubkey> {
    Pubkey::from_str(key).map_err(|e| KeeperError::BadRequest(format!("{key}: {e}")))
}

fn execution_response<L: Ledger>(
    orchestrator: &VaultOrchestrator<L>,
    confirmed: &[Confirmation],
) -> ExecutionResponse {
    ExecutionResponse {
        confirmations: confirmed.iter().map(ConfirmationResponse::from).collect(),
        total_value: orchestrator.total_value().to_string(),
    }
}

/// Cached vault snapshot
///
/// GET /api/vault
async fn vault_summary<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
) -> Result<Json<VaultResponse>> {
    let record = state.orchestrator.lock().await.record();
    let exchange_rate = record.exchange_rate().as_decimal()?.to_string();
    Ok(Json(VaultResponse::from_record(&record, exchange_rate)))
}

/// Cached value of one venue
///
/// GET /api/vault/venues/{venue}
async fn venue_value<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
    Path(venue): Path<String>,
) -> Result<Json<VenueValueResponse>> {
    let venue = parse_venue(&venue)?;
    let value = state.orchestrator.lock().await.venue_value(venue)?;
    Ok(Json(VenueValueResponse {
        venue,
        value: value.to_string(),
    }))
}

/// GET /api/vault/preview/deposit/{amount}
async fn preview_deposit<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
    Path(amount): Path<String>,
) -> Result<Json<PreviewResponse>> {
    let amount = parse_amount(&amount)?;
    let shares = state.orchestrator.lock().await.preview_deposit(amount)?;
    Ok(Json(PreviewResponse {
        amount: amount.to_string(),
        shares: shares.to_string(),
    }))
}

/// GET /api/vault/preview/withdraw/{amount}
async fn preview_withdraw<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
    Path(amount): Path<String>,
) -> Result<Json<PreviewResponse>> {
    let amount = parse_amount(&amount)?;
    let shares = state.orchestrator.lock().await.preview_withdraw(amount)?;
    Ok(Json(PreviewResponse {
        amount: amount.to_string(),
        shares: shares.to_string(),
    }))
}

/// Re-read the vault from the ledger
///
/// POST /api/vault/reload
async fn reload<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
) -> Result<Json<VaultResponse>> {
    let record = state.orchestrator.lock().await.reload().await?;
    info!(version = record.version, "Vault reloaded");
    let exchange_rate = record.exchange_rate().as_decimal()?.to_string();
    Ok(Json(VaultResponse::from_record(&record, exchange_rate)))
}

/// Simulate, plan and submit a rebalance
///
/// POST /api/vault/rebalance
async fn rebalance<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
    Json(req): Json<RebalanceRequest>,
) -> Result<Json<ExecutionResponse>> {
    info!(proposed_weights = req.weights.is_some(), "Rebalance requested");

    let mut orchestrator = state.orchestrator.lock().await;
    let confirmed = orchestrator.rebalance(req.weights).await?;
    Ok(Json(execution_response(&orchestrator, &confirmed)))
}

/// POST /api/vault/deposit
async fn deposit<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<ExecutionResponse>> {
    let amount = parse_amount(&req.amount)?;
    let source = req.source.as_deref().map(parse_pubkey).transpose()?;
    info!(amount, source = ?source, "Deposit requested");

    let mut orchestrator = state.orchestrator.lock().await;
    let confirmed = orchestrator.deposit(amount, source).await?;
    Ok(Json(execution_response(&orchestrator, &confirmed)))
}

/// POST /api/vault/withdraw
async fn withdraw<L: Ledger + 'static>(
    State(state): State<AppState<L>>,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<ExecutionResponse>> {
    let amount = parse_amount(&req.amount)?;
    info!(amount, "Withdraw requested");

    let mut orchestrator = state.orchestrator.lock().await;
    let confirmed = orchestrator.withdraw(amount).await?;
    Ok(Json(execution_response(&orchestrator, &confirmed)))
}
