//! Request and response types for the vault keeper

use serde::{Deserialize, Serialize};
use vault_orchestrator::{Confirmation, ProposedWeights, VaultRecord, Venue};

/// Request body for POST /api/vault/deposit
#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    /// Reserve units to deposit (as string to handle u64)
    pub amount: String,

    /// Reserve token account to draw from (base58). Defaults to the
    /// keeper's associated reserve account; ignored for native reserves.
    #[serde(default)]
    pub source: Option<String>,
}

/// Request body for POST /api/vault/withdraw
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    /// Reserve units to withdraw (as string to handle u64)
    pub amount: String,
}

/// Request body for POST /api/vault/rebalance
#[derive(Debug, Default, Deserialize)]
pub struct RebalanceRequest {
    /// Operator weights as `[venue, bps]` pairs. Omitted when the vault
    /// derives its own weights.
    #[serde(default)]
    pub weights: Option<ProposedWeights>,
}

/// One confirmed batch
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmationResponse {
    pub batch: usize,
    pub kind: String,
    pub signature: String,
}

impl From<&Confirmation> for ConfirmationResponse {
    fn from(confirmation: &Confirmation) -> Self {
        Self {
            batch: confirmation.batch,
            kind: confirmation.kind.to_string(),
            signature: confirmation.signature.to_string(),
        }
    }
}

/// Response of a call that submits batches
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionResponse {
    /// Confirmed batches in submission order; empty when nothing was needed
    pub confirmations: Vec<ConfirmationResponse>,

    /// Total value after the call's reload (as string to handle u64)
    pub total_value: String,
}

/// Cached allocation of one venue
#[derive(Debug, Serialize, Deserialize)]
pub struct VenueResponse {
    pub venue: Venue,
    pub value: String,
    pub target: String,
    pub stale: bool,
}

/// Snapshot of the cached vault record
#[derive(Debug, Serialize, Deserialize)]
pub struct VaultResponse {
    pub address: String,
    /// Increases with every reload
    pub snapshot_version: u64,
    pub reserve_mint: String,
    pub share_mint: String,
    pub total_value: String,
    pub share_supply: String,
    pub unallocated_reserve: String,
    /// Reserve units per share
    pub exchange_rate: String,
    pub halt_flags: u16,
    /// Enabled venues only
    pub venues: Vec<VenueResponse>,
}

impl VaultResponse {
    pub fn from_record(record: &VaultRecord, exchange_rate: String) -> Self {
        let account = &record.account;
        let venues = record
            .enabled_venues()
            .map(|venue| {
                let actual = account.actual_allocations.get(venue);
                VenueResponse {
                    venue,
                    value: actual.value.to_string(),
                    target: account.target_allocations.get(venue).value.to_string(),
                    stale: actual.last_update.stale,
                }
            })
            .collect();

        Self {
            address: record.address.to_string(),
            snapshot_version: record.version,
            reserve_mint: record.denomination().to_string(),
            share_mint: account.lp_token_mint.to_string(),
            total_value: record.total_value().to_string(),
            share_supply: record.share_supply.to_string(),
            unallocated_reserve: record.unallocated_reserve.to_string(),
            exchange_rate,
            halt_flags: account.halt_flags,
            venues,
        }
    }
}

/// Response for GET /api/vault/venues/{venue}
#[derive(Debug, Serialize, Deserialize)]
pub struct VenueValueResponse {
    pub venue: Venue,
    pub value: String,
}

/// Response for GET /api/vault/preview/deposit/{amount} and its withdraw twin
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub amount: String,
    pub shares: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy`, `halted` when the vault carries halt flags, or `busy`
    /// while a call holds the orchestrator
    pub status: String,
    pub version: String,
    /// Address of the served vault, from the cached snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u64>,
    pub timestamp: i64,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,

    /// API keys for authentication (empty = no auth required)
    pub api_keys: Vec<String>,

    /// Seconds between scheduled rebalances (0 = disabled)
    pub rebalance_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            cors_origins: vec!["http://localhost:3000".to_string()],
            api_keys: vec![],
            rebalance_interval_secs: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = lookup("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or(defaults.cors_origins);

        let api_keys = lookup("API_KEYS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rebalance_interval_secs = lookup("REBALANCE_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rebalance_interval_secs);

        Self {
            port,
            cors_origins,
            api_keys,
            rebalance_interval_secs,
        }
    }

    /// Whether a request presenting `key` may reach the vault routes.
    /// Without configured keys every request may.
    pub fn admits(&self, key: Option<&str>) -> bool {
        self.api_keys.is_empty()
            || key.is_some_and(|key| self.api_keys.iter().any(|k| k == key))
    }
}
