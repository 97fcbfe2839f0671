//! Error types for the vault orchestrator

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::batch::Confirmation;
use crate::venue::Venue;

/// Orchestrator error types
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Vault account {0} not found")]
    VaultNotFound(Pubkey),

    #[error("Account {account} could not be decoded: {reason}")]
    AccountDecode { account: Pubkey, reason: String },

    #[error("Cached allocation for {0} is stale, reload and refresh first")]
    StaleRecord(Venue),

    #[error("Venue {0} is not enabled for this vault")]
    VenueDisabled(Venue),

    #[error("Vault is halted for {0}")]
    VaultHalted(&'static str),

    #[error("Simulation reverted: {message}")]
    SimulationReverted {
        /// Raw custom program error code, if the failure carried one
        code: Option<u32>,
        message: String,
        logs: Vec<String>,
    },

    #[error("Batch {batch} was not confirmed: {message}")]
    BatchRejected {
        batch: usize,
        code: Option<u32>,
        message: String,
    },

    #[error("Batch ceiling of {max} operands cannot hold {required} operands")]
    BatchTooSmall { required: usize, max: usize },

    #[error("Denomination mismatch: expected {expected}, found {found}")]
    DenominationMismatch { expected: Pubkey, found: Pubkey },

    #[error("Wrapped asset account {account} failed to {stage}: {reason}")]
    WrappedAsset {
        account: Pubkey,
        stage: &'static str,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Arithmetic overflow")]
    MathOverflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Ledger transport error: {0}")]
    Transport(String),
}

/// Coarse error classes callers branch on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Resolved by reloading the vault record
    State,
    /// The on-ledger rebalance logic rejected the hypothetical operation
    Simulation,
    /// A submitted batch failed; earlier confirmations stand
    BatchConfirmation,
    /// Deployment or programming error, never retried
    Configuration,
    /// Ephemeral wrapped-asset account could not be created or closed
    ResourceLifecycle,
    Transport,
    Math,
    Input,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::VaultNotFound(_)
            | OrchestratorError::AccountDecode { .. }
            | OrchestratorError::StaleRecord(_)
            | OrchestratorError::VenueDisabled(_)
            | OrchestratorError::VaultHalted(_) => ErrorKind::State,
            OrchestratorError::SimulationReverted { .. } => ErrorKind::Simulation,
            OrchestratorError::BatchRejected { .. } => ErrorKind::BatchConfirmation,
            OrchestratorError::BatchTooSmall { .. }
            | OrchestratorError::DenominationMismatch { .. }
            | OrchestratorError::Config(_) => ErrorKind::Configuration,
            OrchestratorError::WrappedAsset { .. } => ErrorKind::ResourceLifecycle,
            OrchestratorError::Transport(_) => ErrorKind::Transport,
            OrchestratorError::MathOverflow | OrchestratorError::DivisionByZero => ErrorKind::Math,
            OrchestratorError::InvalidInput(_) => ErrorKind::Input,
        }
    }

    pub(crate) fn decode(account: &Pubkey, reason: impl ToString) -> Self {
        OrchestratorError::AccountDecode {
            account: *account,
            reason: reason.to_string(),
        }
    }
}

/// Failure of a multi-batch call.
///
/// Batches confirmed before the failure are never discarded. A subsequent
/// rebalance recomputes its diffs from whatever state they left behind.
#[derive(Debug, Error)]
#[error("{source} ({} batch(es) confirmed before failure)", confirmed.len())]
pub struct ExecutionError {
    pub confirmed: Vec<Confirmation>,
    #[source]
    pub source: OrchestratorError,
    /// Failure to close a wrapped-asset account after the main operation
    pub cleanup: Option<OrchestratorError>,
}

impl ExecutionError {
    pub fn new(confirmed: Vec<Confirmation>, source: OrchestratorError) -> Self {
        Self {
            confirmed,
            source,
            cleanup: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl From<OrchestratorError> for ExecutionError {
    fn from(err: OrchestratorError) -> Self {
        ExecutionError::new(Vec::new(), err)
    }
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Result of a call that submits one or more batches
pub type ExecutionResult = std::result::Result<Vec<Confirmation>, ExecutionError>;
