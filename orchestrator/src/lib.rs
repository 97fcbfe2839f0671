//! Rebalance and reconcile orchestration for a multi-venue yield vault.
//!
//! The vault program keeps per-venue allocations on-ledger. This crate keeps
//! them in line with the capital actually parked at each venue:
//!
//! simulate → diff → order → batch → submit
//!
//! Each stage produces a plain value ([`TargetAllocation`],
//! [`ReconcileOperation`], [`TransactionBatch`]) so plans can be inspected and
//! tested without a ledger. [`VaultOrchestrator`] runs the pipeline for
//! rebalances and as a precondition of withdrawals, and wraps deposits and
//! withdrawals in the native-asset account lifecycle when needed.

pub mod allocation;
pub mod batch;
pub mod config;
pub mod constants;
pub mod error;
pub mod instructions;
pub mod ledger;
pub mod math;
pub mod orchestrator;
pub mod planner;
pub mod reader;
pub mod simulator;
pub mod state;
pub mod venue;
pub mod wrapped;

pub use allocation::{AllocationSet, ProposedWeights};
pub use batch::{BatchBuilder, BatchKind, Confirmation, Operation, ReconcileStep, TransactionBatch};
pub use config::{DeploymentConfig, OrchestratorConfig};
pub use error::{ErrorKind, ExecutionError, ExecutionResult, OrchestratorError, Result};
pub use ledger::{Ledger, Rejection, RpcLedger, SimulationOutcome};
pub use math::{rate, Decimal, ExchangeRate};
pub use orchestrator::VaultOrchestrator;
pub use planner::{Direction, DiffPlanner, ReconcileOperation, ReconcileOrderPlanner};
pub use reader::VaultStateReader;
pub use simulator::{AllocationSimulator, TargetAllocation};
pub use state::{VaultAccount, VaultFlags, VaultRecord, YieldSourceFlags};
pub use venue::{Venue, VenueAdapter, VenueHandle, VenueMap};
