//! Caller-facing entry points: deposit, withdraw, rebalance and reads of the
//! cached vault record.

use std::sync::Arc;

use solana_sdk::{pubkey::Pubkey, signature::Keypair};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use tracing::{info, warn};

use crate::allocation::ProposedWeights;
use crate::batch::{
    BatchBuilder, BatchEncoder, BatchKind, Operation, ReconcileStep, Submission, TransactionBatch,
};
use crate::config::{DeploymentConfig, OrchestratorConfig};
use crate::constants::{NATIVE_MINT, TOKEN_PROGRAM_ID};
use crate::error::{ExecutionError, ExecutionResult, OrchestratorError, Result};
use crate::instructions::VaultKeys;
use crate::ledger::Ledger;
use crate::math::Rounding;
use crate::planner::{Direction, DiffPlanner, ReconcileOrderPlanner};
use crate::reader::VaultStateReader;
use crate::simulator::AllocationSimulator;
use crate::state::{VaultFlags, VaultRecord};
use crate::venue::{Venue, VenueHandle, VenueMap};
use crate::wrapped::WrappedAssetHandle;

/// Batches of one deposit or withdrawal call, in submission order
struct ScopedPlan {
    /// Reconciles freeing reserve for a withdrawal
    pre: Vec<TransactionBatch>,
    setup: Option<TransactionBatch>,
    /// Leading refresh batches, if any, then the deposit or withdrawal
    main: Vec<TransactionBatch>,
    /// Releases the wrapped account; only submitted once `setup` confirmed
    cleanup: Option<TransactionBatch>,
}

/// Client-side orchestrator for one vault.
///
/// Holds the last loaded [`VaultRecord`] as an immutable snapshot. Every
/// mutating call reloads it at the end, whatever the outcome; the snapshot is
/// never patched in place.
pub struct VaultOrchestrator<L: Ledger> {
    ledger: L,
    program_id: Pubkey,
    vault: Pubkey,
    venues: VenueMap<VenueHandle>,
    batches: BatchBuilder,
    record: Arc<VaultRecord>,
}

impl<L: Ledger> VaultOrchestrator<L> {
    /// Loads the vault and wires every venue it has enabled.
    pub async fn new(
        ledger: L,
        program_id: Pubkey,
        vault: Pubkey,
        deployment: &DeploymentConfig,
        max_operands_per_batch: usize,
    ) -> Result<Self> {
        let record = VaultStateReader::load(&ledger, &vault).await?;

        let venues = record
            .enabled_venues()
            .map(|venue| {
                let adapter = deployment.adapter(venue).ok_or_else(|| {
                    OrchestratorError::Config(format!(
                        "venue {venue} is enabled on the vault but not configured"
                    ))
                })?;
                Ok((
                    venue,
                    VenueHandle {
                        adapter: adapter.clone(),
                        reserve: record.account.reserve(venue),
                        holding_account: record.account.holding_account(venue),
                    },
                ))
            })
            .collect::<Result<VenueMap<VenueHandle>>>()?;

        info!(
            vault = %vault,
            venues = venues.len(),
            total_value = record.total_value(),
            max_operands_per_batch,
            "Orchestrator ready"
        );

        Ok(Self {
            ledger,
            program_id,
            vault,
            venues,
            batches: BatchBuilder::new(max_operands_per_batch),
            record: Arc::new(record),
        })
    }

    pub async fn from_config(
        ledger: L,
        config: &OrchestratorConfig,
        deployment: &DeploymentConfig,
    ) -> Result<Self> {
        Self::new(
            ledger,
            config.program_id,
            config.vault,
            deployment,
            config.max_operands_per_batch,
        )
        .await
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn vault(&self) -> Pubkey {
        self.vault
    }

    /// The cached snapshot; stays valid after later reloads
    pub fn record(&self) -> Arc<VaultRecord> {
        Arc::clone(&self.record)
    }

    /// Replaces the cached snapshot with a fresh read.
    pub async fn reload(&mut self) -> Result<Arc<VaultRecord>> {
        let record = Arc::new(VaultStateReader::load(&self.ledger, &self.vault).await?);
        self.record = Arc::clone(&record);
        Ok(record)
    }

    /// Total value as of the cached snapshot
    pub fn total_value(&self) -> u64 {
        self.record.total_value()
    }

    /// Value recorded for `venue` in the cached snapshot.
    pub fn venue_value(&self, venue: Venue) -> Result<u64> {
        if !self.record.account.is_enabled(venue) {
            return Err(OrchestratorError::VenueDisabled(venue));
        }
        let allocation = self.record.allocation(venue);
        if allocation.last_update.stale {
            return Err(OrchestratorError::StaleRecord(venue));
        }
        Ok(allocation.value)
    }

    /// Shares a deposit of `amount` would mint at the cached rate
    pub fn preview_deposit(&self, amount: u64) -> Result<u64> {
        self.record
            .exchange_rate()
            .reserve_to_shares(amount, Rounding::Floor)
    }

    /// Shares burned to withdraw `amount` at the cached rate
    pub fn preview_withdraw(&self, amount: u64) -> Result<u64> {
        self.record
            .exchange_rate()
            .reserve_to_shares(amount, Rounding::Floor)
    }

    /// Simulates, diffs, orders, batches and submits a rebalance.
    pub async fn rebalance(&mut self, weights: Option<ProposedWeights>) -> ExecutionResult {
        let outcome = self.execute_rebalance(weights.as_ref()).await;
        self.finish("rebalance", outcome).await
    }

    /// Deposits `amount` reserve units from `source`, defaulting to the
    /// payer's associated reserve account.
    pub async fn deposit(&mut self, amount: u64, source: Option<Pubkey>) -> ExecutionResult {
        let outcome = self.execute_deposit(amount, source).await;
        self.finish("deposit", outcome).await
    }

    /// Withdraws `amount` reserve units to the payer, freeing reserve from
    /// venues first when the vault holds too little unallocated.
    pub async fn withdraw(&mut self, amount: u64) -> ExecutionResult {
        let outcome = self.execute_withdraw(amount).await;
        self.finish("withdraw", outcome).await
    }

    async fn finish(&mut self, call: &'static str, outcome: ExecutionResult) -> ExecutionResult {
        let reloaded = self.reload().await;
        match (outcome, reloaded) {
            (Ok(confirmed), Ok(record)) => {
                info!(
                    call,
                    batches = confirmed.len(),
                    version = record.version,
                    total_value = record.total_value(),
                    "Call completed"
                );
                Ok(confirmed)
            }
            (Ok(confirmed), Err(err)) => Err(ExecutionError::new(confirmed, err)),
            (Err(err), Ok(_)) => {
                warn!(call, confirmed = err.confirmed.len(), "Call failed: {}", err.source);
                Err(err)
            }
            (Err(err), Err(reload)) => {
                warn!(call, "Call failed: {}; reload also failed: {reload}", err.source);
                Err(err)
            }
        }
    }

    /// Enabled venues this client can build operations for
    fn active_venues(&self) -> Vec<Venue> {
        self.record
            .enabled_venues()
            .filter(|venue| self.venues.contains(*venue))
            .collect()
    }

    fn encoder(&self, record: &VaultRecord) -> BatchEncoder<'_> {
        let account = &record.account;
        BatchEncoder {
            keys: VaultKeys::from_record(self.program_id, record),
            venues: &self.venues,
            reserves: [
                account.solend_reserve,
                account.port_reserve,
                account.jet_reserve,
            ],
            payer: self.ledger.payer(),
        }
    }

    async fn execute_rebalance(&self, weights: Option<&ProposedWeights>) -> ExecutionResult {
        let record = self.record();
        record.ensure_not_halted(VaultFlags::HALT_REFRESHES)?;
        record.ensure_not_halted(VaultFlags::HALT_RECONCILES)?;

        let venues = self.active_venues();
        let encoder = self.encoder(&record);

        let simulated =
            AllocationSimulator::simulate(&self.ledger, &encoder, &venues, weights).await?;
        let ops = ReconcileOrderPlanner::order(DiffPlanner::diff(
            &simulated.target,
            &simulated.actual,
        )?);
        if ops.is_empty() {
            info!(vault = %self.vault, "Allocations already on target");
            return Ok(Vec::new());
        }

        let steps: Vec<_> = ops.iter().map(ReconcileStep::to_target).collect();
        let mut batches = self.batches.refreshed(
            BatchKind::Commit,
            &venues,
            vec![Operation::Rebalance(weights.cloned())],
        )?;
        batches.extend(self.batches.build(&venues, &steps)?);

        info!(
            vault = %self.vault,
            plan = %ops.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            batches = batches.len(),
            "Submitting rebalance"
        );

        let mut submission = Submission::new(&self.ledger, encoder);
        match submission.submit_all(&batches, &[]).await {
            Ok(()) => Ok(submission.into_confirmed()),
            Err(err) => Err(ExecutionError::new(submission.into_confirmed(), err)),
        }
    }

    async fn execute_deposit(&self, amount: u64, source: Option<Pubkey>) -> ExecutionResult {
        if amount == 0 {
            return Err(OrchestratorError::InvalidInput("deposit amount is zero".to_string()).into());
        }
        let record = self.record();
        record.ensure_not_halted(VaultFlags::HALT_DEPOSITS_WITHDRAWS)?;
        record.ensure_not_halted(VaultFlags::HALT_REFRESHES)?;

        let payer = self.ledger.payer();
        let lp_mint = record.account.lp_token_mint;
        let reserve_mint = record.denomination();
        let share_account = associated_account(&payer, &lp_mint);

        let mut setup = Vec::new();
        if self.ledger.get_account(&share_account).await?.is_none() {
            setup.push(Operation::CreateAssociatedAccount { mint: lp_mint });
        }

        let wrapped = if reserve_mint == NATIVE_MINT {
            Some(WrappedAssetHandle::prepare(&self.ledger, amount).await?)
        } else {
            None
        };
        let source = match (&wrapped, source) {
            (Some(handle), _) => handle.address(),
            (None, Some(source)) => source,
            (None, None) => associated_account(&payer, &reserve_mint),
        };

        let main = self.batches.refreshed(
            BatchKind::Deposit,
            &self.active_venues(),
            vec![Operation::Deposit {
                amount,
                source,
                share_account,
            }],
        )?;

        let plan = self.scoped_plan(Vec::new(), setup, main, wrapped.as_ref())?;
        info!(
            vault = %self.vault,
            amount,
            expected_shares = record.exchange_rate().reserve_to_shares(amount, Rounding::Floor)?,
            wrapped = wrapped.is_some(),
            "Submitting deposit"
        );
        self.submit_scoped(&record, plan, wrapped.as_ref()).await
    }

    async fn execute_withdraw(&self, amount: u64) -> ExecutionResult {
        if amount == 0 {
            return Err(OrchestratorError::InvalidInput("withdraw amount is zero".to_string()).into());
        }
        let record = self.record();
        record.ensure_not_halted(VaultFlags::HALT_DEPOSITS_WITHDRAWS)?;
        record.ensure_not_halted(VaultFlags::HALT_REFRESHES)?;

        let shares = record
            .exchange_rate()
            .reserve_to_shares(amount, Rounding::Floor)?;
        if shares == 0 {
            return Err(OrchestratorError::InvalidInput(format!(
                "withdrawal of {amount} is worth less than one share"
            ))
            .into());
        }

        let venues = self.active_venues();
        let pre = if record.unallocated_reserve < amount {
            record.ensure_not_halted(VaultFlags::HALT_RECONCILES)?;
            let encoder = self.encoder(&record);
            let simulated =
                AllocationSimulator::simulate_withdrawal(&self.ledger, &encoder, &venues, amount)
                    .await?;
            let steps = ReconcileOrderPlanner::order(DiffPlanner::diff(
                &simulated.target,
                &simulated.actual,
            )?)
            .iter()
            .filter(|op| op.direction == Direction::Withdraw)
            .map(ReconcileStep::explicit)
            .collect::<Result<Vec<_>>>()?;
            info!(
                vault = %self.vault,
                amount,
                unallocated = record.unallocated_reserve,
                reconciles = steps.len(),
                "Freeing reserve for withdrawal"
            );
            self.batches.build(&venues, &steps)?
        } else {
            Vec::new()
        };

        let payer = self.ledger.payer();
        let reserve_mint = record.denomination();
        let share_account = associated_account(&payer, &record.account.lp_token_mint);

        let mut setup = Vec::new();
        let wrapped = if reserve_mint == NATIVE_MINT {
            Some(WrappedAssetHandle::prepare(&self.ledger, 0).await?)
        } else {
            None
        };
        let destination = match &wrapped {
            Some(handle) => handle.address(),
            None => {
                let destination = associated_account(&payer, &reserve_mint);
                if self.ledger.get_account(&destination).await?.is_none() {
                    setup.push(Operation::CreateAssociatedAccount { mint: reserve_mint });
                }
                destination
            }
        };

        let main = self.batches.refreshed(
            BatchKind::Withdraw,
            &venues,
            vec![Operation::Withdraw {
                shares,
                share_account,
                destination,
            }],
        )?;

        let plan = self.scoped_plan(pre, setup, main, wrapped.as_ref())?;
        info!(
            vault = %self.vault,
            amount,
            shares,
            wrapped = wrapped.is_some(),
            "Submitting withdrawal"
        );
        self.submit_scoped(&record, plan, wrapped.as_ref()).await
    }

    /// Lays out every batch of a deposit or withdrawal before anything is
    /// submitted, so a ceiling violation fails the call up front.
    fn scoped_plan(
        &self,
        pre: Vec<TransactionBatch>,
        mut setup: Vec<Operation>,
        main: Vec<TransactionBatch>,
        wrapped: Option<&WrappedAssetHandle>,
    ) -> Result<ScopedPlan> {
        let signers: Vec<Pubkey> = wrapped.map(WrappedAssetHandle::address).into_iter().collect();

        if let Some(handle) = wrapped {
            setup.push(handle.acquire());
        }
        let setup = if setup.is_empty() {
            None
        } else {
            Some(self.batches.single_signed(BatchKind::Setup, setup, signers)?)
        };
        let cleanup = wrapped
            .map(|handle| self.batches.single(BatchKind::Cleanup, vec![handle.release()]))
            .transpose()?;

        Ok(ScopedPlan {
            pre,
            setup,
            main,
            cleanup,
        })
    }

    /// Submits a scoped plan. Once the wrapped account exists its release is
    /// attempted on every path; a failed release never replaces the error of
    /// the operation itself.
    async fn submit_scoped(
        &self,
        record: &VaultRecord,
        plan: ScopedPlan,
        wrapped: Option<&WrappedAssetHandle>,
    ) -> ExecutionResult {
        let keyring: Vec<&Keypair> = wrapped.map(WrappedAssetHandle::keypair).into_iter().collect();
        let mut submission = Submission::new(&self.ledger, self.encoder(record));

        if let Err(err) = submission.submit_all(&plan.pre, &keyring).await {
            return Err(ExecutionError::new(submission.into_confirmed(), err));
        }
        if let Some(setup) = &plan.setup {
            if let Err(err) = submission.submit(setup, &keyring).await {
                let err = match wrapped {
                    Some(handle) => OrchestratorError::WrappedAsset {
                        account: handle.address(),
                        stage: "create",
                        reason: err.to_string(),
                    },
                    None => err,
                };
                return Err(ExecutionError::new(submission.into_confirmed(), err));
            }
        }

        let outcome = submission.submit_all(&plan.main, &keyring).await;

        let cleanup = match (&plan.cleanup, wrapped) {
            (Some(cleanup), Some(handle)) => submission
                .submit(cleanup, &keyring)
                .await
                .err()
                .map(|err| handle.release_error(err)),
            _ => None,
        };
        if let Some(err) = &cleanup {
            warn!(vault = %self.vault, "Wrapped account left open: {err}");
        }

        let confirmed = submission.into_confirmed();
        match (outcome, cleanup) {
            (Ok(()), None) => Ok(confirmed),
            (Ok(()), Some(cleanup)) => Err(ExecutionError::new(confirmed, cleanup)),
            (Err(err), cleanup) => Err(ExecutionError {
                confirmed,
                source: err,
                cleanup,
            }),
        }
    }
}

fn associated_account(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, &TOKEN_PROGRAM_ID)
}
