//! Target allocations obtained from a non-committing run of the vault's own
//! rebalance logic.

use tracing::debug;

use crate::allocation::{AllocationSet, ProposedWeights};
use crate::batch::{BatchBuilder, BatchEncoder, BatchKind, Operation, TransactionBatch};
use crate::error::{OrchestratorError, Result};
use crate::ledger::Ledger;
use crate::state::VaultAccount;
use crate::venue::Venue;

/// Post-simulation view of the vault
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetAllocation {
    /// Per-venue values the rebalance would commit
    pub target: AllocationSet,
    /// Per-venue values after refreshing every venue
    pub actual: AllocationSet,
    /// Vault total after consolidation
    pub total_value: u64,
}

impl TargetAllocation {
    /// Scales the target as if `amount` had left the vault, keeping the
    /// strategy's proportions.
    pub fn after_withdrawal(&self, amount: u64) -> Result<Self> {
        let remaining = self.total_value.checked_sub(amount).ok_or_else(|| {
            OrchestratorError::InvalidInput(format!(
                "withdrawal of {amount} exceeds vault value {}",
                self.total_value
            ))
        })?;
        Ok(Self {
            target: self.target.rescale(self.total_value, remaining)?,
            actual: self.actual.clone(),
            total_value: remaining,
        })
    }
}

pub struct AllocationSimulator;

impl AllocationSimulator {
    /// Operations that refresh the vault and commit new targets.
    ///
    /// A rebalance submits the same operations, split at the batch ceiling,
    /// so the committed target is the simulated one.
    fn commit_operations(
        venues: &[Venue],
        weights: Option<&ProposedWeights>,
    ) -> Vec<Operation> {
        let mut ops = BatchBuilder::refresh_preamble(venues.iter().copied());
        ops.push(Operation::Rebalance(weights.cloned()));
        ops
    }

    /// Runs refresh, consolidation and rebalance without committing and
    /// reads the resulting allocations back from the vault account.
    ///
    /// Without `weights` the vault's configured strategy derives them. A
    /// rejection is returned verbatim as [`OrchestratorError::SimulationReverted`].
    pub async fn simulate<L: Ledger + ?Sized>(
        ledger: &L,
        encoder: &BatchEncoder<'_>,
        venues: &[Venue],
        weights: Option<&ProposedWeights>,
    ) -> Result<TargetAllocation> {
        let vault = encoder.keys.vault;
        let batch = TransactionBatch {
            kind: BatchKind::Commit,
            operations: Self::commit_operations(venues, weights),
            signers: Vec::new(),
        };
        let instructions = encoder.encode(&batch)?;

        let outcome = ledger.simulate(&instructions, &[vault]).await?.into_result()?;
        let data = outcome
            .accounts
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| OrchestratorError::decode(&vault, "simulation returned no vault data"))?;
        let account = VaultAccount::decode(&vault, &data)?;

        let simulated = TargetAllocation {
            target: account.target_allocation(),
            actual: account.actual_allocation(),
            total_value: account.value.value,
        };
        debug!(
            vault = %vault,
            total_value = simulated.total_value,
            target = ?simulated.target.values,
            actual = ?simulated.actual.values,
            "Simulated rebalance"
        );
        Ok(simulated)
    }

    /// Target the vault would hold once `amount` is withdrawn.
    pub async fn simulate_withdrawal<L: Ledger + ?Sized>(
        ledger: &L,
        encoder: &BatchEncoder<'_>,
        venues: &[Venue],
        amount: u64,
    ) -> Result<TargetAllocation> {
        Self::simulate(ledger, encoder, venues, None)
            .await?
            .after_withdrawal(amount)
    }
}
