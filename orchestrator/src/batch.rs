//! Batches: bounded groups of operations submitted as one transaction.
//!
//! Operations stay plain values until submission, so batch layout can be
//! checked without a ledger. [`BatchEncoder`] turns them into instructions
//! and [`Submission`] sends batches strictly one after another.

use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
};
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use strum::Display;
use tracing::{info, warn};

use crate::allocation::ProposedWeights;
use crate::constants::{NATIVE_MINT, TOKEN_ACCOUNT_LEN, TOKEN_PROGRAM_ID};
use crate::error::{OrchestratorError, Result};
use crate::instructions::{self, VaultKeys};
use crate::ledger::Ledger;
use crate::planner::ReconcileOperation;
use crate::venue::{Venue, VenueHandle, VenueMap};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Refresh(Venue),
    /// Recomputes the vault total from refreshed venue values
    ConsolidateRefresh,
    /// Commits target allocations on-ledger
    Rebalance(Option<ProposedWeights>),
    /// `withdraw_option == 0` moves to the committed target, otherwise
    /// redeems exactly that many reserve units
    Reconcile { venue: Venue, withdraw_option: u64 },
    Deposit {
        amount: u64,
        source: Pubkey,
        share_account: Pubkey,
    },
    Withdraw {
        shares: u64,
        share_account: Pubkey,
        destination: Pubkey,
    },
    /// Payer's associated account for `mint`, created if absent
    CreateAssociatedAccount { mint: Pubkey },
    /// New native token account funded with `lamports`
    WrapNative { account: Pubkey, lamports: u64 },
    /// Closes a native token account, refunding its lamports to the payer
    UnwrapNative { account: Pubkey },
}

impl Operation {
    /// Number of instructions the operation encodes to
    pub fn operands(&self) -> usize {
        match self {
            Operation::WrapNative { .. } => 2,
            _ => 1,
        }
    }

    pub fn reconcile_venue(&self) -> Option<Venue> {
        match self {
            Operation::Reconcile { venue, .. } => Some(*venue),
            _ => None,
        }
    }
}

/// A reconcile awaiting placement into a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileStep {
    pub venue: Venue,
    pub withdraw_option: u64,
}

impl ReconcileStep {
    /// Moves the venue to the vault's committed target
    pub fn to_target(op: &ReconcileOperation) -> Self {
        Self {
            venue: op.venue,
            withdraw_option: 0,
        }
    }

    /// Redeems exactly the operation's amount from the venue
    pub fn explicit(op: &ReconcileOperation) -> Result<Self> {
        Ok(Self {
            venue: op.venue,
            withdraw_option: op.amount()?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BatchKind {
    /// Venue refreshes that did not fit beside the operation they precede
    Refresh,
    /// Refresh and commit target allocations
    Commit,
    Reconcile,
    /// Account creation ahead of a deposit or withdrawal
    Setup,
    Deposit,
    Withdraw,
    /// Closing ephemeral accounts
    Cleanup,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionBatch {
    pub kind: BatchKind,
    pub operations: Vec<Operation>,
    /// Keypairs besides the payer that must sign
    pub signers: Vec<Pubkey>,
}

impl TransactionBatch {
    pub fn operands(&self) -> usize {
        self.operations.iter().map(Operation::operands).sum()
    }

    pub fn reconciled_venues(&self) -> impl Iterator<Item = Venue> + '_ {
        self.operations.iter().filter_map(Operation::reconcile_venue)
    }

    /// Whether every reconciled venue is refreshed earlier in the same batch
    pub fn refreshes_before_reconciles(&self) -> bool {
        self.operations.iter().enumerate().all(|(i, op)| match op {
            Operation::Reconcile { venue, .. } => self.operations[..i]
                .iter()
                .any(|prior| *prior == Operation::Refresh(*venue)),
            _ => true,
        })
    }
}

/// A batch that confirmed on-ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    /// Position of the batch within its call
    pub batch: usize,
    pub kind: BatchKind,
    pub signature: Signature,
}

pub struct BatchBuilder {
    max_operands: usize,
}

impl BatchBuilder {
    pub fn new(max_operands: usize) -> Self {
        Self { max_operands }
    }

    /// Packs `reconciles` greedily, in the given order, into reconcile batches.
    ///
    /// Each batch opens with refreshes for exactly the venues it reconciles.
    /// `refreshes` is the set of venues that can be refreshed; reconciling
    /// any other venue is refused.
    pub fn build(
        &self,
        refreshes: &[Venue],
        reconciles: &[ReconcileStep],
    ) -> Result<Vec<TransactionBatch>> {
        const PAIR: usize = 2;
        if !reconciles.is_empty() && PAIR > self.max_operands {
            return Err(OrchestratorError::BatchTooSmall {
                required: PAIR,
                max: self.max_operands,
            });
        }

        let mut batches = Vec::new();
        let mut touched: Vec<Venue> = Vec::new();
        let mut steps: Vec<ReconcileStep> = Vec::new();

        for step in reconciles {
            if !refreshes.contains(&step.venue) {
                return Err(OrchestratorError::VenueDisabled(step.venue));
            }
            let cost = if touched.contains(&step.venue) { 1 } else { PAIR };
            if touched.len() + steps.len() + cost > self.max_operands {
                batches.push(Self::reconcile_batch(&touched, &steps));
                touched.clear();
                steps.clear();
            }
            if !touched.contains(&step.venue) {
                touched.push(step.venue);
            }
            steps.push(*step);
        }
        if !steps.is_empty() {
            batches.push(Self::reconcile_batch(&touched, &steps));
        }
        Ok(batches)
    }

    /// Wraps `operations` into one batch, refusing it if it exceeds the ceiling.
    pub fn single(&self, kind: BatchKind, operations: Vec<Operation>) -> Result<TransactionBatch> {
        self.single_signed(kind, operations, Vec::new())
    }

    pub fn single_signed(
        &self,
        kind: BatchKind,
        operations: Vec<Operation>,
        signers: Vec<Pubkey>,
    ) -> Result<TransactionBatch> {
        let batch = TransactionBatch {
            kind,
            operations,
            signers,
        };
        if batch.operands() > self.max_operands {
            return Err(OrchestratorError::BatchTooSmall {
                required: batch.operands(),
                max: self.max_operands,
            });
        }
        if !batch.refreshes_before_reconciles() {
            return Err(OrchestratorError::InvalidInput(format!(
                "{kind} batch reconciles a venue it does not refresh"
            )));
        }
        Ok(batch)
    }

    /// Lays out `operations` behind a refresh of `venues` and a vault-value
    /// consolidation, ending with one batch of `kind`.
    ///
    /// Only the consolidation and `operations` must share that batch. Venue
    /// refreshes that do not fit beside them move, in venue order, into
    /// leading refresh-only batches.
    pub fn refreshed(
        &self,
        kind: BatchKind,
        venues: &[Venue],
        operations: Vec<Operation>,
    ) -> Result<Vec<TransactionBatch>> {
        let tail = 1 + operations.iter().map(Operation::operands).sum::<usize>();
        if tail > self.max_operands {
            return Err(OrchestratorError::BatchTooSmall {
                required: tail,
                max: self.max_operands,
            });
        }

        let inline = venues.len().min(self.max_operands - tail);
        let (leading, trailing) = venues.split_at(venues.len() - inline);

        let mut batches: Vec<TransactionBatch> = leading
            .chunks(self.max_operands)
            .map(|chunk| TransactionBatch {
                kind: BatchKind::Refresh,
                operations: chunk.iter().copied().map(Operation::Refresh).collect(),
                signers: Vec::new(),
            })
            .collect();

        let mut last = Self::refresh_preamble(trailing.iter().copied());
        last.extend(operations);
        batches.push(self.single(kind, last)?);
        Ok(batches)
    }

    /// Refresh of every venue followed by a vault-value consolidation
    pub fn refresh_preamble(venues: impl IntoIterator<Item = Venue>) -> Vec<Operation> {
        venues
            .into_iter()
            .map(Operation::Refresh)
            .chain(std::iter::once(Operation::ConsolidateRefresh))
            .collect()
    }

    fn reconcile_batch(touched: &[Venue], steps: &[ReconcileStep]) -> TransactionBatch {
        let operations = touched
            .iter()
            .map(|venue| Operation::Refresh(*venue))
            .chain(steps.iter().map(|step| Operation::Reconcile {
                venue: step.venue,
                withdraw_option: step.withdraw_option,
            }))
            .collect();
        TransactionBatch {
            kind: BatchKind::Reconcile,
            operations,
            signers: Vec::new(),
        }
    }
}

/// Everything needed to turn operations into instructions
pub struct BatchEncoder<'a> {
    pub keys: VaultKeys,
    pub venues: &'a VenueMap<VenueHandle>,
    /// Venue reserves in venue order, as recorded on the vault
    pub reserves: [Pubkey; 3],
    pub payer: Pubkey,
}

impl BatchEncoder<'_> {
    pub fn encode(&self, batch: &TransactionBatch) -> Result<Vec<Instruction>> {
        let mut instructions = Vec::with_capacity(batch.operands());
        for op in &batch.operations {
            self.encode_operation(op, &mut instructions)?;
        }
        Ok(instructions)
    }

    fn handle(&self, venue: Venue) -> Result<&VenueHandle> {
        self.venues
            .get(venue)
            .ok_or(OrchestratorError::VenueDisabled(venue))
    }

    fn encode_operation(&self, op: &Operation, out: &mut Vec<Instruction>) -> Result<()> {
        let keys = &self.keys;
        match op {
            Operation::Refresh(venue) => out.push(self.handle(*venue)?.refresh_instruction(keys)),
            Operation::ConsolidateRefresh => out.push(instructions::consolidate_refresh(keys)),
            Operation::Rebalance(weights) => {
                out.push(instructions::rebalance(keys, self.reserves, weights.as_ref()))
            }
            Operation::Reconcile {
                venue,
                withdraw_option,
            } => out.push(
                self.handle(*venue)?
                    .reconcile_instruction(keys, *withdraw_option),
            ),
            Operation::Deposit {
                amount,
                source,
                share_account,
            } => out.push(instructions::deposit(
                keys,
                &self.payer,
                source,
                share_account,
                *amount,
            )),
            Operation::Withdraw {
                shares,
                share_account,
                destination,
            } => out.push(instructions::withdraw(
                keys,
                &self.payer,
                share_account,
                destination,
                *shares,
            )),
            Operation::CreateAssociatedAccount { mint } => {
                out.push(create_associated_token_account_idempotent(
                    &self.payer,
                    &self.payer,
                    mint,
                    &TOKEN_PROGRAM_ID,
                ))
            }
            Operation::WrapNative { account, lamports } => {
                out.push(system_instruction::create_account(
                    &self.payer,
                    account,
                    *lamports,
                    TOKEN_ACCOUNT_LEN as u64,
                    &TOKEN_PROGRAM_ID,
                ));
                out.push(
                    spl_token_2022::instruction::initialize_account3(
                        &TOKEN_PROGRAM_ID,
                        account,
                        &NATIVE_MINT,
                        &self.payer,
                    )
                    .map_err(|e| wrapped_error(account, "initialize", e))?,
                );
            }
            Operation::UnwrapNative { account } => out.push(
                spl_token_2022::instruction::close_account(
                    &TOKEN_PROGRAM_ID,
                    account,
                    &self.payer,
                    &self.payer,
                    &[],
                )
                .map_err(|e| wrapped_error(account, "close", e))?,
            ),
        }
        Ok(())
    }
}

fn wrapped_error(account: &Pubkey, stage: &'static str, reason: impl ToString) -> OrchestratorError {
    OrchestratorError::WrappedAsset {
        account: *account,
        stage,
        reason: reason.to_string(),
    }
}

/// Sequential submission of the batches of one call.
///
/// Each batch is awaited to confirmation before the next is encoded. The
/// first failure stops the call; confirmations gathered so far are kept.
pub struct Submission<'a, L: Ledger + ?Sized> {
    ledger: &'a L,
    encoder: BatchEncoder<'a>,
    attempted: usize,
    confirmed: Vec<Confirmation>,
}

impl<'a, L: Ledger + ?Sized> Submission<'a, L> {
    pub fn new(ledger: &'a L, encoder: BatchEncoder<'a>) -> Self {
        Self {
            ledger,
            encoder,
            attempted: 0,
            confirmed: Vec::new(),
        }
    }

    pub fn into_confirmed(self) -> Vec<Confirmation> {
        self.confirmed
    }

    /// Submits one batch. `keyring` must hold every keypair the batch lists
    /// as a signer; others are ignored.
    pub async fn submit(&mut self, batch: &TransactionBatch, keyring: &[&Keypair]) -> Result<()> {
        let index = self.attempted;
        self.attempted += 1;
        let instructions = self.encoder.encode(batch)?;

        let signers = batch
            .signers
            .iter()
            .map(|key| {
                keyring
                    .iter()
                    .copied()
                    .find(|keypair| keypair.pubkey() == *key)
                    .ok_or_else(|| {
                        OrchestratorError::InvalidInput(format!("no keypair for signer {key}"))
                    })
            })
            .collect::<Result<Vec<&Keypair>>>()?;

        match self.ledger.submit(&instructions, &signers).await {
            Ok(signature) => {
                info!(
                    batch = index,
                    kind = %batch.kind,
                    operands = batch.operands(),
                    signature = %signature,
                    "Batch confirmed"
                );
                self.confirmed.push(Confirmation {
                    batch: index,
                    kind: batch.kind,
                    signature,
                });
                Ok(())
            }
            Err(rejection) => {
                warn!(
                    batch = index,
                    kind = %batch.kind,
                    code = ?rejection.code,
                    "Batch rejected: {}",
                    rejection.message
                );
                Err(OrchestratorError::BatchRejected {
                    batch: index,
                    code: rejection.code,
                    message: rejection.message,
                })
            }
        }
    }

    /// Submits `batches` in order, stopping at the first failure.
    pub async fn submit_all(
        &mut self,
        batches: &[TransactionBatch],
        keyring: &[&Keypair],
    ) -> Result<()> {
        for batch in batches {
            self.submit(batch, keyring).await?;
        }
        Ok(())
    }
}
