//! Ephemeral native-asset token accounts.
//!
//! A vault denominated in the wrapped native asset is paid into and out of
//! through a fresh token account that lives for a single deposit or
//! withdrawal. The orchestrator submits [`WrappedAssetHandle::acquire`]
//! before the operation and always attempts [`WrappedAssetHandle::release`]
//! once acquisition confirmed.

use solana_sdk::{
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
};

use crate::batch::Operation;
use crate::constants::TOKEN_ACCOUNT_LEN;
use crate::error::{OrchestratorError, Result};
use crate::ledger::Ledger;

pub struct WrappedAssetHandle {
    keypair: Keypair,
    /// Lamports moved into the account on creation
    lamports: u64,
}

impl WrappedAssetHandle {
    /// Prepares an account wrapping exactly `amount`, plus the rent reserve
    /// refunded on release.
    pub async fn prepare<L: Ledger + ?Sized>(ledger: &L, amount: u64) -> Result<Self> {
        let rent = ledger
            .minimum_balance_for_rent_exemption(TOKEN_ACCOUNT_LEN)
            .await?;
        let lamports = rent
            .checked_add(amount)
            .ok_or(OrchestratorError::MathOverflow)?;
        Ok(Self {
            keypair: Keypair::new(),
            lamports,
        })
    }

    pub fn address(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn acquire(&self) -> Operation {
        Operation::WrapNative {
            account: self.address(),
            lamports: self.lamports,
        }
    }

    pub fn release(&self) -> Operation {
        Operation::UnwrapNative {
            account: self.address(),
        }
    }

    /// Classifies a failed release.
    pub fn release_error(&self, err: OrchestratorError) -> OrchestratorError {
        OrchestratorError::WrappedAsset {
            account: self.address(),
            stage: "close",
            reason: err.to_string(),
        }
    }
}
