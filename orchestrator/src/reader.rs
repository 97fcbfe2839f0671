//! Loads vault snapshots from the ledger.

use solana_sdk::pubkey::Pubkey;
use spl_token_2022::{
    extension::StateWithExtensions,
    state::{Account as TokenAccount, Mint},
};
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::ledger::Ledger;
use crate::state::{VaultAccount, VaultRecord};

/// Stateless reader; every call goes to the ledger.
pub struct VaultStateReader;

impl VaultStateReader {
    /// Reads the vault account, its share mint and its reserve token account.
    pub async fn load<L: Ledger + ?Sized>(ledger: &L, vault: &Pubkey) -> Result<VaultRecord> {
        let vault_data = ledger
            .get_account(vault)
            .await?
            .ok_or(OrchestratorError::VaultNotFound(*vault))?
            .data;
        let account = VaultAccount::decode(vault, &vault_data)?;

        let mint_data = Self::fetch(ledger, &account.lp_token_mint).await?;
        let reserve_data = Self::fetch(ledger, &account.vault_reserve_token).await?;

        let record = Self::assemble(*vault, account, &mint_data, &reserve_data)?;
        debug!(
            vault = %vault,
            version = record.version,
            total_value = record.total_value(),
            share_supply = record.share_supply,
            "Loaded vault record"
        );
        Ok(record)
    }

    /// Builds a snapshot from already-fetched account data.
    pub fn assemble(
        address: Pubkey,
        account: VaultAccount,
        mint_data: &[u8],
        reserve_data: &[u8],
    ) -> Result<VaultRecord> {
        let share_supply = share_supply(&account.lp_token_mint, mint_data)?;
        let unallocated_reserve = token_amount(&account.vault_reserve_token, reserve_data)?;
        Ok(VaultRecord::new(
            address,
            account,
            share_supply,
            unallocated_reserve,
        ))
    }

    async fn fetch<L: Ledger + ?Sized>(ledger: &L, address: &Pubkey) -> Result<Vec<u8>> {
        ledger
            .get_account(address)
            .await?
            .map(|account| account.data)
            .ok_or_else(|| OrchestratorError::decode(address, "account does not exist"))
    }
}

pub fn share_supply(mint: &Pubkey, data: &[u8]) -> Result<u64> {
    StateWithExtensions::<Mint>::unpack(data)
        .map(|state| state.base.supply)
        .map_err(|e| OrchestratorError::decode(mint, e))
}

pub fn token_amount(account: &Pubkey, data: &[u8]) -> Result<u64> {
    StateWithExtensions::<TokenAccount>::unpack(data)
        .map(|state| state.base.amount)
        .map_err(|e| OrchestratorError::decode(account, e))
}
