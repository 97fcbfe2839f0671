//! Instruction encoders for the vault program.

use borsh::BorshSerialize;
use solana_sdk::{
    hash::hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    sysvar,
};

use crate::allocation::ProposedWeights;
use crate::constants::TOKEN_PROGRAM_ID;
use crate::state::VaultRecord;
use crate::venue::Venue;

/// First 8 bytes of sha256("global:<name>")
pub fn sighash(name: &str) -> [u8; 8] {
    discriminator("global", name)
}

/// First 8 bytes of sha256("account:<name>")
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator("account", name)
}

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let preimage = format!("{namespace}:{name}");
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash(preimage.as_bytes()).to_bytes()[..8]);
    out
}

pub(crate) fn anchor_instruction<A: BorshSerialize>(
    program_id: Pubkey,
    name: &str,
    args: &A,
    accounts: Vec<AccountMeta>,
) -> Instruction {
    let mut data = sighash(name).to_vec();
    // Serializing into a Vec cannot fail
    args.serialize(&mut data)
        .unwrap_or_else(|_| unreachable!("in-memory serialization"));
    Instruction {
        program_id,
        accounts,
        data,
    }
}

/// Vault-level addresses every vault instruction needs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VaultKeys {
    pub program_id: Pubkey,
    pub vault: Pubkey,
    pub vault_authority: Pubkey,
    pub vault_reserve_token: Pubkey,
    pub lp_token_mint: Pubkey,
    pub reserve_token_mint: Pubkey,
}

impl VaultKeys {
    pub fn from_record(program_id: Pubkey, record: &VaultRecord) -> Self {
        Self {
            program_id,
            vault: record.address,
            vault_authority: record.account.vault_authority,
            vault_reserve_token: record.account.vault_reserve_token,
            lp_token_mint: record.account.lp_token_mint,
            reserve_token_mint: record.account.reserve_token_mint,
        }
    }
}

#[derive(BorshSerialize)]
struct StrategyWeightsArg {
    solend: u16,
    port: u16,
    jet: u16,
}

impl From<&ProposedWeights> for StrategyWeightsArg {
    fn from(weights: &ProposedWeights) -> Self {
        Self {
            solend: weights.bps(Venue::Solend),
            port: weights.bps(Venue::Port),
            jet: weights.bps(Venue::Jet),
        }
    }
}

/// Recomputes the vault's total value from the refreshed venue values.
pub fn consolidate_refresh(keys: &VaultKeys) -> Instruction {
    anchor_instruction(
        keys.program_id,
        "consolidate_refresh",
        &(),
        vec![
            AccountMeta::new(keys.vault, false),
            AccountMeta::new_readonly(keys.vault_authority, false),
            AccountMeta::new_readonly(keys.vault_reserve_token, false),
            AccountMeta::new(keys.lp_token_mint, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
    )
}

/// Commits target allocations. Without proposed weights the program's own
/// strategy decides; all-zero weights are sent in that case.
pub fn rebalance(
    keys: &VaultKeys,
    reserves: [Pubkey; 3],
    weights: Option<&ProposedWeights>,
) -> Instruction {
    let arg = weights
        .map(StrategyWeightsArg::from)
        .unwrap_or(StrategyWeightsArg {
            solend: 0,
            port: 0,
            jet: 0,
        });
    let [solend, port, jet] = reserves;
    anchor_instruction(
        keys.program_id,
        "rebalance",
        &arg,
        vec![
            AccountMeta::new(keys.vault, false),
            AccountMeta::new_readonly(solend, false),
            AccountMeta::new_readonly(port, false),
            AccountMeta::new_readonly(jet, false),
            AccountMeta::new_readonly(sysvar::clock::id(), false),
        ],
    )
}

/// Deposits `amount` reserve units from `user_reserve_token`, minting shares
/// into `user_lp_token`.
pub fn deposit(
    keys: &VaultKeys,
    user_authority: &Pubkey,
    user_reserve_token: &Pubkey,
    user_lp_token: &Pubkey,
    amount: u64,
) -> Instruction {
    anchor_instruction(
        keys.program_id,
        "deposit",
        &amount,
        vec![
            AccountMeta::new(keys.vault, false),
            AccountMeta::new_readonly(keys.vault_authority, false),
            AccountMeta::new(keys.vault_reserve_token, false),
            AccountMeta::new(keys.lp_token_mint, false),
            AccountMeta::new(*user_reserve_token, false),
            AccountMeta::new(*user_lp_token, false),
            AccountMeta::new_readonly(*user_authority, true),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(sysvar::clock::id(), false),
        ],
    )
}

/// Burns `shares` from `user_lp_token`, paying reserve units out to
/// `user_reserve_token`.
pub fn withdraw(
    keys: &VaultKeys,
    user_authority: &Pubkey,
    user_lp_token: &Pubkey,
    user_reserve_token: &Pubkey,
    shares: u64,
) -> Instruction {
    anchor_instruction(
        keys.program_id,
        "withdraw",
        &shares,
        vec![
            AccountMeta::new(keys.vault, false),
            AccountMeta::new_readonly(keys.vault_authority, false),
            AccountMeta::new(keys.vault_reserve_token, false),
            AccountMeta::new(keys.lp_token_mint, false),
            AccountMeta::new(*user_lp_token, false),
            AccountMeta::new(*user_reserve_token, false),
            AccountMeta::new_readonly(*user_authority, true),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            AccountMeta::new_readonly(sysvar::clock::id(), false),
        ],
    )
}
