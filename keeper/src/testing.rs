//! Fixed-state ledger for route tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use spl_token_2022::{
    solana_program::program_pack::Pack,
    state::{Account as TokenAccount, AccountState, Mint},
};
use tokio::sync::Mutex;
use vault_orchestrator::{
    constants::TOKEN_PROGRAM_ID,
    state::{Allocation, Allocations, VaultAccount, VaultConfig, YieldSourceFlags},
    venue::{JetAccounts, SolendAccounts},
    DeploymentConfig, Ledger, Rejection, Result, SimulationOutcome, VaultOrchestrator,
    VenueAdapter,
};

use crate::routes::SharedOrchestrator;

pub const SIMULATION_CODE: u32 = 6003;
const SLOT: u64 = 7;

/// Serves a vault holding 400 at Solend and 600 at Jet against 800 shares.
/// Simulation echoes the vault unchanged unless `reject_simulation` is set;
/// every submission is rejected.
pub struct StaticLedger {
    payer: Pubkey,
    accounts: HashMap<Pubkey, Account>,
    reject_simulation: bool,
}

#[async_trait]
impl Ledger for StaticLedger {
    fn payer(&self) -> Pubkey {
        self.payer
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self.accounts.get(address).cloned())
    }

    async fn minimum_balance_for_rent_exemption(&self, _data_len: usize) -> Result<u64> {
        Ok(2_039_280)
    }

    async fn simulate(
        &self,
        _instructions: &[Instruction],
        accounts: &[Pubkey],
    ) -> Result<SimulationOutcome> {
        if self.reject_simulation {
            return Ok(SimulationOutcome {
                rejection: Some(Rejection::new(Some(SIMULATION_CODE), "custom program error")),
                logs: vec!["Program log: weights rejected".to_string()],
                accounts: Vec::new(),
            });
        }
        Ok(SimulationOutcome {
            rejection: None,
            logs: Vec::new(),
            accounts: accounts
                .iter()
                .map(|key| self.accounts.get(key).map(|a| a.data.clone()))
                .collect(),
        })
    }

    async fn submit(
        &self,
        _instructions: &[Instruction],
        _extra_signers: &[&Keypair],
    ) -> std::result::Result<Signature, Rejection> {
        Err(Rejection::new(None, "submissions disabled"))
    }
}

fn account(owner: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: 1_000_000,
        data,
        owner,
        executable: false,
        rent_epoch: 0,
    }
}

fn vault_account(lp_token_mint: Pubkey, vault_reserve_token: Pubkey) -> VaultAccount {
    let allocations = Allocations {
        solend: Allocation::new(400, SLOT),
        port: Allocation::default(),
        jet: Allocation::new(600, SLOT),
    };
    VaultAccount {
        version: [1, 0, 0],
        owner: Pubkey::new_unique(),
        vault_authority: Pubkey::new_unique(),
        authority_seed: Pubkey::new_unique(),
        authority_bump: [255],
        solend_reserve: Pubkey::new_unique(),
        port_reserve: Pubkey::new_unique(),
        jet_reserve: Pubkey::new_unique(),
        vault_reserve_token,
        vault_solend_lp_token: Pubkey::new_unique(),
        vault_port_lp_token: Pubkey::new_unique(),
        vault_jet_lp_token: Pubkey::new_unique(),
        lp_token_mint,
        reserve_token_mint: Pubkey::new_unique(),
        fee_receiver: Pubkey::new_unique(),
        referral_fee_receiver: Pubkey::new_unique(),
        halt_flags: 0,
        yield_source_flags: (YieldSourceFlags::SOLEND | YieldSourceFlags::JET).bits(),
        value: Allocation::new(1000, SLOT),
        target_allocations: allocations,
        config: VaultConfig::default(),
        actual_allocations: allocations,
        _reserved: [0; 28],
    }
}

fn deployment() -> DeploymentConfig {
    DeploymentConfig {
        venues: vec![
            VenueAdapter::Solend(SolendAccounts {
                program: Pubkey::new_unique(),
                market: Pubkey::new_unique(),
                market_authority: Pubkey::new_unique(),
                lp_mint: Pubkey::new_unique(),
                liquidity_supply: Pubkey::new_unique(),
                pyth: Pubkey::new_unique(),
                switchboard: Pubkey::new_unique(),
            }),
            VenueAdapter::Jet(JetAccounts {
                program: Pubkey::new_unique(),
                market: Pubkey::new_unique(),
                market_authority: Pubkey::new_unique(),
                lp_mint: Pubkey::new_unique(),
                liquidity_supply: Pubkey::new_unique(),
                fee_note_vault: Pubkey::new_unique(),
                pyth: Pubkey::new_unique(),
            }),
        ],
    }
}

pub async fn orchestrator(reject_simulation: bool) -> SharedOrchestrator<StaticLedger> {
    let program_id = Pubkey::new_unique();
    let vault = Pubkey::new_unique();
    let lp_mint = Pubkey::new_unique();
    let reserve_token = Pubkey::new_unique();
    let state = vault_account(lp_mint, reserve_token);

    let mut mint = vec![0u8; Mint::LEN];
    Mint {
        supply: 800,
        decimals: 6,
        is_initialized: true,
        ..Mint::default()
    }
    .pack_into_slice(&mut mint);

    let mut reserve = vec![0u8; TokenAccount::LEN];
    TokenAccount {
        mint: state.reserve_token_mint,
        owner: state.vault_authority,
        amount: 0,
        state: AccountState::Initialized,
        ..TokenAccount::default()
    }
    .pack_into_slice(&mut reserve);

    let accounts = HashMap::from([
        (vault, account(program_id, state.encode())),
        (lp_mint, account(TOKEN_PROGRAM_ID, mint)),
        (reserve_token, account(TOKEN_PROGRAM_ID, reserve)),
    ]);
    let ledger = StaticLedger {
        payer: Pubkey::new_unique(),
        accounts,
        reject_simulation,
    };

    let orchestrator = VaultOrchestrator::new(ledger, program_id, vault, &deployment(), 6)
        .await
        .unwrap();
    Arc::new(Mutex::new(orchestrator))
}
