//! In-memory ledger modelling the vault program and its venues.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_program,
};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_token_2022::{
    instruction::TokenInstruction,
    solana_program::program_pack::Pack,
    state::{Account as TokenAccount, AccountState, Mint},
};
use vault_orchestrator::{
    constants::{NATIVE_MINT, TOKEN_PROGRAM_ID},
    instructions::sighash,
    math::{apply_bps, ExchangeRate, Rounding},
    state::{Allocation, Allocations, VaultAccount, VaultConfig, VaultFlags, YieldSourceFlags},
    venue::{JetAccounts, PortAccounts, SolendAccounts},
    DeploymentConfig, Ledger, OrchestratorError, Rejection, SimulationOutcome, Venue,
    VenueAdapter, VaultOrchestrator,
};

pub const RENT: u64 = 2_039_280;
const SLOT: u64 = 42;

pub const INSUFFICIENT_RESERVE: u32 = 6101;
pub const STALE_VENUE: u32 = 6102;
pub const INVALID_WEIGHTS: u32 = 6103;
pub const MISSING_ACCOUNT: u32 = 6104;
pub const CLOSE_FAILED: u32 = 6105;
pub const INJECTED: u32 = 6199;

const VENUES: [Venue; 3] = [Venue::Solend, Venue::Port, Venue::Jet];

fn slot_of(venue: Venue) -> usize {
    match venue {
        Venue::Solend => 0,
        Venue::Port => 1,
        Venue::Jet => 2,
    }
}

#[derive(Clone, Debug)]
struct Token {
    mint: Pubkey,
    owner: Pubkey,
    amount: u64,
}

/// Ledger contents; cloned per transaction so failures roll back.
#[derive(Clone)]
struct Book {
    vault: VaultAccount,
    share_supply: u64,
    tokens: HashMap<Pubkey, Token>,
    /// Reserve units actually parked at each venue
    capital: [u64; 3],
    /// Weights the vault's own strategy picks
    strategy: [u16; 3],
    /// Lamports of accounts created but not yet initialized
    pending: HashMap<Pubkey, u64>,
    refunded: u64,
    fail_close: bool,
}

impl Book {
    fn reserve(&self) -> u64 {
        self.tokens
            .get(&self.vault.vault_reserve_token)
            .map_or(0, |t| t.amount)
    }

    fn reserve_mut(&mut self) -> &mut u64 {
        let key = self.vault.vault_reserve_token;
        &mut self
            .tokens
            .get_mut(&key)
            .expect("vault reserve account")
            .amount
    }

    fn token_mut(&mut self, key: &Pubkey) -> Result<&mut Token, u32> {
        self.tokens.get_mut(key).ok_or(MISSING_ACCOUNT)
    }

    fn set_actual(&mut self, venue: Venue) {
        *self.vault.actual_allocations.get_mut(venue) =
            Allocation::new(self.capital[slot_of(venue)], SLOT);
    }
}

struct Inner {
    book: Book,
    attempts: usize,
    fail_attempt: Option<usize>,
    simulations: usize,
    confirmed: Vec<Vec<String>>,
}

pub struct MockLedger {
    payer: Keypair,
    program_id: Pubkey,
    vault: Pubkey,
    inner: Mutex<Inner>,
}

impl MockLedger {
    /// Makes the `n`-th submission (1-based, counted from now) fail.
    pub fn fail_submission(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_attempt = Some(inner.attempts + n);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_attempt = None;
        inner.book.fail_close = false;
    }

    pub fn fail_close(&self) {
        self.inner.lock().unwrap().book.fail_close = true;
    }

    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    pub fn simulations(&self) -> usize {
        self.inner.lock().unwrap().simulations
    }

    /// Instruction names of every confirmed batch, in order
    pub fn confirmed(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().confirmed.clone()
    }

    pub fn balance(&self, account: &Pubkey) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .book
            .tokens
            .get(account)
            .map(|t| t.amount)
    }

    pub fn capital(&self, venue: Venue) -> u64 {
        self.inner.lock().unwrap().book.capital[slot_of(venue)]
    }

    /// Native token accounts owned by the payer outside the vault
    pub fn open_native_accounts(&self) -> usize {
        let payer = self.payer.pubkey();
        self.inner
            .lock()
            .unwrap()
            .book
            .tokens
            .values()
            .filter(|t| t.mint == NATIVE_MINT && t.owner == payer)
            .count()
    }

    pub fn refunded(&self) -> u64 {
        self.inner.lock().unwrap().book.refunded
    }

    pub fn associated(&self, mint: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(&self.payer.pubkey(), mint, &TOKEN_PROGRAM_ID)
    }

    fn render(&self, book: &Book, address: &Pubkey) -> Option<Vec<u8>> {
        if *address == self.vault {
            return Some(book.vault.encode());
        }
        if *address == book.vault.lp_token_mint {
            let mut data = vec![0u8; Mint::LEN];
            Mint {
                supply: book.share_supply,
                decimals: 6,
                is_initialized: true,
                ..Mint::default()
            }
            .pack_into_slice(&mut data);
            return Some(data);
        }
        book.tokens.get(address).map(|token| {
            let mut data = vec![0u8; TokenAccount::LEN];
            TokenAccount {
                mint: token.mint,
                owner: token.owner,
                amount: token.amount,
                state: AccountState::Initialized,
                ..TokenAccount::default()
            }
            .pack_into_slice(&mut data);
            data
        })
    }

    fn execute(
        &self,
        book: &mut Book,
        instructions: &[Instruction],
        signers: &[Pubkey],
    ) -> Result<Vec<String>, Rejection> {
        let mut refreshed = Vec::new();
        instructions
            .iter()
            .enumerate()
            .map(|(i, ix)| {
                self.apply(book, ix, signers, &mut refreshed).map_err(|code| {
                    Rejection::new(
                        Some(code),
                        format!("custom program error: {code} in instruction {i}"),
                    )
                })
            })
            .collect()
    }

    fn apply(
        &self,
        book: &mut Book,
        ix: &Instruction,
        signers: &[Pubkey],
        refreshed: &mut Vec<Venue>,
    ) -> Result<String, u32> {
        if ix.program_id == system_program::id() {
            let account = ix.accounts[1].pubkey;
            if !signers.contains(&account) {
                return Err(MISSING_ACCOUNT);
            }
            let lamports = u64::from_le_bytes(ix.data[4..12].try_into().unwrap());
            book.pending.insert(account, lamports);
            return Ok("create_account".to_string());
        }

        if ix.program_id == spl_associated_token_account::id() {
            let address = ix.accounts[1].pubkey;
            let owner = ix.accounts[2].pubkey;
            let mint = ix.accounts[3].pubkey;
            book.tokens.entry(address).or_insert(Token {
                mint,
                owner,
                amount: 0,
            });
            return Ok("create_associated_account".to_string());
        }

        if ix.program_id == TOKEN_PROGRAM_ID {
            return match TokenInstruction::unpack(&ix.data).unwrap() {
                TokenInstruction::InitializeAccount3 { owner } => {
                    let account = ix.accounts[0].pubkey;
                    let mint = ix.accounts[1].pubkey;
                    let lamports = book.pending.remove(&account).ok_or(MISSING_ACCOUNT)?;
                    book.tokens.insert(
                        account,
                        Token {
                            mint,
                            owner,
                            amount: lamports - RENT,
                        },
                    );
                    Ok("initialize_account3".to_string())
                }
                TokenInstruction::CloseAccount => {
                    if book.fail_close {
                        return Err(CLOSE_FAILED);
                    }
                    let closed = book
                        .tokens
                        .remove(&ix.accounts[0].pubkey)
                        .ok_or(MISSING_ACCOUNT)?;
                    book.refunded += closed.amount + RENT;
                    Ok("close_account".to_string())
                }
                _ => Err(MISSING_ACCOUNT),
            };
        }

        assert_eq!(ix.program_id, self.program_id, "unexpected program");
        let name = [
            "refresh_solend",
            "refresh_port",
            "refresh_jet",
            "consolidate_refresh",
            "rebalance",
            "reconcile_solend",
            "reconcile_port",
            "reconcile_jet",
            "deposit",
            "withdraw",
        ]
        .into_iter()
        .find(|name| ix.data[..8] == sighash(name))
        .expect("known vault instruction");
        let venue = |name: &str| -> Venue { name.rsplit('_').next().unwrap().parse().unwrap() };
        let arg_u64 = || u64::from_le_bytes(ix.data[8..16].try_into().unwrap());

        match name {
            "refresh_solend" | "refresh_port" | "refresh_jet" => {
                let venue = venue(name);
                book.set_actual(venue);
                refreshed.push(venue);
            }
            "consolidate_refresh" => {
                let parked: u64 = VENUES
                    .iter()
                    .filter(|v| book.vault.is_enabled(**v))
                    .map(|v| book.capital[slot_of(*v)])
                    .sum();
                book.vault.value = Allocation::new(parked + book.reserve(), SLOT);
            }
            "rebalance" => {
                let mut weights = [0u16; 3];
                for (i, w) in weights.iter_mut().enumerate() {
                    *w = u16::from_le_bytes(ix.data[8 + 2 * i..10 + 2 * i].try_into().unwrap());
                }
                if weights == [0; 3] {
                    weights = book.strategy;
                } else if weights.iter().map(|w| u32::from(*w)).sum::<u32>() != 10_000 {
                    return Err(INVALID_WEIGHTS);
                }
                let total = book.vault.value.value;
                for venue in VENUES {
                    let value = apply_bps(total, weights[slot_of(venue)]).unwrap();
                    *book.vault.target_allocations.get_mut(venue) = Allocation::new(value, SLOT);
                }
            }
            "reconcile_solend" | "reconcile_port" | "reconcile_jet" => {
                let venue = venue(name);
                if !refreshed.contains(&venue) {
                    return Err(STALE_VENUE);
                }
                let slot = slot_of(venue);
                let withdraw_option = arg_u64();
                if withdraw_option == 0 {
                    let target = book.vault.target_allocations.get(venue).value;
                    let parked = book.capital[slot];
                    if target > parked {
                        let need = target - parked;
                        if book.reserve() < need {
                            return Err(INSUFFICIENT_RESERVE);
                        }
                        *book.reserve_mut() -= need;
                    } else {
                        *book.reserve_mut() += parked - target;
                    }
                    book.capital[slot] = target;
                } else {
                    if withdraw_option > book.capital[slot] {
                        return Err(INSUFFICIENT_RESERVE);
                    }
                    book.capital[slot] -= withdraw_option;
                    *book.reserve_mut() += withdraw_option;
                }
                book.set_actual(venue);
            }
            "deposit" => {
                let amount = arg_u64();
                let source = ix.accounts[4].pubkey;
                let share_account = ix.accounts[5].pubkey;
                let rate = ExchangeRate::new(book.vault.value.value, book.share_supply);
                let shares = rate.reserve_to_shares(amount, Rounding::Floor).unwrap();

                let from = book.token_mut(&source)?;
                if from.amount < amount {
                    return Err(INSUFFICIENT_RESERVE);
                }
                from.amount -= amount;
                book.token_mut(&share_account)?.amount += shares;
                *book.reserve_mut() += amount;
                book.share_supply += shares;
                book.vault.value.value += amount;
            }
            "withdraw" => {
                let shares = arg_u64();
                let share_account = ix.accounts[4].pubkey;
                let destination = ix.accounts[5].pubkey;
                let rate = ExchangeRate::new(book.vault.value.value, book.share_supply);
                let amount = rate.shares_to_reserve(shares, Rounding::Floor).unwrap();

                if book.reserve() < amount {
                    return Err(INSUFFICIENT_RESERVE);
                }
                let holder = book.token_mut(&share_account)?;
                if holder.amount < shares {
                    return Err(INSUFFICIENT_RESERVE);
                }
                holder.amount -= shares;
                book.token_mut(&destination)?.amount += amount;
                *book.reserve_mut() -= amount;
                book.share_supply -= shares;
                book.vault.value.value -= amount;
            }
            _ => unreachable!(),
        }
        Ok(name.to_string())
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    async fn get_account(&self, address: &Pubkey) -> vault_orchestrator::Result<Option<Account>> {
        let inner = self.inner.lock().unwrap();
        Ok(self.render(&inner.book, address).map(|data| Account {
            lamports: RENT,
            data,
            owner: TOKEN_PROGRAM_ID,
            executable: false,
            rent_epoch: 0,
        }))
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        _data_len: usize,
    ) -> vault_orchestrator::Result<u64> {
        Ok(RENT)
    }

    async fn simulate(
        &self,
        instructions: &[Instruction],
        accounts: &[Pubkey],
    ) -> vault_orchestrator::Result<SimulationOutcome> {
        let mut inner = self.inner.lock().unwrap();
        inner.simulations += 1;
        let mut book = inner.book.clone();
        match self.execute(&mut book, instructions, &[]) {
            Ok(_) => Ok(SimulationOutcome {
                rejection: None,
                logs: vec!["Program log: simulated".to_string()],
                accounts: accounts.iter().map(|a| self.render(&book, a)).collect(),
            }),
            Err(rejection) => Ok(SimulationOutcome {
                rejection: Some(rejection),
                logs: vec!["Program log: rejected".to_string()],
                accounts: vec![None; accounts.len()],
            }),
        }
    }

    async fn submit(
        &self,
        instructions: &[Instruction],
        extra_signers: &[&Keypair],
    ) -> Result<Signature, Rejection> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if inner.fail_attempt == Some(inner.attempts) {
            return Err(Rejection::new(Some(INJECTED), "injected failure"));
        }
        let signers: Vec<Pubkey> = extra_signers.iter().map(|k| k.pubkey()).collect();
        let mut book = inner.book.clone();
        let names = self.execute(&mut book, instructions, &signers)?;
        inner.book = book;
        inner.confirmed.push(names);
        Ok(Signature::new_unique())
    }
}

/// Builds a vault plus the ledger holding it.
pub struct VaultBuilder {
    pub reserve_mint: Pubkey,
    /// Reserve units parked at each venue, in venue order
    pub capital: [u64; 3],
    pub unallocated: u64,
    pub share_supply: u64,
    pub strategy: [u16; 3],
    /// Reserve units in the payer's own account
    pub payer_reserve: u64,
    /// Shares held by the payer; its share account exists when set
    pub payer_shares: Option<u64>,
    pub enabled: YieldSourceFlags,
    pub halt: VaultFlags,
    /// Venue whose recorded allocation is marked stale
    pub stale: Option<Venue>,
}

impl Default for VaultBuilder {
    fn default() -> Self {
        Self {
            reserve_mint: Pubkey::new_unique(),
            capital: [0; 3],
            unallocated: 0,
            share_supply: 0,
            strategy: [4_000, 0, 6_000],
            payer_reserve: 1_000,
            payer_shares: None,
            enabled: YieldSourceFlags::all(),
            halt: VaultFlags::empty(),
            stale: None,
        }
    }
}

pub struct Harness {
    pub ledger: MockLedger,
    pub program_id: Pubkey,
    pub vault: Pubkey,
    pub deployment: DeploymentConfig,
}

impl Harness {
    pub async fn orchestrator(
        self,
        max_operands: usize,
    ) -> Result<VaultOrchestrator<MockLedger>, OrchestratorError> {
        VaultOrchestrator::new(
            self.ledger,
            self.program_id,
            self.vault,
            &self.deployment,
            max_operands,
        )
        .await
    }
}

fn unique() -> Pubkey {
    Pubkey::new_unique()
}

impl VaultBuilder {
    pub fn build(self) -> Harness {
        let payer = Keypair::new();
        let program_id = unique();
        let vault = unique();

        let allocations = Allocations {
            solend: Allocation::new(self.capital[0], SLOT),
            port: Allocation::new(self.capital[1], SLOT),
            jet: Allocation::new(self.capital[2], SLOT),
        };
        let mut account = VaultAccount {
            version: [1, 0, 0],
            owner: unique(),
            vault_authority: unique(),
            authority_seed: unique(),
            authority_bump: [254],
            solend_reserve: unique(),
            port_reserve: unique(),
            jet_reserve: unique(),
            vault_reserve_token: unique(),
            vault_solend_lp_token: unique(),
            vault_port_lp_token: unique(),
            vault_jet_lp_token: unique(),
            lp_token_mint: unique(),
            reserve_token_mint: self.reserve_mint,
            fee_receiver: unique(),
            referral_fee_receiver: unique(),
            halt_flags: self.halt.bits(),
            yield_source_flags: self.enabled.bits(),
            value: Allocation::new(self.capital.iter().sum::<u64>() + self.unallocated, SLOT),
            target_allocations: allocations,
            config: VaultConfig::default(),
            actual_allocations: allocations,
            _reserved: [0; 28],
        };
        if let Some(venue) = self.stale {
            account.actual_allocations.get_mut(venue).last_update.stale = true;
        }

        let mut tokens = HashMap::new();
        tokens.insert(
            account.vault_reserve_token,
            Token {
                mint: self.reserve_mint,
                owner: account.vault_authority,
                amount: self.unallocated,
            },
        );
        let owner = payer.pubkey();
        if self.reserve_mint != NATIVE_MINT {
            tokens.insert(
                get_associated_token_address_with_program_id(&owner, &self.reserve_mint, &TOKEN_PROGRAM_ID),
                Token {
                    mint: self.reserve_mint,
                    owner,
                    amount: self.payer_reserve,
                },
            );
        }
        if let Some(shares) = self.payer_shares {
            tokens.insert(
                get_associated_token_address_with_program_id(
                    &owner,
                    &account.lp_token_mint,
                    &TOKEN_PROGRAM_ID,
                ),
                Token {
                    mint: account.lp_token_mint,
                    owner,
                    amount: shares,
                },
            );
        }

        let deployment = DeploymentConfig {
            venues: vec![
                VenueAdapter::Solend(SolendAccounts {
                    program: unique(),
                    market: unique(),
                    market_authority: unique(),
                    lp_mint: unique(),
                    liquidity_supply: unique(),
                    pyth: unique(),
                    switchboard: unique(),
                }),
                VenueAdapter::Port(PortAccounts {
                    program: unique(),
                    market: unique(),
                    market_authority: unique(),
                    lp_mint: unique(),
                    liquidity_supply: unique(),
                    oracle: None,
                }),
                VenueAdapter::Jet(JetAccounts {
                    program: unique(),
                    market: unique(),
                    market_authority: unique(),
                    lp_mint: unique(),
                    liquidity_supply: unique(),
                    fee_note_vault: unique(),
                    pyth: unique(),
                }),
            ],
        };

        let book = Book {
            vault: account,
            share_supply: self.share_supply,
            tokens,
            capital: self.capital,
            strategy: self.strategy,
            pending: HashMap::new(),
            refunded: 0,
            fail_close: false,
        };

        Harness {
            ledger: MockLedger {
                payer,
                program_id,
                vault,
                inner: Mutex::new(Inner {
                    book,
                    attempts: 0,
                    fail_attempt: None,
                    simulations: 0,
                    confirmed: Vec::new(),
                }),
            },
            program_id,
            vault,
            deployment,
        }
    }
}
