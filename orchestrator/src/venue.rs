//! Lending venues the vault allocates into.
//!
//! The venue set is closed: every supported market is a variant of [`Venue`]
//! and its account wiring is a variant of [`VenueAdapter`]. The orchestrator
//! only ever asks a venue for two operations, a refresh and a reconcile.

use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    sysvar,
};
use strum::{Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

use crate::config::serde_pubkey;
use crate::constants::TOKEN_PROGRAM_ID;
use crate::instructions::{anchor_instruction, VaultKeys};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Venue {
    Solend,
    Port,
    Jet,
}

impl Venue {
    fn index(self) -> usize {
        self as usize
    }
}

/// Fixed-size map keyed by [`Venue`]. Absent entries are venues that are
/// disabled or carry no value for the purpose at hand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VenueMap<T> {
    inner: [Option<T>; Venue::COUNT],
}

impl<T> Default for VenueMap<T> {
    fn default() -> Self {
        Self {
            inner: std::array::from_fn(|_| None),
        }
    }
}

impl<T> VenueMap<T> {
    pub fn get(&self, venue: Venue) -> Option<&T> {
        self.inner[venue.index()].as_ref()
    }

    pub fn insert(&mut self, venue: Venue, value: T) -> Option<T> {
        self.inner[venue.index()].replace(value)
    }

    pub fn contains(&self, venue: Venue) -> bool {
        self.inner[venue.index()].is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Venue, &T)> + '_ {
        Venue::iter().filter_map(move |venue| self.get(venue).map(|v| (venue, v)))
    }

    pub fn venues(&self) -> impl Iterator<Item = Venue> + '_ {
        self.iter().map(|(venue, _)| venue)
    }

    pub fn len(&self) -> usize {
        self.inner.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> FromIterator<(Venue, T)> for VenueMap<T> {
    fn from_iter<I: IntoIterator<Item = (Venue, T)>>(iter: I) -> Self {
        iter.into_iter().fold(VenueMap::default(), |mut acc, (venue, v)| {
            acc.insert(venue, v);
            acc
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SolendAccounts {
    #[serde(with = "serde_pubkey")]
    pub program: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market_authority: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub lp_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub liquidity_supply: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub pyth: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub switchboard: Pubkey,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PortAccounts {
    #[serde(with = "serde_pubkey")]
    pub program: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market_authority: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub lp_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub liquidity_supply: Pubkey,
    /// Port reserves without an oracle refresh from the reserve alone
    #[serde(default, with = "serde_pubkey::option")]
    pub oracle: Option<Pubkey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JetAccounts {
    #[serde(with = "serde_pubkey")]
    pub program: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market_authority: Pubkey,
    /// Deposit note mint
    #[serde(with = "serde_pubkey")]
    pub lp_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub liquidity_supply: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub fee_note_vault: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub pyth: Pubkey,
}

/// Static account wiring of one venue.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "venue", rename_all = "lowercase")]
pub enum VenueAdapter {
    Solend(SolendAccounts),
    Port(PortAccounts),
    Jet(JetAccounts),
}

impl VenueAdapter {
    pub fn venue(&self) -> Venue {
        match self {
            VenueAdapter::Solend(_) => Venue::Solend,
            VenueAdapter::Port(_) => Venue::Port,
            VenueAdapter::Jet(_) => Venue::Jet,
        }
    }
}

/// A configured venue: its adapter plus the vault-side accounts recorded
/// on-ledger for it. Immutable once the orchestrator is constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VenueHandle {
    pub adapter: VenueAdapter,
    /// The venue's reserve account
    pub reserve: Pubkey,
    /// Vault-owned account holding the venue's LP tokens
    pub holding_account: Pubkey,
}

impl VenueHandle {
    /// Updates the venue's accrual state and the vault's recorded value for it.
    pub fn refresh_instruction(&self, keys: &VaultKeys) -> Instruction {
        let vault = AccountMeta::new(keys.vault, false);
        let holding = AccountMeta::new_readonly(self.holding_account, false);
        let clock = AccountMeta::new_readonly(sysvar::clock::id(), false);

        let (name, accounts) = match &self.adapter {
            VenueAdapter::Solend(s) => (
                "refresh_solend",
                vec![
                    vault,
                    holding,
                    AccountMeta::new_readonly(s.program, false),
                    AccountMeta::new(self.reserve, false),
                    AccountMeta::new_readonly(s.pyth, false),
                    AccountMeta::new_readonly(s.switchboard, false),
                    clock,
                ],
            ),
            VenueAdapter::Port(p) => {
                let mut accounts = vec![
                    vault,
                    holding,
                    AccountMeta::new_readonly(p.program, false),
                    AccountMeta::new(self.reserve, false),
                    clock,
                ];
                if let Some(oracle) = p.oracle {
                    accounts.push(AccountMeta::new_readonly(oracle, false));
                }
                ("refresh_port", accounts)
            }
            VenueAdapter::Jet(j) => (
                "refresh_jet",
                vec![
                    vault,
                    holding,
                    AccountMeta::new_readonly(j.program, false),
                    AccountMeta::new(j.market, false),
                    AccountMeta::new_readonly(j.market_authority, false),
                    AccountMeta::new(self.reserve, false),
                    AccountMeta::new(j.fee_note_vault, false),
                    AccountMeta::new(j.lp_mint, false),
                    AccountMeta::new_readonly(j.pyth, false),
                    AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
                    clock,
                ],
            ),
        };

        anchor_instruction(keys.program_id, name, &(), accounts)
    }

    /// Moves capital between the vault and the venue.
    ///
    /// `withdraw_option == 0` moves the venue to the vault's committed target
    /// allocation; any other value redeems that many reserve units.
    pub fn reconcile_instruction(&self, keys: &VaultKeys, withdraw_option: u64) -> Instruction {
        let mut accounts = vec![
            AccountMeta::new(keys.vault, false),
            AccountMeta::new_readonly(keys.vault_authority, false),
            AccountMeta::new(keys.vault_reserve_token, false),
            AccountMeta::new(self.holding_account, false),
        ];

        let name = match &self.adapter {
            VenueAdapter::Solend(s) => {
                accounts.extend([
                    AccountMeta::new_readonly(s.program, false),
                    AccountMeta::new_readonly(s.market_authority, false),
                    AccountMeta::new_readonly(s.market, false),
                    AccountMeta::new(self.reserve, false),
                    AccountMeta::new(s.lp_mint, false),
                    AccountMeta::new(s.liquidity_supply, false),
                    AccountMeta::new_readonly(sysvar::clock::id(), false),
                    AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
                ]);
                "reconcile_solend"
            }
            VenueAdapter::Port(p) => {
                accounts.extend([
                    AccountMeta::new_readonly(p.program, false),
                    AccountMeta::new_readonly(p.market_authority, false),
                    AccountMeta::new_readonly(p.market, false),
                    AccountMeta::new(self.reserve, false),
                    AccountMeta::new(p.lp_mint, false),
                    AccountMeta::new(p.liquidity_supply, false),
                    AccountMeta::new_readonly(sysvar::clock::id(), false),
                    AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
                ]);
                "reconcile_port"
            }
            VenueAdapter::Jet(j) => {
                accounts.extend([
                    AccountMeta::new_readonly(j.program, false),
                    AccountMeta::new_readonly(j.market, false),
                    AccountMeta::new_readonly(j.market_authority, false),
                    AccountMeta::new(self.reserve, false),
                    AccountMeta::new(j.liquidity_supply, false),
                    AccountMeta::new(j.lp_mint, false),
                    AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
                ]);
                "reconcile_jet"
            }
        };

        anchor_instruction(keys.program_id, name, &withdraw_option, accounts)
    }
}
