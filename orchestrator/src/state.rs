use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;
use strum::IntoEnumIterator;

use crate::allocation::AllocationSet;
use crate::constants::VAULT_ACCOUNT_NAME;
use crate::error::{OrchestratorError, Result};
use crate::instructions::account_discriminator;
use crate::math::ExchangeRate;
use crate::venue::{Venue, VenueMap};

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LastUpdate {
    pub slot: u64,
    pub stale: bool,
    pub _padding: [u8; 7],
}

/// A value plus the slot it was last written at
#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    pub value: u64,
    pub last_update: LastUpdate,
}

impl Allocation {
    pub fn new(value: u64, slot: u64) -> Self {
        Self {
            value,
            last_update: LastUpdate {
                slot,
                stale: false,
                _padding: [0; 7],
            },
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Allocations {
    pub solend: Allocation,
    pub port: Allocation,
    pub jet: Allocation,
}

impl Allocations {
    pub fn get(&self, venue: Venue) -> &Allocation {
        match venue {
            Venue::Solend => &self.solend,
            Venue::Port => &self.port,
            Venue::Jet => &self.jet,
        }
    }

    pub fn get_mut(&mut self, venue: Venue) -> &mut Allocation {
        match venue {
            Venue::Solend => &mut self.solend,
            Venue::Port => &mut self.port,
            Venue::Jet => &mut self.jet,
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RebalanceMode {
    /// The program derives weights from its strategy
    #[default]
    Calculator,
    /// Proposed weights are accepted if they beat the strategy's APR
    ProofChecker,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrategyType {
    #[default]
    MaxYield,
    EqualAllocation,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VaultConfig {
    /// Max reserve tokens the vault accepts
    pub deposit_cap: u64,
    pub fee_carry_bps: u32,
    pub fee_mgmt_bps: u32,
    pub referral_fee_pct: u8,
    /// Max percentage allocated to any single venue
    pub allocation_cap_pct: u8,
    pub rebalance_mode: RebalanceMode,
    pub strategy_type: StrategyType,
    pub _padding: [u32; 3],
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VaultFlags: u16 {
        const HALT_RECONCILES = 1 << 0;
        const HALT_REFRESHES = 1 << 1;
        const HALT_DEPOSITS_WITHDRAWS = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct YieldSourceFlags: u16 {
        const SOLEND = 1 << 0;
        const PORT = 1 << 1;
        const JET = 1 << 2;
    }
}

impl YieldSourceFlags {
    pub fn for_venue(venue: Venue) -> Self {
        match venue {
            Venue::Solend => YieldSourceFlags::SOLEND,
            Venue::Port => YieldSourceFlags::PORT,
            Venue::Jet => YieldSourceFlags::JET,
        }
    }
}

/// On-ledger layout of the vault account, after its 8-byte discriminator.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct VaultAccount {
    pub version: [u8; 3],
    pub owner: Pubkey,
    pub vault_authority: Pubkey,
    pub authority_seed: Pubkey,
    pub authority_bump: [u8; 1],
    pub solend_reserve: Pubkey,
    pub port_reserve: Pubkey,
    pub jet_reserve: Pubkey,
    pub vault_reserve_token: Pubkey,
    pub vault_solend_lp_token: Pubkey,
    pub vault_port_lp_token: Pubkey,
    pub vault_jet_lp_token: Pubkey,
    pub lp_token_mint: Pubkey,
    pub reserve_token_mint: Pubkey,
    pub fee_receiver: Pubkey,
    pub referral_fee_receiver: Pubkey,
    pub halt_flags: u16,
    pub yield_source_flags: u16,
    /// Total value denominated in the reserve token
    pub value: Allocation,
    /// Prospective allocations set by rebalance, executed by reconciles
    pub target_allocations: Allocations,
    pub config: VaultConfig,
    pub actual_allocations: Allocations,
    pub _reserved: [u32; 28],
}

impl VaultAccount {
    pub fn discriminator() -> [u8; 8] {
        account_discriminator(VAULT_ACCOUNT_NAME)
    }

    /// Decodes raw account data, checking the discriminator first.
    pub fn decode(address: &Pubkey, data: &[u8]) -> Result<Self> {
        if data.len() < 8 || data[..8] != Self::discriminator() {
            return Err(OrchestratorError::decode(address, "unexpected account discriminator"));
        }
        // Trailing bytes are allowed: accounts may be allocated larger than the layout
        let mut body = &data[8..];
        VaultAccount::deserialize(&mut body).map_err(|e| OrchestratorError::decode(address, e))
    }

    /// Discriminator followed by the borsh layout
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Self::discriminator().to_vec();
        // Writing into a Vec cannot fail
        self.serialize(&mut data)
            .unwrap_or_else(|_| unreachable!("in-memory serialization"));
        data
    }

    pub fn halt_flags(&self) -> VaultFlags {
        VaultFlags::from_bits_truncate(self.halt_flags)
    }

    pub fn yield_source_flags(&self) -> YieldSourceFlags {
        YieldSourceFlags::from_bits_truncate(self.yield_source_flags)
    }

    pub fn enabled_venues(&self) -> impl Iterator<Item = Venue> + '_ {
        Venue::iter().filter(move |venue| self.is_enabled(*venue))
    }

    pub fn is_enabled(&self, venue: Venue) -> bool {
        self.yield_source_flags()
            .contains(YieldSourceFlags::for_venue(venue))
    }

    pub fn reserve(&self, venue: Venue) -> Pubkey {
        match venue {
            Venue::Solend => self.solend_reserve,
            Venue::Port => self.port_reserve,
            Venue::Jet => self.jet_reserve,
        }
    }

    pub fn holding_account(&self, venue: Venue) -> Pubkey {
        match venue {
            Venue::Solend => self.vault_solend_lp_token,
            Venue::Port => self.vault_port_lp_token,
            Venue::Jet => self.vault_jet_lp_token,
        }
    }

    fn values_of(&self, allocations: &Allocations) -> AllocationSet {
        let values = self
            .enabled_venues()
            .map(|venue| (venue, allocations.get(venue).value))
            .collect::<VenueMap<u64>>();
        AllocationSet::new(self.reserve_token_mint, values)
    }

    pub fn actual_allocation(&self) -> AllocationSet {
        self.values_of(&self.actual_allocations)
    }

    pub fn target_allocation(&self) -> AllocationSet {
        self.values_of(&self.target_allocations)
    }
}

static SNAPSHOT_VERSION: AtomicU64 = AtomicU64::new(0);

/// Immutable snapshot of the vault as last loaded from the ledger.
///
/// Never mutated in place; a reload replaces it wholesale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultRecord {
    pub address: Pubkey,
    /// Strictly increasing per load within the process
    pub version: u64,
    pub account: VaultAccount,
    /// Supply of the pool share token
    pub share_supply: u64,
    /// Reserve tokens sitting in the vault, not allocated to any venue
    pub unallocated_reserve: u64,
}

impl VaultRecord {
    pub fn new(
        address: Pubkey,
        account: VaultAccount,
        share_supply: u64,
        unallocated_reserve: u64,
    ) -> Self {
        Self {
            address,
            version: SNAPSHOT_VERSION.fetch_add(1, Ordering::Relaxed) + 1,
            account,
            share_supply,
            unallocated_reserve,
        }
    }

    pub fn total_value(&self) -> u64 {
        self.account.value.value
    }

    pub fn exchange_rate(&self) -> ExchangeRate {
        ExchangeRate::new(self.total_value(), self.share_supply)
    }

    pub fn denomination(&self) -> Pubkey {
        self.account.reserve_token_mint
    }

    pub fn enabled_venues(&self) -> impl Iterator<Item = Venue> + '_ {
        self.account.enabled_venues()
    }

    pub fn allocation(&self, venue: Venue) -> &Allocation {
        self.account.actual_allocations.get(venue)
    }

    /// Refuses an operation the vault program would reject for its halt flags.
    pub fn ensure_not_halted(&self, flag: VaultFlags) -> Result<()> {
        if self.account.halt_flags().intersects(flag) {
            let what = if flag.contains(VaultFlags::HALT_DEPOSITS_WITHDRAWS) {
                "deposits and withdrawals"
            } else if flag.contains(VaultFlags::HALT_RECONCILES) {
                "reconciles"
            } else {
                "refreshes"
            };
            return Err(OrchestratorError::VaultHalted(what));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_account() -> VaultAccount {
        VaultAccount {
            version: [1, 0, 0],
            owner: Pubkey::new_unique(),
            vault_authority: Pubkey::new_unique(),
            authority_seed: Pubkey::new_unique(),
            authority_bump: [255],
            solend_reserve: Pubkey::new_unique(),
            port_reserve: Pubkey::new_unique(),
            jet_reserve: Pubkey::new_unique(),
            vault_reserve_token: Pubkey::new_unique(),
            vault_solend_lp_token: Pubkey::new_unique(),
            vault_port_lp_token: Pubkey::new_unique(),
            vault_jet_lp_token: Pubkey::new_unique(),
            lp_token_mint: Pubkey::new_unique(),
            reserve_token_mint: Pubkey::new_unique(),
            fee_receiver: Pubkey::new_unique(),
            referral_fee_receiver: Pubkey::new_unique(),
            halt_flags: 0,
            yield_source_flags: YieldSourceFlags::all().bits(),
            value: Allocation::new(1_000, 10),
            target_allocations: Allocations::default(),
            config: VaultConfig::default(),
            actual_allocations: Allocations {
                solend: Allocation::new(330, 10),
                port: Allocation::new(330, 10),
                jet: Allocation::new(340, 10),
            },
            _reserved: [0; 28],
        }
    }

    #[test]
    fn test_decode_checks_discriminator() {
        let address = Pubkey::new_unique();
        let mut data = sample_account().encode();
        data[0] ^= 0xff;
        let err = VaultAccount::decode(&address, &data).unwrap_err();
        assert!(matches!(err, OrchestratorError::AccountDecode { account, .. } if account == address));
    }

    #[test]
    fn test_decode_rejects_truncated_layout() {
        let address = Pubkey::new_unique();
        let data = sample_account().encode();
        let err = VaultAccount::decode(&address, &data[..data.len() - 40]).unwrap_err();
        assert!(matches!(err, OrchestratorError::AccountDecode { .. }));
    }

    #[test]
    fn test_decode_tolerates_trailing_bytes() {
        let account = sample_account();
        let mut data = account.encode();
        data.extend_from_slice(&[0u8; 64]);
        assert_eq!(VaultAccount::decode(&Pubkey::new_unique(), &data).unwrap(), account);
    }

    #[test]
    fn test_disabled_venue_is_skipped() {
        let mut account = sample_account();
        account.yield_source_flags = (YieldSourceFlags::SOLEND | YieldSourceFlags::JET).bits();
        let actual = account.actual_allocation();
        assert_eq!(actual.values.venues().collect::<Vec<_>>(), vec![Venue::Solend, Venue::Jet]);
        assert_eq!(actual.denomination, account.reserve_token_mint);
    }

    #[test]
    fn test_record_versions_increase() {
        let first = VaultRecord::new(Pubkey::new_unique(), sample_account(), 100, 0);
        let second = VaultRecord::new(first.address, sample_account(), 100, 0);
        assert!(second.version > first.version);
    }

    #[test]
    fn test_halted_vault_is_refused() {
        let mut account = sample_account();
        account.halt_flags = VaultFlags::HALT_RECONCILES.bits();
        let record = VaultRecord::new(Pubkey::new_unique(), account, 0, 0);
        assert!(record.ensure_not_halted(VaultFlags::HALT_DEPOSITS_WITHDRAWS).is_ok());
        assert!(matches!(
            record.ensure_not_halted(VaultFlags::HALT_RECONCILES),
            Err(OrchestratorError::VaultHalted("reconciles"))
        ));
    }
}
