use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::{OrchestratorError, Result};
use crate::math::{mul_div, Rounding, ONE_AS_BPS};
use crate::venue::{Venue, VenueMap};

/// Target weight per venue in basis points.
///
/// Only the per-venue bound is checked here; whether the weights satisfy the
/// vault's policy (sum, allocation cap, proof check) is for the vault program
/// to decide during simulation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(Venue, u16)>", into = "Vec<(Venue, u16)>")]
pub struct ProposedWeights(VenueMap<u16>);

impl ProposedWeights {
    pub fn new(weights: impl IntoIterator<Item = (Venue, u16)>) -> Result<Self> {
        let mut map = VenueMap::default();
        for (venue, bps) in weights {
            if u64::from(bps) > ONE_AS_BPS {
                return Err(OrchestratorError::InvalidInput(format!(
                    "weight for {venue} is {bps} bps, above {ONE_AS_BPS}"
                )));
            }
            map.insert(venue, bps);
        }
        Ok(Self(map))
    }

    /// Weight of `venue`, zero when not proposed
    pub fn bps(&self, venue: Venue) -> u16 {
        self.0.get(venue).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Venue, u16)> + '_ {
        self.0.iter().map(|(venue, bps)| (venue, *bps))
    }
}

impl TryFrom<Vec<(Venue, u16)>> for ProposedWeights {
    type Error = OrchestratorError;

    fn try_from(weights: Vec<(Venue, u16)>) -> Result<Self> {
        Self::new(weights)
    }
}

impl From<ProposedWeights> for Vec<(Venue, u16)> {
    fn from(weights: ProposedWeights) -> Self {
        weights.iter().collect()
    }
}

/// Per-venue values denominated in one reserve asset.
///
/// Used both for the target allocation a rebalance intends to reach and for
/// the actual allocation currently parked at each venue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationSet {
    /// Mint of the reserve asset the values are expressed in
    pub denomination: Pubkey,
    pub values: VenueMap<u64>,
}

impl AllocationSet {
    pub fn new(denomination: Pubkey, values: VenueMap<u64>) -> Self {
        Self {
            denomination,
            values,
        }
    }

    /// Value at `venue`, zero for venues without an entry
    pub fn value(&self, venue: Venue) -> u64 {
        self.values.get(venue).copied().unwrap_or(0)
    }

    /// Rescales every value from `from_total` to `to_total`, rounding down.
    pub fn rescale(&self, from_total: u64, to_total: u64) -> Result<Self> {
        let values = self
            .values
            .iter()
            .map(|(venue, v)| Ok((venue, mul_div(*v, to_total, from_total, Rounding::Floor)?)))
            .collect::<Result<VenueMap<u64>>>()?;
        Ok(Self::new(self.denomination, values))
    }
}
