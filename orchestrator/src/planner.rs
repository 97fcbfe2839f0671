//! Turns a target allocation into an ordered list of capital movements.

use std::fmt;

use crate::allocation::AllocationSet;
use crate::error::{OrchestratorError, Result};
use crate::venue::Venue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Capital flows from the venue back to the vault
    Withdraw,
    /// Capital flows from the vault into the venue
    Deposit,
}

/// One venue's required movement, in reserve-asset units
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileOperation {
    pub venue: Venue,
    pub signed_delta: i128,
    pub direction: Direction,
}

impl ReconcileOperation {
    pub fn new(venue: Venue, signed_delta: i128) -> Option<Self> {
        let direction = match signed_delta {
            0 => return None,
            d if d < 0 => Direction::Withdraw,
            _ => Direction::Deposit,
        };
        Some(Self {
            venue,
            signed_delta,
            direction,
        })
    }

    /// Absolute amount moved
    pub fn amount(&self) -> Result<u64> {
        u64::try_from(self.signed_delta.unsigned_abs()).map_err(|_| OrchestratorError::MathOverflow)
    }
}

impl fmt::Display for ReconcileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Withdraw => "withdraw",
            Direction::Deposit => "deposit",
        };
        write!(f, "{verb} {} {}", self.venue, self.signed_delta.unsigned_abs())
    }
}

pub struct DiffPlanner;

impl DiffPlanner {
    /// `target - actual` for every venue present in either set, skipping
    /// venues that need no movement.
    pub fn diff(target: &AllocationSet, actual: &AllocationSet) -> Result<Vec<ReconcileOperation>> {
        if target.denomination != actual.denomination {
            return Err(OrchestratorError::DenominationMismatch {
                expected: actual.denomination,
                found: target.denomination,
            });
        }

        let venues = target
            .values
            .venues()
            .chain(actual.values.venues().filter(|v| !target.values.contains(*v)));

        let mut ops: Vec<_> = venues
            .filter_map(|venue| {
                let delta = i128::from(target.value(venue)) - i128::from(actual.value(venue));
                ReconcileOperation::new(venue, delta)
            })
            .collect();
        ops.sort_by_key(|op| op.venue);
        Ok(ops)
    }
}

pub struct ReconcileOrderPlanner;

impl ReconcileOrderPlanner {
    /// Sorts by ascending signed delta: the largest withdrawal first, the
    /// largest deposit last. Ties keep no particular order.
    pub fn order(mut ops: Vec<ReconcileOperation>) -> Vec<ReconcileOperation> {
        ops.sort_unstable_by_key(|op| op.signed_delta);
        ops
    }
}
