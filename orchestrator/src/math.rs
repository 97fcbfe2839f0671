use std::fmt;

use crate::error::{OrchestratorError, Result};

/// Basis points representing 100%
pub const ONE_AS_BPS: u64 = 10_000;

/// Fixed-point scale of [`Decimal`] (18 decimal places)
pub const WAD: u128 = 1_000_000_000_000_000_000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rounding {
    Floor,
    Ceiling,
}

/// Safe multiplication then division with configurable rounding.
///
/// Computes: (value × numerator) / denominator
/// Uses u128 intermediate to prevent overflow.
pub fn mul_div(value: u64, numerator: u64, denominator: u64, rounding: Rounding) -> Result<u64> {
    if denominator == 0 {
        return Err(OrchestratorError::DivisionByZero);
    }

    let product = (value as u128)
        .checked_mul(numerator as u128)
        .ok_or(OrchestratorError::MathOverflow)?;

    let result = match rounding {
        Rounding::Floor => product / (denominator as u128),
        Rounding::Ceiling => {
            let denom = denominator as u128;
            product
                .checked_add(denom)
                .ok_or(OrchestratorError::MathOverflow)?
                .checked_sub(1)
                .ok_or(OrchestratorError::MathOverflow)?
                / denom
        }
    };

    u64::try_from(result).map_err(|_| OrchestratorError::MathOverflow)
}

/// Applies a basis-point weight to an amount, rounding down.
pub fn apply_bps(amount: u64, bps: u16) -> Result<u64> {
    mul_div(amount, bps as u64, ONE_AS_BPS, Rounding::Floor)
}

/// Unsigned fixed-point number with 18 decimals.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Decimal(u128);

impl Decimal {
    /// numerator / denominator, rounded down to the last decimal place
    pub fn from_ratio(numerator: u64, denominator: u64) -> Result<Self> {
        if denominator == 0 {
            return Err(OrchestratorError::DivisionByZero);
        }
        let scaled = (numerator as u128)
            .checked_mul(WAD)
            .ok_or(OrchestratorError::MathOverflow)?;
        Ok(Decimal(scaled / denominator as u128))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let integer = self.0 / WAD;
        let fraction = self.0 % WAD;
        if fraction == 0 {
            return write!(f, "{integer}");
        }
        let digits = format!("{fraction:018}");
        write!(f, "{integer}.{}", digits.trim_end_matches('0'))
    }
}

/// Reserve-asset units per pool share.
///
/// Kept as the exact ratio of the recorded totals so conversions never
/// compound the rounding error of an intermediate decimal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExchangeRate {
    total_value: u64,
    share_supply: u64,
}

impl ExchangeRate {
    /// Rate of a vault holding `total_value` reserve units against
    /// `share_supply` shares. An empty vault (either side zero) trades 1:1.
    pub fn new(total_value: u64, share_supply: u64) -> Self {
        if total_value == 0 || share_supply == 0 {
            return Self::bootstrap();
        }
        Self {
            total_value,
            share_supply,
        }
    }

    const fn bootstrap() -> Self {
        Self {
            total_value: 1,
            share_supply: 1,
        }
    }

    pub fn as_decimal(&self) -> Result<Decimal> {
        Decimal::from_ratio(self.total_value, self.share_supply)
    }

    /// Shares equivalent to `amount` reserve units.
    pub fn reserve_to_shares(&self, amount: u64, rounding: Rounding) -> Result<u64> {
        mul_div(amount, self.share_supply, self.total_value, rounding)
    }

    /// Reserve units redeemable for `shares`.
    pub fn shares_to_reserve(&self, shares: u64, rounding: Rounding) -> Result<u64> {
        mul_div(shares, self.total_value, self.share_supply, rounding)
    }
}

/// Exchange rate as a decimal, `1` for an empty vault.
pub fn rate(total_value: u64, share_supply: u64) -> Result<Decimal> {
    ExchangeRate::new(total_value, share_supply).as_decimal()
}
