//! Monetary units.

pub type Amount = u64;

/// Smallest unit multiplier: one coin is 10^6 atomic units.
pub const COIN: Amount = 1_000_000;
pub const POINT: Amount = 1_000;

/// Hard cap on emitted supply.
pub const MONEY_SUPPLY: Amount = 200_000_000_000_000;

/// Fee a deposit withdrawal may be short by (0.000010 coin).
pub const MINIMUM_FEE: Amount = 10;

pub fn money_range(value: Amount) -> bool {
    value <= MONEY_SUPPLY
}
