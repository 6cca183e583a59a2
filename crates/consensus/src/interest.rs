//! Deposit interest.
//!
//! The weekly and quarterly families are computed in `f32` with the exact
//! operation order of the deployed network; changing widths or ordering
//! changes consensus.

use crate::money::Amount;
use crate::params::ConsensusParams;

pub const WEEKLY_TERM: u32 = 5_040;
pub const QUARTERLY_TERM: u32 = 64_800;

/// Interest earned by `amount` locked for `term` blocks, evaluated at
/// `height`. Callers only invoke this for non-zero terms.
pub fn calculate_interest(amount: Amount, term: u32, height: u32, params: &ConsensusParams) -> Amount {
    if term % QUARTERLY_TERM == 0 {
        return quarterly_interest(amount, term);
    }
    if term % WEEKLY_TERM == 0 {
        return weekly_interest(amount, term);
    }
    general_interest(amount, term, height, params)
}

fn quantity_tier(amount_for_humans: u64) -> f32 {
    match amount_for_humans {
        110_001..=179_999 => 1.01,
        180_000..=259_999 => 1.02,
        260_000..=349_999 => 1.03,
        350_000..=449_999 => 1.04,
        450_000..=559_999 => 1.05,
        560_000..=679_999 => 1.06,
        680_000..=809_999 => 1.07,
        810_000..=949_999 => 1.08,
        950_000..=1_099_999 => 1.09,
        1_100_000..=1_259_999 => 1.1,
        1_260_000..=1_429_999 => 1.11,
        1_430_000..=1_609_999 => 1.12,
        1_610_000..=1_799_999 => 1.13,
        1_800_000..=1_999_999 => 1.14,
        2_000_001.. => 1.15,
        _ => 1.0,
    }
}

fn quarterly_interest(amount: Amount, term: u32) -> Amount {
    let tier = quantity_tier(amount / 1_000_000);

    let mq: f32 = 1.4473;
    let quarters = (term / QUARTERLY_TERM) as f32;
    // pow runs in f64, every other step is narrowed back to f32
    let m8 = (100.0 * (1.0 + f64::from(mq) / 100.0).powf(f64::from(quarters)) - 100.0) as f32;
    let m5 = (f64::from(quarters) * 0.5) as f32;
    let m7 = m8 * (1.0 + m5 / 100.0);
    let rate = m7 * tier;
    let interest = amount as f32 * (rate / 100.0);
    interest as Amount
}

fn weekly_interest(amount: Amount, term: u32) -> Amount {
    let weeks = (term / WEEKLY_TERM) as f32;
    let base_interest: f32 = 0.0696;
    let interest_per_week: f32 = 0.0002;
    let rate = base_interest + weeks * interest_per_week;
    let interest = amount as f32 * ((weeks * rate) / 100.0);
    interest as Amount
}

fn general_interest(amount: Amount, term: u32, height: u32, params: &ConsensusParams) -> Amount {
    let rate = u64::from(term) * params.deposit_max_total_rate - params.deposit_min_total_rate_factor;
    let scaled =
        u128::from(amount) * u128::from(rate) / (100 * u128::from(params.deposit_max_term));

    if height <= params.end_multiplier_block {
        (scaled * u128::from(params.multiplier_factor)) as Amount
    } else {
        scaled as Amount
    }
}
