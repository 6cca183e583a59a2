//! Transaction input valuation, fees and fusion classification.

use crate::interest::calculate_interest;
use crate::money::Amount;
use crate::params::ConsensusParams;

/// The monetary view of a transaction input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputValue {
    Base,
    Key { amount: Amount },
    Multisignature { amount: Amount, term: u32 },
}

pub fn transaction_input_amount(input: InputValue, height: u32, params: &ConsensusParams) -> Amount {
    match input {
        InputValue::Base => 0,
        InputValue::Key { amount } => amount,
        InputValue::Multisignature { amount, term: 0 } => amount,
        InputValue::Multisignature { amount, term } => {
            amount.saturating_add(calculate_interest(amount, term, height, params))
        }
    }
}

pub fn total_transaction_interest<I>(inputs: I, height: u32, params: &ConsensusParams) -> Option<Amount>
where
    I: IntoIterator<Item = InputValue>,
{
    inputs.into_iter().try_fold(0u64, |total, input| match input {
        InputValue::Multisignature { amount, term } if term != 0 => {
            total.checked_add(calculate_interest(amount, term, height, params))
        }
        _ => Some(total),
    })
}

/// Fee paid by a transaction, or `None` when outputs exceed inputs.
///
/// The one exception is a withdrawal whose outputs exceed its inputs by
/// exactly the minimum fee, with both sides non-empty; its fee is the
/// minimum fee.
pub fn transaction_fee<I>(
    inputs: I,
    output_amounts: &[Amount],
    height: u32,
    params: &ConsensusParams,
) -> Option<Amount>
where
    I: IntoIterator<Item = InputValue>,
{
    let mut input_count = 0usize;
    let mut amount_in: Amount = 0;
    for input in inputs {
        input_count += 1;
        amount_in = amount_in.checked_add(transaction_input_amount(input, height, params))?;
    }

    let mut amount_out: Amount = 0;
    for amount in output_amounts {
        amount_out = amount_out.checked_add(*amount)?;
    }

    if amount_out > amount_in {
        let withdrawal = input_count > 0
            && !output_amounts.is_empty()
            && amount_in.checked_add(params.minimum_fee) == Some(amount_out);
        return withdrawal.then_some(params.minimum_fee);
    }
    Some(amount_in - amount_out)
}

/// Splits `amount` into decimal digit chunks, folding leading chunks that fit
/// under `dust_threshold` into a single dust amount.
pub fn decompose_amount(amount: Amount, dust_threshold: Amount) -> Vec<Amount> {
    let mut out = Vec::new();
    let mut remaining = amount;
    let mut dust: Amount = 0;
    let mut dust_handled = false;
    let mut order: Amount = 1;

    while remaining != 0 {
        let chunk = (remaining % 10).saturating_mul(order);
        remaining /= 10;
        order = order.saturating_mul(10);

        if dust.saturating_add(chunk) <= dust_threshold {
            dust += chunk;
        } else {
            if !dust_handled && dust != 0 {
                out.push(dust);
                dust_handled = true;
            }
            if chunk != 0 {
                out.push(chunk);
            }
        }
    }
    if !dust_handled && dust != 0 {
        out.push(dust);
    }
    out
}

/// Fusion transactions consolidate many small inputs into the canonical
/// decomposition of their sum and travel fee-free.
pub fn is_fusion_transaction(
    input_amounts: &[Amount],
    output_amounts: &[Amount],
    size: usize,
    params: &ConsensusParams,
) -> bool {
    if size > params.fusion_tx_max_size {
        return false;
    }
    if input_amounts.len() < params.fusion_tx_min_input_count {
        return false;
    }
    if input_amounts.len() < output_amounts.len() * params.fusion_tx_min_in_out_count_ratio {
        return false;
    }

    let mut input_amount: Amount = 0;
    for amount in input_amounts {
        if *amount < params.default_dust_threshold {
            return false;
        }
        input_amount = match input_amount.checked_add(*amount) {
            Some(total) => total,
            None => return false,
        };
    }

    let mut expected = decompose_amount(input_amount, params.default_dust_threshold);
    expected.sort_unstable();
    expected == output_amounts
}
