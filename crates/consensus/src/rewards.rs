//! Block reward, size penalty and block size limits.

use crate::constants::REWARD_INCREASING_FACTOR;
use crate::money::Amount;
use crate::params::{
    ConsensusParams, FOUNDATION_TRUST, MAX_BLOCK_REWARD, REWARD_INCREASE_INTERVAL,
    START_BLOCK_REWARD,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockReward {
    pub reward: Amount,
    /// Newly emitted coins: penalized base reward minus the burned part of
    /// the fees.
    pub emission_change: i64,
}

pub fn base_reward(already_generated: Amount, height: u32, params: &ConsensusParams) -> Amount {
    if height == 1 {
        return FOUNDATION_TRUST;
    }
    if height == 0 {
        return params.genesis_block_reward;
    }

    let intervals = (u64::from(height) / REWARD_INCREASE_INTERVAL)
        .min((REWARD_INCREASING_FACTOR.len() - 1) as u64) as usize;
    let reward = (START_BLOCK_REWARD + REWARD_INCREASING_FACTOR[intervals]).min(MAX_BLOCK_REWARD);
    reward.min(params.money_supply.saturating_sub(already_generated))
}

/// Quadratic penalty applied once a block grows past the median size:
/// `amount * current * (2 * median - current) / median^2`.
pub fn penalized_amount(amount: Amount, median_size: usize, current_block_size: usize) -> Amount {
    if amount == 0 {
        return 0;
    }
    if current_block_size <= median_size {
        return amount;
    }

    let median = median_size as u128;
    let current = current_block_size as u128;
    let product = u128::from(amount) * (current * (2 * median - current));
    (product / median / median) as Amount
}

/// Reward for a block of `current_block_size` bytes. `None` when the block
/// exceeds twice the effective median.
pub fn block_reward(
    median_size: usize,
    current_block_size: usize,
    already_generated: Amount,
    fee: Amount,
    height: u32,
    params: &ConsensusParams,
) -> Option<BlockReward> {
    let base = base_reward(already_generated, height, params);

    let median_size = median_size.max(params.block_granted_full_reward_zone);
    if current_block_size > 2 * median_size {
        return None;
    }

    let penalized_base = penalized_amount(base, median_size, current_block_size);
    let penalized_fee = penalized_amount(fee, median_size, current_block_size);

    Some(BlockReward {
        reward: penalized_base + penalized_fee,
        emission_change: penalized_base as i64 - (fee - penalized_fee) as i64,
    })
}

pub fn max_block_cumulative_size(height: u64, params: &ConsensusParams) -> usize {
    let growth = u128::from(height) * u128::from(params.max_block_size_growth_speed_numerator)
        / u128::from(params.max_block_size_growth_speed_denominator);
    params.max_block_size_initial + growth as usize
}

pub fn median(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        ((u128::from(sorted[mid - 1]) + u128::from(sorted[mid])) / 2) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{COIN, MONEY_SUPPLY};
    use crate::params::{consensus_params, Network};

    #[test]
    fn height_one_pays_foundation_trust() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(base_reward(0, 1, &params), 12_000_000 * COIN);
        assert_eq!(base_reward(MONEY_SUPPLY, 1, &params), FOUNDATION_TRUST);
    }

    #[test]
    fn genesis_pays_start_reward_regardless_of_supply() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(base_reward(0, 0, &params), 5_000_000);
        assert_eq!(base_reward(MONEY_SUPPLY, 0, &params), 5_000_000);
        assert_eq!(base_reward(123_456, 0, &params), params.genesis_block_reward);
    }

    #[test]
    fn reward_steps_every_interval_until_cap() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(base_reward(0, 2, &params), 5_000_000);
        assert_eq!(base_reward(0, 21_899, &params), 5_000_000);
        assert_eq!(base_reward(0, 21_900, &params), 5_250_000);
        assert_eq!(base_reward(0, 21_900 * 10, &params), 7_500_000);
        assert_eq!(base_reward(0, 21_900 * 40, &params), 15_000_000);
        assert_eq!(base_reward(0, 21_900 * 60, &params), MAX_BLOCK_REWARD);
        assert_eq!(base_reward(0, u32::MAX, &params), MAX_BLOCK_REWARD);
    }

    #[test]
    fn reward_is_clamped_to_remaining_supply() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(base_reward(MONEY_SUPPLY - 1_000, 50, &params), 1_000);
        assert_eq!(base_reward(MONEY_SUPPLY, 50, &params), 0);
    }

    #[test]
    fn penalty_is_quadratic_above_median() {
        assert_eq!(penalized_amount(0, 100_000, 150_000), 0);
        assert_eq!(penalized_amount(5_000_000, 100_000, 100_000), 5_000_000);
        assert_eq!(penalized_amount(5_000_000, 100_000, 150_000), 3_750_000);
        assert_eq!(penalized_amount(1_000, 100_000, 150_000), 750);
        assert_eq!(penalized_amount(1_000, 100_000, 200_000), 0);
    }

    #[test]
    fn block_reward_penalizes_base_and_fee() {
        let params = consensus_params(Network::Mainnet);

        let small = block_reward(0, 20_000, 0, 1_000, 2, &params).expect("reward");
        assert_eq!(small.reward, 5_001_000);
        assert_eq!(small.emission_change, 5_000_000);

        let large = block_reward(0, 150_000, 0, 1_000, 2, &params).expect("reward");
        assert_eq!(large.reward, 3_750_750);
        assert_eq!(large.emission_change, 3_749_750);

        assert!(block_reward(0, 200_000, 0, 0, 2, &params).is_some());
        assert!(block_reward(0, 200_001, 0, 0, 2, &params).is_none());
        assert!(block_reward(150_000, 300_000, 0, 0, 2, &params).is_some());
    }

    #[test]
    fn block_size_limit_grows_with_height() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(max_block_cumulative_size(0, &params), 1_000_000);
        assert_eq!(max_block_cumulative_size(262_800, &params), 1_102_400);
        assert_eq!(max_block_cumulative_size(1_000, &params), 1_000_389);
    }

    #[test]
    fn median_handles_odd_and_even_lengths() {
        assert_eq!(median(&[]), 0);
        assert_eq!(median(&[7]), 7);
        assert_eq!(median(&[9, 1, 5]), 5);
        assert_eq!(median(&[4, 1, 3, 2]), 2);
        assert_eq!(median(&[u64::MAX, u64::MAX]), u64::MAX);
    }
}
