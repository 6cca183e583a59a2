//! Difficulty retargeting.
//!
//! Every algorithm consumes the timestamps and cumulative difficulties of
//! the trailing blocks, oldest first, and yields the difficulty the next
//! block must meet.

use ccx_consensus::constants::{
    BLOCK_MAJOR_VERSION_2, BLOCK_MAJOR_VERSION_4, LEGACY_DIFFICULTY, LEGACY_DIFFICULTY_BAND_END,
    LEGACY_DIFFICULTY_BAND_START, LWMA1_MIN_DIFFICULTY, LWMA1_WINDOW, LWMA3_DIFFICULTY_GUESS,
    LWMA3_WINDOW,
};
use ccx_consensus::ConsensusParams;

pub type Difficulty = u64;

const LWMA3_TARGET: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    LengthMismatch,
    WindowTooSmall,
    NonIncreasingWork,
    Overflow,
}

impl std::fmt::Display for DifficultyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifficultyError::LengthMismatch => {
                write!(f, "timestamps and cumulative difficulties differ in length")
            }
            DifficultyError::WindowTooSmall => write!(f, "difficulty window leaves fewer than two samples"),
            DifficultyError::NonIncreasingWork => write!(f, "cumulative difficulty does not increase"),
            DifficultyError::Overflow => write!(f, "difficulty computation overflows"),
        }
    }
}

impl std::error::Error for DifficultyError {}

#[derive(Clone, Copy, Debug)]
struct WindowSample {
    weighted_work: u64,
    span: u64,
}

impl WindowSample {
    fn ceil(self) -> Difficulty {
        // `sample_window` guarantees the addition fits.
        (self.weighted_work + self.span - 1) / self.span
    }

    fn floor(self) -> Difficulty {
        self.weighted_work / self.span
    }
}

/// Sorts timestamps, trims `cut` outliers from each end of a full window and
/// measures the work done over the remaining span. `None` means fewer than
/// two samples were supplied.
fn sample_window(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    window: usize,
    cut: usize,
    target: u64,
) -> Result<Option<WindowSample>, DifficultyError> {
    if timestamps.len() != cumulative_difficulties.len() {
        return Err(DifficultyError::LengthMismatch);
    }
    let length = timestamps.len().min(window);
    if length <= 1 {
        return Ok(None);
    }

    let kept = window
        .checked_sub(2 * cut)
        .filter(|kept| *kept >= 2)
        .ok_or(DifficultyError::WindowTooSmall)?;

    let mut sorted = timestamps[..length].to_vec();
    sorted.sort_unstable();

    let (begin, end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept + 1) / 2;
        (begin, begin + kept)
    };

    let span = match sorted[end - 1] - sorted[begin] {
        0 => 1,
        span => span,
    };
    let work = cumulative_difficulties[end - 1]
        .checked_sub(cumulative_difficulties[begin])
        .filter(|work| *work > 0)
        .ok_or(DifficultyError::NonIncreasingWork)?;

    let product = u128::from(work) * u128::from(target);
    if product + u128::from(span - 1) > u128::from(u64::MAX) {
        return Err(DifficultyError::Overflow);
    }

    Ok(Some(WindowSample {
        weighted_work: product as u64,
        span,
    }))
}

/// Classic CryptoNote retarget over the configured window and cut, rounded
/// up.
pub fn next_difficulty_classic(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    params: &ConsensusParams,
) -> Result<Difficulty, DifficultyError> {
    let sample = sample_window(
        timestamps,
        cumulative_difficulties,
        params.difficulty_window,
        params.difficulty_cut,
        params.difficulty_target,
    )?;
    Ok(sample.map_or(1, WindowSample::ceil))
}

/// Whether the fixed 17-block variant governs blocks at `height`.
pub fn lwma1_active(height: u32, params: &ConsensusParams) -> bool {
    params.zawy_difficulty_block_index != 0 && params.zawy_difficulty_block_index <= height
}

/// Fixed-window variant over the trailing 17 blocks with no outlier cut and
/// a floor of 100.
pub fn next_difficulty_lwma1(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    params: &ConsensusParams,
) -> Result<Difficulty, DifficultyError> {
    lwma1_tail(
        timestamps,
        cumulative_difficulties,
        timestamps.len().min(LWMA1_WINDOW),
        params.difficulty_target,
    )
}

fn lwma1_tail(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    count: usize,
    target: u64,
) -> Result<Difficulty, DifficultyError> {
    if timestamps.len() != cumulative_difficulties.len() {
        return Err(DifficultyError::LengthMismatch);
    }
    let start = timestamps.len() - count;
    let sample = sample_window(
        &timestamps[start..],
        &cumulative_difficulties[start..],
        LWMA1_WINDOW,
        0,
        target,
    )?;
    Ok(match sample {
        None => 1,
        Some(sample) => sample.floor().max(LWMA1_MIN_DIFFICULTY),
    })
}

/// Retarget for blocks below major version 4.
///
/// Heights inside the legacy band get a constant difficulty. Otherwise the
/// era window is sampled and the result is floored once the zawy block
/// version is reached, handed to the 17-block variant once its activation
/// height is reached, and rounded up before either.
pub fn next_difficulty_for_version(
    major_version: u8,
    height: u32,
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    params: &ConsensusParams,
) -> Result<Difficulty, DifficultyError> {
    if (LEGACY_DIFFICULTY_BAND_START..LEGACY_DIFFICULTY_BAND_END).contains(&height) {
        return Ok(LEGACY_DIFFICULTY);
    }

    let window = params.difficulty_window(major_version);
    let sample = match sample_window(
        timestamps,
        cumulative_difficulties,
        window,
        params.difficulty_cut(major_version),
        params.difficulty_target,
    )? {
        Some(sample) => sample,
        None => return Ok(1),
    };

    let zawy_version = if params.zawy_difficulty_v2 {
        BLOCK_MAJOR_VERSION_2
    } else {
        params.zawy_difficulty_block_version
    };
    if zawy_version != 0 && major_version >= zawy_version {
        return Ok(sample.floor());
    }

    if lwma1_active(height, params) {
        let count = LWMA1_WINDOW.min(timestamps.len().min(window));
        return lwma1_tail(
            timestamps,
            cumulative_difficulties,
            count,
            params.difficulty_target,
        );
    }

    Ok(sample.ceil())
}

/// LWMA-3 over the last 60 solve times.
///
/// Solve times are weighted by recency and capped at six targets, the
/// result is held within 67%..150% of the previous block's difficulty, and
/// three fast blocks in a row force at least an 8% rise.
pub fn next_difficulty_lwma3(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
) -> Result<Difficulty, DifficultyError> {
    if timestamps.len() != cumulative_difficulties.len() {
        return Err(DifficultyError::LengthMismatch);
    }
    let start = timestamps.len().saturating_sub(LWMA3_WINDOW + 1);
    let timestamps = &timestamps[start..];
    let cumulative_difficulties = &cumulative_difficulties[start..];

    if timestamps.len() <= 10 {
        return Ok(LWMA3_DIFFICULTY_GUESS);
    }

    let t = LWMA3_TARGET;
    let n = timestamps.len() - 1;

    let mut weighted_solvetime: u64 = 0;
    let mut sum_last_three: u64 = 0;
    let mut previous_timestamp = timestamps[0];
    for (i, &timestamp) in timestamps.iter().enumerate().skip(1) {
        let this_timestamp = if timestamp > previous_timestamp {
            timestamp
        } else {
            previous_timestamp + 1
        };
        let solvetime = (6 * t).min(this_timestamp - previous_timestamp);
        previous_timestamp = this_timestamp;

        weighted_solvetime += solvetime * i as u64;
        if i > n - 3 {
            sum_last_three += solvetime;
        }
    }

    let work = cumulative_difficulties[n]
        .checked_sub(cumulative_difficulties[0])
        .ok_or(DifficultyError::NonIncreasingWork)?;
    let numerator = u128::from(work) * u128::from(t) * (n as u128 + 1) * 99;
    let next = numerator / (200 * u128::from(weighted_solvetime));
    let next = u64::try_from(next).map_err(|_| DifficultyError::Overflow)?;

    let previous = cumulative_difficulties[n]
        .checked_sub(cumulative_difficulties[n - 1])
        .ok_or(DifficultyError::NonIncreasingWork)?;
    let lower = mul_div(previous, 67, 100)?;
    let upper = mul_div(previous, 150, 100)?;
    let mut next = lower.max(next.min(upper));

    if sum_last_three < (8 * t) / 10 {
        next = next.max(mul_div(previous, 108, 100)?);
    }

    Ok(next)
}

fn mul_div(value: u64, mul: u64, div: u64) -> Result<u64, DifficultyError> {
    u64::try_from(u128::from(value) * u128::from(mul) / u128::from(div))
        .map_err(|_| DifficultyError::Overflow)
}

/// Picks the algorithm for the block about to be built on top of the
/// supplied window: LWMA-3 from major version 4 on, the versioned classic
/// retarget before that.
pub fn next_difficulty(
    major_version: u8,
    height: u32,
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    params: &ConsensusParams,
) -> Result<Difficulty, DifficultyError> {
    if major_version >= BLOCK_MAJOR_VERSION_4 {
        next_difficulty_lwma3(timestamps, cumulative_difficulties)
    } else {
        next_difficulty_for_version(
            major_version,
            height,
            timestamps,
            cumulative_difficulties,
            params,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccx_consensus::params::{consensus_params, Network};

    fn make_chain(count: usize, base_time: u64, spacing: u64, difficulty: u64) -> (Vec<u64>, Vec<u64>) {
        let timestamps = (0..count as u64).map(|i| base_time + i * spacing).collect();
        let cumulative = (0..count as u64).map(|i| i * difficulty).collect();
        (timestamps, cumulative)
    }

    #[test]
    fn classic_two_sample_window() {
        let mut params = consensus_params(Network::Regtest);
        params.difficulty_window = 2;
        params.difficulty_cut = 0;

        let next = next_difficulty_classic(&[1000, 1010], &[100, 200], &params).expect("difficulty");
        assert_eq!(next, 10 * params.difficulty_target);
    }

    #[test]
    fn classic_returns_one_without_history() {
        let params = consensus_params(Network::Regtest);
        assert_eq!(next_difficulty_classic(&[], &[], &params), Ok(1));
        assert_eq!(next_difficulty_classic(&[5], &[7], &params), Ok(1));
    }

    #[test]
    fn classic_rounds_up() {
        let params = consensus_params(Network::Regtest);
        let next = next_difficulty_classic(&[0, 100, 250], &[0, 10, 20], &params).expect("difficulty");
        // 20 * 120 / 250 = 9.6
        assert_eq!(next, 10);
    }

    #[test]
    fn classic_trims_outliers_from_full_window() {
        let mut params = consensus_params(Network::Regtest);
        params.difficulty_window = 10;
        params.difficulty_cut = 2;

        let mut timestamps: Vec<u64> = (0..10).map(|i| 1_000 + i * 120).collect();
        timestamps[0] = 0;
        timestamps[9] = 1_000_000;
        let cumulative: Vec<u64> = (0..10).map(|i| i * 50).collect();

        // Sorted positions 2..8 survive: span 600, work 250.
        let next = next_difficulty_classic(&timestamps, &cumulative, &params).expect("difficulty");
        assert_eq!(next, 50);
    }

    #[test]
    fn classic_rejects_overflow() {
        let params = consensus_params(Network::Regtest);
        let err = next_difficulty_classic(&[0, 1], &[0, u64::MAX], &params).unwrap_err();
        assert_eq!(err, DifficultyError::Overflow);
    }

    #[test]
    fn classic_rejects_flat_work() {
        let params = consensus_params(Network::Regtest);
        let err = next_difficulty_classic(&[0, 120], &[10, 10], &params).unwrap_err();
        assert_eq!(err, DifficultyError::NonIncreasingWork);
    }

    #[test]
    fn legacy_band_is_constant() {
        let params = consensus_params(Network::Mainnet);
        let (timestamps, cumulative) = make_chain(100, 0, 1, 5);
        for height in [12_750, 13_000, 13_499] {
            let next = next_difficulty_for_version(1, height, &timestamps, &cumulative, &params)
                .expect("difficulty");
            assert_eq!(next, 2_160);
        }
        let next = next_difficulty_for_version(1, 13_500, &timestamps, &cumulative, &params)
            .expect("difficulty");
        assert_ne!(next, 2_160);
    }

    #[test]
    fn zawy_version_floors_instead_of_rounding_up() {
        let params = consensus_params(Network::Mainnet);
        let timestamps = [0, 100, 250];
        let cumulative = [0, 10, 20];

        assert_eq!(
            next_difficulty_for_version(1, 100, &timestamps, &cumulative, &params),
            Ok(10)
        );
        assert_eq!(
            next_difficulty_for_version(2, 100, &timestamps, &cumulative, &params),
            Ok(9)
        );
    }

    #[test]
    fn lwma1_uses_trailing_window_with_floor() {
        let mut params = consensus_params(Network::Mainnet);
        params.zawy_difficulty_v2 = false;
        params.zawy_difficulty_block_version = 0;
        params.zawy_difficulty_block_index = 10;

        let (timestamps, cumulative) = make_chain(30, 0, 1_000, 10);
        assert!(!lwma1_active(9, &params));
        assert!(lwma1_active(20, &params));

        let next = next_difficulty_for_version(1, 20, &timestamps, &cumulative, &params)
            .expect("difficulty");
        assert_eq!(next, 100);

        // 17 trailing blocks: work 16 * 100_000, span 16 * 100.
        let (timestamps, cumulative) = make_chain(30, 0, 100, 100_000);
        let next = next_difficulty_for_version(1, 20, &timestamps, &cumulative, &params)
            .expect("difficulty");
        assert_eq!(next, 120_000);
        assert_eq!(next_difficulty_lwma1(&timestamps, &cumulative, &params), Ok(120_000));
    }

    #[test]
    fn lwma3_guesses_for_short_history() {
        let (timestamps, cumulative) = make_chain(10, 0, 120, 1_000);
        assert_eq!(next_difficulty_lwma3(&timestamps, &cumulative), Ok(100));
    }

    #[test]
    fn lwma3_keeps_difficulty_stable_under_perfect_timing() {
        let (timestamps, cumulative) = make_chain(61, 1_000_000, 120, 1_000);
        assert_eq!(next_difficulty_lwma3(&timestamps, &cumulative), Ok(990));

        let (timestamps, cumulative) = make_chain(20, 0, 120, 1_000);
        assert_eq!(next_difficulty_lwma3(&timestamps, &cumulative), Ok(990));
    }

    #[test]
    fn lwma3_clamps_against_previous_difficulty() {
        let (timestamps, cumulative) = make_chain(61, 1_000_000, 1, 1_000);
        assert_eq!(next_difficulty_lwma3(&timestamps, &cumulative), Ok(1_500));

        let (timestamps, cumulative) = make_chain(61, 1_000_000, 10_000, 1_000);
        assert_eq!(next_difficulty_lwma3(&timestamps, &cumulative), Ok(670));
    }

    #[test]
    fn lwma3_tolerates_out_of_order_timestamps() {
        let (mut timestamps, cumulative) = make_chain(61, 1_000_000, 120, 1_000);
        timestamps[30] = 0;
        let next = next_difficulty_lwma3(&timestamps, &cumulative).expect("difficulty");
        assert!((670..=1_500).contains(&next));
    }

    #[test]
    fn lwma3_steps_stay_within_clamp() {
        let mut timestamps = vec![0u64];
        let mut cumulative = vec![0u64];
        let mut difficulty = 10_000u64;
        for step in 0..300u64 {
            let last_time = *timestamps.last().expect("non-empty");
            let last_cd = *cumulative.last().expect("non-empty");
            timestamps.push(last_time + if step % 7 == 0 { 400 } else { 90 });
            cumulative.push(last_cd + difficulty);
            let next = next_difficulty_lwma3(&timestamps, &cumulative).expect("difficulty");
            if timestamps.len() > 10 {
                assert!(next >= difficulty * 67 / 100);
                assert!(next <= difficulty * 150 / 100);
            }
            difficulty = next;
        }
    }

    #[test]
    fn lwma3_reads_only_the_trailing_window() {
        let (mut timestamps, cumulative) = make_chain(100, 1_000_000, 120, 1_000);
        for timestamp in timestamps.iter_mut().take(39) {
            *timestamp = 0;
        }
        let start = timestamps.len() - (LWMA3_WINDOW + 1);
        assert_eq!(start, 39);
        assert_eq!(next_difficulty_lwma3(&timestamps, &cumulative), Ok(990));
        assert_eq!(
            next_difficulty_lwma3(&timestamps, &cumulative),
            next_difficulty_lwma3(&timestamps[start..], &cumulative[start..])
        );
    }

    #[test]
    fn dispatch_switches_to_lwma3_at_version_four() {
        let params = consensus_params(Network::Mainnet);
        let (timestamps, cumulative) = make_chain(61, 1_000_000, 120, 1_000);
        assert_eq!(
            next_difficulty(4, 500_000, &timestamps, &cumulative, &params),
            Ok(990)
        );
        assert_eq!(
            next_difficulty(3, 500_000, &timestamps, &cumulative, &params),
            next_difficulty_for_version(3, 500_000, &timestamps, &cumulative, &params)
        );
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(
            next_difficulty(1, 1, &[1, 2], &[1], &params),
            Err(DifficultyError::LengthMismatch)
        );
        assert_eq!(
            next_difficulty_lwma3(&[1, 2], &[1]),
            Err(DifficultyError::LengthMismatch)
        );
    }
}
