//! Network-wide constants that do not vary between mainnet and testnet.

pub const BLOCK_MAJOR_VERSION_1: u8 = 1;
pub const BLOCK_MAJOR_VERSION_2: u8 = 2;
pub const BLOCK_MAJOR_VERSION_3: u8 = 3;
/// LWMA-3 difficulty, shorter timestamp window.
pub const BLOCK_MAJOR_VERSION_4: u8 = 4;
pub const BLOCK_MAJOR_VERSION_7: u8 = 7;
pub const BLOCK_MAJOR_VERSION_8: u8 = 8;

pub const BLOCK_MINOR_VERSION_0: u8 = 0;
/// Minor version used by miners to vote for the next major version.
pub const BLOCK_MINOR_VERSION_1: u8 = 1;

pub const TRANSACTION_VERSION_1: u8 = 1;
/// First version allowed to carry multisignature (deposit) outputs.
pub const TRANSACTION_VERSION_2: u8 = 2;

/// Unlock times below this value are block heights, above are unix times.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;
pub const MAX_BLOCK_BLOB_SIZE: usize = 500_000_000;

/// Major versions tracked by upgrade detectors, in activation order.
pub const UPGRADE_TARGET_VERSIONS: [u8; 5] = [
    BLOCK_MAJOR_VERSION_2,
    BLOCK_MAJOR_VERSION_3,
    BLOCK_MAJOR_VERSION_4,
    BLOCK_MAJOR_VERSION_7,
    BLOCK_MAJOR_VERSION_8,
];

/// Legacy fixed-difficulty band that must be reproduced for chain-hash
/// compatibility.
pub const LEGACY_DIFFICULTY_BAND_START: u32 = 12_750;
pub const LEGACY_DIFFICULTY_BAND_END: u32 = 13_500;
pub const LEGACY_DIFFICULTY: u64 = 2_160;

/// Window and floor of the 17-block LWMA-1 variant.
pub const LWMA1_WINDOW: usize = 17;
pub const LWMA1_MIN_DIFFICULTY: u64 = 100;

/// LWMA-3 averaging window (N) and its startup guess.
pub const LWMA3_WINDOW: usize = 60;
pub const LWMA3_DIFFICULTY_GUESS: u64 = 100;

/// Number of samples handed to LWMA-3 and LWMA-1 (N + 1).
pub const DIFFICULTY_BLOCKS_COUNT: usize = 61;
pub const DIFFICULTY_BLOCKS_COUNT_V1: usize = 61;

/// Maximum number of block ids returned for a single sync request.
pub const BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT: usize = 10_000;

pub const REWARD_INCREASING_FACTOR: [u64; 61] = reward_increasing_factor();

const fn reward_increasing_factor() -> [u64; 61] {
    let mut out = [0u64; 61];
    let mut idx = 0;
    while idx < 61 {
        out[idx] = 250_000 * idx as u64;
        idx += 1;
    }
    out
}
