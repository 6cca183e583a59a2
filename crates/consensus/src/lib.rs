//! Consensus constants, per-network parameters, and the pure monetary rules
//! (reward, fee, deposit interest) shared by validation.

pub mod constants;
pub mod fees;
pub mod interest;
pub mod money;
pub mod params;
pub mod rewards;
pub mod upgrades;

pub type Hash256 = [u8; 32];

pub use fees::{
    is_fusion_transaction, total_transaction_interest, transaction_fee, transaction_input_amount,
    InputValue,
};
pub use interest::calculate_interest;
pub use params::{consensus_params, hash_from_hex, Checkpoint, ConsensusParams, Network};
pub use rewards::{base_reward, block_reward, max_block_cumulative_size, penalized_amount};
pub use upgrades::{upgrade_height, UpgradeHeights, UNDEF_HEIGHT};
