//! Difficulty retargeting and proof-of-work checks.

pub mod difficulty;
pub mod validation;

pub use difficulty::{
    lwma1_active, next_difficulty, next_difficulty_classic, next_difficulty_for_version,
    next_difficulty_lwma1, next_difficulty_lwma3, Difficulty, DifficultyError,
};
pub use validation::{check_hash, check_proof_of_work, Blake2bPowHasher, PowError, PowHasher};
