use ccx_consensus::Hash256;
use ccx_primitives::block::Block;
use primitive_types::U256;

use crate::difficulty::Difficulty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    ZeroDifficulty,
    HashAboveTarget,
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::ZeroDifficulty => write!(f, "difficulty is zero"),
            PowError::HashAboveTarget => write!(f, "pow hash does not meet difficulty"),
        }
    }
}

impl std::error::Error for PowError {}

/// Slow hash applied to a block's hashing blob.
///
/// The engine only needs a deterministic 32-byte digest; the production
/// hash function is supplied by the embedding node.
pub trait PowHasher: Send + Sync {
    fn pow_hash(&self, hashing_blob: &[u8]) -> Hash256;
}

/// Reference hasher: 32-byte BLAKE2b over the hashing blob.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake2bPowHasher;

impl PowHasher for Blake2bPowHasher {
    fn pow_hash(&self, hashing_blob: &[u8]) -> Hash256 {
        let digest = blake2b_simd::Params::new()
            .hash_length(32)
            .hash(hashing_blob);
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_bytes());
        out
    }
}

/// A hash meets `difficulty` when, read as a little-endian 256-bit integer,
/// its product with the difficulty still fits in 256 bits.
pub fn check_hash(hash: &Hash256, difficulty: Difficulty) -> bool {
    if difficulty == 0 {
        return false;
    }
    let value = U256::from_little_endian(hash);
    let product = value.full_mul(U256::from(difficulty));
    product.0[4..].iter().all(|word| *word == 0)
}

/// Hashes the block with `hasher` and checks the result against
/// `difficulty`. Returns the pow hash on success.
pub fn check_proof_of_work<H: PowHasher + ?Sized>(
    hasher: &H,
    block: &Block,
    difficulty: Difficulty,
) -> Result<Hash256, PowError> {
    if difficulty == 0 {
        return Err(PowError::ZeroDifficulty);
    }
    let pow_hash = hasher.pow_hash(&block.hashing_blob());
    if !check_hash(&pow_hash, difficulty) {
        return Err(PowError::HashAboveTarget);
    }
    Ok(pow_hash)
}
