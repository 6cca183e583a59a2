//! Signature and clock seams consumed by the ledger.

use std::time::{SystemTime, UNIX_EPOCH};

use ccx_consensus::Hash256;
use ccx_primitives::{KeyImage, PublicKey, Signature};

/// Curve operations the ledger needs to validate transactions.
pub trait CryptoVerifier: Send + Sync {
    /// True if `key` is a valid public key encoding.
    fn check_key(&self, key: &PublicKey) -> bool;

    /// True if `key_image` is a valid, canonical key image.
    fn check_key_image(&self, key_image: &KeyImage) -> bool;

    /// Ring signature over `prefix_hash` by one of `ring`, bound to
    /// `key_image`. `signatures` has one element per ring member.
    fn check_ring_signature(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;

    /// Plain signature over `prefix_hash` by `key`.
    fn check_signature(&self, prefix_hash: &Hash256, key: &PublicKey, signature: &Signature) -> bool;
}

/// Adjusted network time in unix seconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}
