//! Core block/transaction types, binary serialization and content hashing.

pub mod block;
pub mod encoding;
pub mod hash;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use encoding::DecodeError;
pub use hash::{fast_hash, tree_hash, NULL_HASH};
pub use transaction::{
    KeyImage, KeyInput, MultisignatureInput, MultisignatureOutput, OutputTarget, PublicKey,
    Signature, Transaction, TransactionInput, TransactionOutput,
};
