//! Contracts between the ledger and the external transaction pool.
//!
//! The pool is called while the ledger lock is held, so implementations
//! must not call back into the ledger from these hooks.

use ccx_consensus::money::Amount;
use ccx_consensus::Hash256;
use ccx_primitives::Transaction;

use crate::blockchain::LedgerError;

pub trait TransactionPool: Send + Sync {
    /// Removes and returns a pooled transaction for inclusion in a block.
    fn take_transaction(&self, hash: &Hash256) -> Option<Transaction>;

    /// Re-admits a transaction released by a popped or rejected block.
    fn return_transaction(&self, tx: Transaction);

    /// Offers a validated transaction to the pool. Returns false if the pool
    /// declined to keep it.
    fn add_transaction(&self, tx: Transaction, hash: Hash256, blob_size: usize, fee: Amount) -> bool;

    /// Serialized size of a pooled transaction.
    fn transaction_size(&self, hash: &Hash256) -> Option<usize>;

    fn on_blockchain_inc(&self, _height: u32, _tail: &Hash256) {}

    fn on_blockchain_dec(&self, _height: u32, _tail: &Hash256) {}
}

/// Newest main-chain block a transaction's inputs reference.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BlockInfo {
    pub height: u32,
    pub id: Hash256,
}

/// Checks the pool runs before admitting a transaction.
pub trait TransactionValidator {
    fn check_transaction_inputs(&self, tx: &Transaction) -> Result<BlockInfo, LedgerError>;

    fn have_spent_key_images(&self, tx: &Transaction) -> bool;

    fn check_transaction_size(&self, blob_size: usize) -> bool;
}
