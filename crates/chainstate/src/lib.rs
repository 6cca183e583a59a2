//! Ledger state: main chain, alternative chains and the indices derived from them.

pub mod blockchain;
mod cache;
pub mod checkpoints;
pub mod config;
pub mod deposits;
pub mod entry;
pub mod height_index;
pub mod mempool;
pub mod metrics;
pub mod outputs;
pub mod upgrade;
pub mod validation;
pub mod verification;

pub use blockchain::{
    genesis_block, BlockSummary, BlockVerification, Ledger, LedgerContext, LedgerError,
    LedgerOptions, RandomOutput, TxVerification,
};
pub use cache::{CacheError, CACHE_KEY};
pub use checkpoints::{CheckpointError, CheckpointSet, TxtResolver};
pub use config::LedgerConfig;
pub use deposits::{DepositError, DepositLedger};
pub use mempool::{BlockInfo, TransactionPool, TransactionValidator};
pub use upgrade::{ChainView, UpgradeDetector};
pub use verification::{CryptoVerifier, SystemTimeSource, TimeSource};
