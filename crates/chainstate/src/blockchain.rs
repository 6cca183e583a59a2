//! The ledger engine.
//!
//! [`Ledger`] owns the main chain, the alternative block tree and every index
//! derived from them behind one lock. A block whose parent is the tail is
//! validated against the tail state and committed; any other block with a
//! known ancestor is stored as an alternative and triggers a reorganization
//! once its branch is strictly heavier than the main chain.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use ccx_consensus::constants::{BLOCK_MAJOR_VERSION_1, BLOCK_MINOR_VERSION_0, UPGRADE_TARGET_VERSIONS};
use ccx_consensus::money::Amount;
use ccx_consensus::params::hash_to_hex;
use ccx_consensus::rewards::median;
use ccx_consensus::{
    max_block_cumulative_size, total_transaction_interest, transaction_fee, ConsensusParams,
    Hash256,
};
use ccx_log::{log_debug, log_error, log_info, log_warn};
use ccx_pow::{check_proof_of_work, next_difficulty, Difficulty, DifficultyError, PowHasher};
use ccx_primitives::encoding::hex_to_bytes;
use ccx_primitives::{
    Block, BlockHeader, DecodeError, KeyImage, OutputTarget, PublicKey, Signature, Transaction,
    TransactionInput, NULL_HASH,
};
use ccx_storage::{BlockLog, KeyValueStore, KvBlockLog, StoreError};
use rayon::prelude::*;

use crate::cache::{self, CacheError};
use crate::checkpoints::CheckpointSet;
use crate::config::{LedgerConfig, DEFAULT_ENTRY_CACHE_CAPACITY};
use crate::deposits::{DepositError, DepositLedger};
use crate::entry::{BlockEntry, TransactionEntry};
use crate::height_index::HeightIndex;
use crate::mempool::{BlockInfo, TransactionPool, TransactionValidator};
use crate::metrics::{LedgerMetrics, LedgerMetricsSnapshot};
use crate::outputs::{
    KeyImageSet, KeyOutputIndex, MultisignatureOutputIndex, OutputReference, TransactionIndex,
};
use crate::upgrade::{ChainView, UpgradeDetector, UpgradeError};
use crate::validation::{
    check_block_minor_version, check_block_timestamp, check_outputs, check_transaction_syntax,
    is_unlocked, prevalidate_miner_transaction, relative_to_absolute_offsets,
    validate_miner_reward, ValidationError,
};
use crate::verification::{CryptoVerifier, TimeSource};

const REPLAY_CHUNK: u32 = 512;
const REPLAY_PROGRESS_INTERVAL: u32 = 10_000;

#[derive(Debug)]
pub enum LedgerError {
    MalformedInput(DecodeError),
    ConsensusViolation(ValidationError),
    Orphan,
    ReorgFailure(Box<LedgerError>),
    ResourceExhaustion(&'static str),
    Store(StoreError),
    Corrupt(&'static str),
    Upgrade(UpgradeError),
    NotFound,
    Poisoned,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::MalformedInput(err) => write!(f, "malformed input: {err}"),
            LedgerError::ConsensusViolation(err) => write!(f, "{err}"),
            LedgerError::Orphan => write!(f, "parent block is unknown"),
            LedgerError::ReorgFailure(err) => write!(f, "reorganization failed: {err}"),
            LedgerError::ResourceExhaustion(message) => write!(f, "{message}"),
            LedgerError::Store(err) => write!(f, "{err}"),
            LedgerError::Corrupt(message) => write!(f, "corrupt ledger: {message}"),
            LedgerError::Upgrade(err) => write!(f, "{err}"),
            LedgerError::NotFound => write!(f, "not found"),
            LedgerError::Poisoned => write!(f, "ledger lock poisoned"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<DecodeError> for LedgerError {
    fn from(err: DecodeError) -> Self {
        LedgerError::MalformedInput(err)
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::ConsensusViolation(err)
    }
}

impl From<DepositError> for LedgerError {
    fn from(err: DepositError) -> Self {
        LedgerError::ConsensusViolation(ValidationError::Deposit(err))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err)
    }
}

impl From<UpgradeError> for LedgerError {
    fn from(err: UpgradeError) -> Self {
        LedgerError::Upgrade(err)
    }
}

/// Outcome of offering a block to the ledger.
#[derive(Debug)]
pub enum BlockVerification {
    AddedToMainChain,
    AddedToAlternativeChain { switched: bool },
    AlreadyExists,
    /// The parent is unknown; the caller may fetch missing ancestors.
    Orphan,
    VerificationFailed(LedgerError),
}

impl BlockVerification {
    pub fn is_added(&self) -> bool {
        matches!(
            self,
            BlockVerification::AddedToMainChain | BlockVerification::AddedToAlternativeChain { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BlockVerification::VerificationFailed(_))
    }
}

/// Outcome of offering a loose transaction for the pool.
#[derive(Debug)]
pub enum TxVerification {
    Added,
    AlreadyInChain,
    AlreadySpent,
    /// Valid, but the pool declined to keep it.
    NotKept,
    Rejected(LedgerError),
}

/// Per-block values kept in memory for every main-chain block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockSummary {
    pub hash: Hash256,
    pub timestamp: u64,
    pub major_version: u8,
    pub minor_version: u8,
    pub block_size: usize,
    pub cumulative_difficulty: Difficulty,
    pub already_generated_coins: Amount,
    pub transaction_count: u32,
}

impl BlockSummary {
    fn new(entry: &BlockEntry, hash: Hash256) -> Self {
        Self {
            hash,
            timestamp: entry.timestamp(),
            major_version: entry.block.header.major_version,
            minor_version: entry.block.header.minor_version,
            block_size: entry.block_cumulative_size,
            cumulative_difficulty: entry.cumulative_difficulty,
            already_generated_coins: entry.already_generated_coins,
            transaction_count: entry.transactions.len() as u32,
        }
    }
}

impl ChainView for [BlockSummary] {
    fn block_count(&self) -> u32 {
        self.len() as u32
    }

    fn block_versions(&self, height: u32) -> Option<(u8, u8)> {
        self.get(height as usize)
            .map(|summary| (summary.major_version, summary.minor_version))
    }
}

/// A spendable output offered for ring construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RandomOutput {
    pub global_index: u32,
    pub key: PublicKey,
}

/// Collaborators the ledger calls out to.
#[derive(Clone)]
pub struct LedgerContext {
    pub pow: Arc<dyn PowHasher>,
    pub crypto: Arc<dyn CryptoVerifier>,
    pub pool: Arc<dyn TransactionPool>,
    pub time: Arc<dyn TimeSource>,
}

#[derive(Clone, Debug)]
pub struct LedgerOptions {
    pub checkpoints: CheckpointSet,
    /// Load and trust the persisted index snapshot when it matches the log.
    pub use_cache: bool,
    /// Number of decoded block records kept in memory.
    pub entry_cache_capacity: usize,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            checkpoints: CheckpointSet::new(),
            use_cache: true,
            entry_cache_capacity: DEFAULT_ENTRY_CACHE_CAPACITY,
        }
    }
}

impl LedgerOptions {
    pub fn from_config(config: &LedgerConfig, checkpoints: CheckpointSet) -> Self {
        Self {
            checkpoints,
            use_cache: config.ledger_cache,
            entry_cache_capacity: config.entry_cache_capacity,
        }
    }
}

/// Every index derived from the main chain. Rebuilt by replaying the block
/// log or restored from the persisted snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct LedgerState {
    pub(crate) height_index: HeightIndex,
    pub(crate) summaries: Vec<BlockSummary>,
    pub(crate) key_images: KeyImageSet,
    pub(crate) key_outputs: KeyOutputIndex,
    pub(crate) multisig_outputs: MultisignatureOutputIndex,
    pub(crate) transactions: HashMap<Hash256, TransactionIndex>,
    pub(crate) deposits: DepositLedger,
}

#[derive(Clone, Debug)]
struct AlternativeBlock {
    block: Block,
    height: u32,
    cumulative_difficulty: Difficulty,
}

struct EntryCache {
    capacity: usize,
    entries: HashMap<u32, Arc<BlockEntry>>,
    order: VecDeque<u32>,
}

impl EntryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&self, height: u32) -> Option<Arc<BlockEntry>> {
        self.entries.get(&height).cloned()
    }

    fn insert(&mut self, height: u32, entry: Arc<BlockEntry>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(height, entry).is_none() {
            self.order.push_back(height);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn remove(&mut self, height: u32) {
        if self.entries.remove(&height).is_some() {
            self.order.retain(|cached| *cached != height);
        }
    }
}

/// Key images and multisignature outputs consumed by the transactions of the
/// block under validation.
#[derive(Default)]
struct BlockSpends {
    key_images: HashSet<KeyImage>,
    multisig_outputs: HashSet<(Amount, u32)>,
}

struct BlockFacts {
    cumulative_size: usize,
    cumulative_difficulty: Difficulty,
    already_generated_coins: Amount,
}

/// The genesis block described by `params`.
pub fn genesis_block(params: &ConsensusParams) -> Result<Block, LedgerError> {
    let coinbase_bytes = hex_to_bytes(params.genesis_coinbase_hex)
        .ok_or(LedgerError::Corrupt("genesis coinbase is not hex"))?;
    let base_transaction = Transaction::consensus_decode(&coinbase_bytes)?;
    Ok(Block {
        header: BlockHeader {
            major_version: BLOCK_MAJOR_VERSION_1,
            minor_version: BLOCK_MINOR_VERSION_0,
            timestamp: params.genesis_timestamp,
            prev_hash: NULL_HASH,
            nonce: params.genesis_nonce,
        },
        base_transaction,
        transaction_hashes: Vec::new(),
    })
}

/// Net change in locked deposits and the interest released by withdrawals.
fn deposit_changes(
    transactions: &[TransactionEntry],
    height: u32,
    params: &ConsensusParams,
) -> Result<(i64, Amount), DepositError> {
    let mut delta: i128 = 0;
    let mut interest: Amount = 0;
    for entry in transactions {
        let tx = &entry.tx;
        for output in &tx.outputs {
            if let OutputTarget::Multisignature(target) = &output.target {
                if target.term != 0 {
                    delta += i128::from(output.amount);
                }
            }
        }
        for input in &tx.inputs {
            if let TransactionInput::Multisignature(input) = input {
                if input.term != 0 {
                    delta -= i128::from(input.amount);
                }
            }
        }
        let tx_interest = total_transaction_interest(tx.input_values(), height, params)
            .ok_or(DepositError::InterestOverflow)?;
        interest = interest
            .checked_add(tx_interest)
            .ok_or(DepositError::InterestOverflow)?;
    }
    let delta = i64::try_from(delta).map_err(|_| DepositError::AmountOverflow)?;
    Ok((delta, interest))
}

fn abort_rollback(err: &LedgerError) -> ! {
    abort_inconsistent("failed to restore the main chain after a failed reorganization", err)
}

fn abort_inconsistent(context: &str, err: &LedgerError) -> ! {
    log_error!("{context}: {err}");
    panic!("ledger state is inconsistent: {context}: {err}");
}

struct Blockchain {
    params: ConsensusParams,
    checkpoints: CheckpointSet,
    log: Arc<dyn BlockLog>,
    store: Arc<dyn KeyValueStore>,
    use_cache: bool,
    pow: Arc<dyn PowHasher>,
    crypto: Arc<dyn CryptoVerifier>,
    pool: Arc<dyn TransactionPool>,
    time: Arc<dyn TimeSource>,
    state: LedgerState,
    upgrade_detectors: Vec<UpgradeDetector>,
    alternative_chains: HashMap<Hash256, AlternativeBlock>,
    entry_cache: Mutex<EntryCache>,
    metrics: Arc<LedgerMetrics>,
}

impl Blockchain {
    fn new(
        params: ConsensusParams,
        log: Arc<dyn BlockLog>,
        store: Arc<dyn KeyValueStore>,
        context: LedgerContext,
        options: LedgerOptions,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        let upgrade_detectors = UPGRADE_TARGET_VERSIONS
            .iter()
            .map(|target| UpgradeDetector::new(&params, *target))
            .collect();
        Self {
            checkpoints: options.checkpoints,
            log,
            store,
            use_cache: options.use_cache,
            pow: context.pow,
            crypto: context.crypto,
            pool: context.pool,
            time: context.time,
            state: LedgerState::default(),
            upgrade_detectors,
            alternative_chains: HashMap::new(),
            entry_cache: Mutex::new(EntryCache::new(options.entry_cache_capacity)),
            metrics,
            params,
        }
    }

    fn chain_len(&self) -> u32 {
        self.state.height_index.len()
    }

    fn tail_hash(&self) -> Hash256 {
        self.state.height_index.tail().unwrap_or(NULL_HASH)
    }

    // ---- startup -------------------------------------------------------

    fn load(&mut self) -> Result<(), LedgerError> {
        if self.log.is_empty()? {
            log_info!("block log is empty, writing genesis for {}", self.params.network.as_str());
            self.push_genesis()?;
            self.init_detectors()?;
            return Ok(());
        }

        if self.use_cache {
            match self.load_cache() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(err) => log_warn!("discarding ledger cache: {err}"),
            }
        }
        self.replay()?;
        self.init_detectors()
    }

    fn push_genesis(&mut self) -> Result<(), LedgerError> {
        let block = genesis_block(&self.params)?;
        let hash = block.hash();
        let tx_hashes = vec![block.base_transaction.hash()];
        let facts = self.validate_block(&block, &hash, 0, &[], &tx_hashes, true)?;
        let entry = BlockEntry {
            transactions: vec![TransactionEntry::new(block.base_transaction.clone())],
            block,
            height: 0,
            block_cumulative_size: facts.cumulative_size,
            cumulative_difficulty: facts.cumulative_difficulty,
            already_generated_coins: facts.already_generated_coins,
        };
        self.commit_entry(entry, hash, &tx_hashes).map_err(|(err, _)| err)?;
        log_info!("genesis block {}", hash_to_hex(&hash));
        Ok(())
    }

    fn init_detectors(&mut self) -> Result<(), LedgerError> {
        for detector in &mut self.upgrade_detectors {
            detector.init(self.state.summaries.as_slice())?;
        }
        Ok(())
    }

    /// Restores the indices from the persisted snapshot when it was taken at
    /// the log's current tail.
    fn load_cache(&mut self) -> Result<bool, CacheError> {
        let Some(cached) = cache::load(self.store.as_ref())? else {
            return Ok(false);
        };
        let log_len = self.log.len()?;
        if cached.block_count != log_len || log_len == 0 {
            log_info!(
                "ledger cache covers {} blocks, block log has {log_len}; replaying",
                cached.block_count
            );
            return Ok(false);
        }
        let tail_record = self
            .log
            .get(log_len - 1)?
            .ok_or(CacheError::Inconsistent("block log tail missing"))?;
        let tail_entry = BlockEntry::decode(&tail_record)?;
        if tail_entry.hash() != cached.tail {
            log_info!("ledger cache tail differs from block log tail; replaying");
            return Ok(false);
        }

        self.state = cached.state;
        for detector in &mut self.upgrade_detectors {
            if let Some((_, height)) = cached
                .voting_heights
                .iter()
                .find(|(target, _)| *target == detector.target_version())
            {
                detector.restore(*height);
            }
        }
        log_info!("loaded ledger cache at height {}", log_len - 1);
        Ok(true)
    }

    /// Rebuilds every index from the block log. Records are decoded and
    /// hashed in parallel and indexed in height order.
    fn replay(&mut self) -> Result<(), LedgerError> {
        self.state = LedgerState::default();
        let total = self.log.len()?;
        let genesis_hash = genesis_block(&self.params)?.hash();
        log_info!("replaying {total} blocks from the block log");
        let started = Instant::now();

        let mut next = 0u32;
        while next < total {
            let end = next.saturating_add(REPLAY_CHUNK).min(total);
            let records = (next..end)
                .map(|height| {
                    self.log
                        .get(height)?
                        .ok_or(LedgerError::Corrupt("missing block record"))
                })
                .collect::<Result<Vec<_>, LedgerError>>()?;
            let decoded = records
                .par_iter()
                .map(|record| {
                    let entry = BlockEntry::decode(record)?;
                    let hash = entry.hash();
                    let tx_hashes: Vec<Hash256> = entry
                        .transactions
                        .iter()
                        .map(|tx_entry| tx_entry.tx.hash())
                        .collect();
                    Ok((entry, hash, tx_hashes))
                })
                .collect::<Result<Vec<_>, DecodeError>>()
                .map_err(|err| {
                    log_error!("undecodable block record: {err}");
                    LedgerError::Corrupt("undecodable block record")
                })?;

            for (entry, hash, tx_hashes) in decoded {
                if entry.height == 0 && hash != genesis_hash {
                    return Err(LedgerError::Corrupt("block log genesis does not match network"));
                }
                if entry.height > 0 && entry.block.header.prev_hash != self.tail_hash() {
                    return Err(LedgerError::Corrupt("block record does not extend the chain"));
                }
                let stored: Vec<_> = entry
                    .transactions
                    .iter()
                    .map(|tx_entry| tx_entry.global_output_indexes.clone())
                    .collect();
                let mut entry = entry;
                self.index_entry(&mut entry, hash, &tx_hashes)?;
                let recomputed = entry
                    .transactions
                    .iter()
                    .map(|tx_entry| &tx_entry.global_output_indexes);
                if !stored.iter().eq(recomputed) {
                    return Err(LedgerError::Corrupt("stored output indexes disagree with replay"));
                }
                if entry.height % REPLAY_PROGRESS_INTERVAL == 0 && entry.height > 0 {
                    log_info!("replayed {} / {total} blocks", entry.height);
                }
            }
            next = end;
        }
        log_info!(
            "replayed {total} blocks in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn save_cache(&self) -> Result<(), LedgerError> {
        let voting_heights: Vec<(u8, u32)> = self
            .upgrade_detectors
            .iter()
            .map(|detector| (detector.target_version(), detector.voting_complete_height()))
            .collect();
        let record = cache::encode(&self.state, &voting_heights);
        cache::save(self.store.as_ref(), &record)?;
        log_info!(
            "saved ledger cache at height {} ({} bytes)",
            self.chain_len().saturating_sub(1),
            record.len()
        );
        Ok(())
    }

    // ---- block records ---------------------------------------------------

    fn load_entry(&self, height: u32) -> Result<Arc<BlockEntry>, LedgerError> {
        if let Ok(cache) = self.entry_cache.lock() {
            if let Some(entry) = cache.get(height) {
                return Ok(entry);
            }
        }
        let record = self
            .log
            .get(height)?
            .ok_or(LedgerError::Corrupt("missing block record"))?;
        let entry = BlockEntry::decode(&record).map_err(|err| {
            log_error!("block record at height {height} is undecodable: {err}");
            LedgerError::Corrupt("undecodable block record")
        })?;
        let entry = Arc::new(entry);
        if let Ok(mut cache) = self.entry_cache.lock() {
            cache.insert(height, Arc::clone(&entry));
        }
        Ok(entry)
    }

    fn transaction_at(&self, index: TransactionIndex) -> Result<(Arc<BlockEntry>, usize), LedgerError> {
        let entry = self.load_entry(index.block)?;
        let slot = usize::from(index.transaction);
        if slot >= entry.transactions.len() {
            return Err(LedgerError::Corrupt("transaction index points past block"));
        }
        Ok((entry, slot))
    }

    // ---- chain rules -----------------------------------------------------

    fn block_major_version_for_height(&self, height: u32) -> u8 {
        self.upgrade_detectors
            .iter()
            .rev()
            .find(|detector| height > detector.upgrade_height())
            .map_or(BLOCK_MAJOR_VERSION_1, UpgradeDetector::target_version)
    }

    fn check_block_version(&self, block: &Block, height: u32) -> Result<(), ValidationError> {
        let expected = self.block_major_version_for_height(height);
        if block.header.major_version != expected {
            log_debug!(
                "block at height {height} has major version {}, expected {expected}",
                block.header.major_version
            );
            return Err(ValidationError::InvalidHeader("block has wrong major version"));
        }
        check_block_minor_version(block)
    }

    fn last_block_sizes(&self) -> Vec<u64> {
        let summaries = &self.state.summaries;
        let start = summaries.len().saturating_sub(self.params.reward_blocks_window);
        summaries[start..]
            .iter()
            .map(|summary| summary.block_size as u64)
            .collect()
    }

    fn current_cumulative_block_size_limit(&self) -> usize {
        let median_size = median(&self.last_block_sizes()) as usize;
        median_size
            .max(self.params.block_granted_full_reward_zone)
            .saturating_mul(2)
    }

    fn difficulty_for_next_block(&self) -> Result<Difficulty, LedgerError> {
        let height = self.chain_len();
        let major_version = self.block_major_version_for_height(height);
        let count = self.params.difficulty_blocks_count(major_version);
        let summaries = &self.state.summaries;
        let start = summaries.len().saturating_sub(count).max(1).min(summaries.len());
        let window = &summaries[start..];
        let timestamps: Vec<u64> = window.iter().map(|summary| summary.timestamp).collect();
        let cumulative: Vec<Difficulty> = window
            .iter()
            .map(|summary| summary.cumulative_difficulty)
            .collect();
        let difficulty =
            next_difficulty(major_version, height, &timestamps, &cumulative, &self.params)
                .map_err(ValidationError::from)?;
        if difficulty == 0 {
            return Err(ValidationError::Difficulty(DifficultyError::Overflow).into());
        }
        Ok(difficulty)
    }

    fn difficulty_at_height(&self, height: u32) -> Option<Difficulty> {
        let summaries = &self.state.summaries;
        let current = summaries.get(height as usize)?.cumulative_difficulty;
        match height {
            0 => Some(current),
            _ => Some(current - summaries[height as usize - 1].cumulative_difficulty),
        }
    }

    /// Validates `block` as the next main-chain block. `transactions` are the
    /// non-coinbase transactions in block order and `tx_hashes` starts with
    /// the coinbase hash.
    fn validate_block(
        &self,
        block: &Block,
        hash: &Hash256,
        height: u32,
        transactions: &[Transaction],
        tx_hashes: &[Hash256],
        trusted: bool,
    ) -> Result<BlockFacts, LedgerError> {
        let in_checkpoint_zone = self.checkpoints.is_in_checkpoint_zone(height);
        let difficulty = if trusted {
            1
        } else {
            if block.header.prev_hash != self.tail_hash() {
                return Err(ValidationError::InvalidBlock("block does not extend the chain tail").into());
            }
            self.check_block_version(block, height)?;
            let major_version = block.header.major_version;
            let window = self.params.timestamp_check_window(major_version);
            let start = self.state.summaries.len().saturating_sub(window);
            let previous: Vec<u64> = self.state.summaries[start..]
                .iter()
                .map(|summary| summary.timestamp)
                .collect();
            check_block_timestamp(
                block.header.timestamp,
                &previous,
                self.time.now(),
                major_version,
                &self.params,
            )?;

            let difficulty = self.difficulty_for_next_block()?;
            if in_checkpoint_zone {
                if !self.checkpoints.check_block(height, hash) {
                    return Err(ValidationError::CheckpointMismatch(height).into());
                }
            } else {
                check_proof_of_work(self.pow.as_ref(), block, difficulty)
                    .map_err(ValidationError::from)?;
            }
            prevalidate_miner_transaction(block, height, &self.params)?;
            difficulty
        };

        if transactions.len() >= usize::from(u16::MAX) {
            return Err(ValidationError::InvalidBlock("too many transactions in block").into());
        }
        let mut seen = HashSet::with_capacity(tx_hashes.len());
        for tx_hash in tx_hashes {
            if !seen.insert(*tx_hash) || self.state.transactions.contains_key(tx_hash) {
                return Err(ValidationError::DuplicateTransaction.into());
            }
        }
        if block.base_transaction.outputs.len() > usize::from(u16::MAX) {
            return Err(ValidationError::InvalidBlock("too many coinbase outputs").into());
        }

        let mut spends = BlockSpends::default();
        let mut fees: Amount = 0;
        let mut cumulative_size = block.base_transaction.blob_size();
        for (tx, tx_hash) in transactions.iter().zip(tx_hashes.iter().skip(1)) {
            let blob_size = tx.blob_size();
            let (fee, _) = self
                .check_transaction(tx, blob_size, height, Some(&mut spends), in_checkpoint_zone)
                .map_err(|err| {
                    log_debug!(
                        "transaction {} in block {} rejected: {err}",
                        hash_to_hex(tx_hash),
                        hash_to_hex(hash)
                    );
                    err
                })?;
            fees = fees.checked_add(fee).ok_or(ValidationError::ValueOutOfRange)?;
            cumulative_size = cumulative_size.saturating_add(blob_size);
        }
        if cumulative_size > max_block_cumulative_size(u64::from(height), &self.params) {
            return Err(LedgerError::ResourceExhaustion("block cumulative size is too big"));
        }

        let parent = self.state.summaries.last();
        let previous_generated = parent.map_or(0, |summary| summary.already_generated_coins);
        let previous_difficulty = parent.map_or(0, |summary| summary.cumulative_difficulty);
        let emission_change = if trusted {
            let paid = block
                .base_transaction
                .outputs_amount()
                .ok_or(ValidationError::ValueOutOfRange)?;
            i64::try_from(paid).map_err(|_| ValidationError::ValueOutOfRange)?
        } else {
            validate_miner_reward(
                block,
                height,
                cumulative_size,
                previous_generated,
                fees,
                &self.last_block_sizes(),
                &self.params,
            )?
        };
        let already_generated_coins =
            u64::try_from(i128::from(previous_generated) + i128::from(emission_change))
                .map_err(|_| ValidationError::ValueOutOfRange)?;
        let cumulative_difficulty = previous_difficulty
            .checked_add(difficulty)
            .ok_or(ValidationError::Difficulty(DifficultyError::Overflow))?;

        Ok(BlockFacts {
            cumulative_size,
            cumulative_difficulty,
            already_generated_coins,
        })
    }

    /// Full check of a non-coinbase transaction against the tail state.
    /// Returns the fee and the newest block its inputs reference.
    fn check_transaction(
        &self,
        tx: &Transaction,
        blob_size: usize,
        height: u32,
        spends: Option<&mut BlockSpends>,
        skip_signatures: bool,
    ) -> Result<(Amount, u32), LedgerError> {
        if blob_size > self.params.max_tx_size {
            return Err(LedgerError::ResourceExhaustion("transaction is too big"));
        }
        check_transaction_syntax(tx)?;
        if tx.outputs.len() > usize::from(u16::MAX) {
            return Err(ValidationError::InvalidTransaction("too many outputs").into());
        }
        check_outputs(tx, self.crypto.as_ref(), &self.params)?;
        let max_used_block = self.check_inputs(tx, spends, skip_signatures)?;
        let fee = transaction_fee(tx.input_values(), &tx.output_amounts(), height, &self.params)
            .ok_or(ValidationError::InvalidTransaction("transaction outputs exceed inputs"))?;
        Ok((fee, max_used_block))
    }

    fn check_inputs(
        &self,
        tx: &Transaction,
        mut spends: Option<&mut BlockSpends>,
        skip_signatures: bool,
    ) -> Result<u32, LedgerError> {
        let prefix_hash = tx.prefix_hash();
        let chain_len = self.chain_len();
        let now = self.time.now();
        let mut max_used_block = 0u32;

        for (position, input) in tx.inputs.iter().enumerate() {
            let signatures = tx
                .signatures
                .get(position)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            match input {
                TransactionInput::Base { .. } => {
                    return Err(ValidationError::InvalidTransaction("base input outside coinbase").into());
                }
                TransactionInput::Key(input) => {
                    if self.state.key_images.contains(&input.key_image) {
                        return Err(ValidationError::DoubleSpend.into());
                    }
                    if let Some(spends) = spends.as_deref_mut() {
                        if !spends.key_images.insert(input.key_image) {
                            return Err(ValidationError::DoubleSpend.into());
                        }
                    }
                    if !self.crypto.check_key_image(&input.key_image) {
                        return Err(ValidationError::InvalidTransaction("invalid key image").into());
                    }
                    let absolute = relative_to_absolute_offsets(&input.output_indexes)
                        .ok_or(ValidationError::ValueOutOfRange)?;
                    let mut ring = Vec::with_capacity(absolute.len());
                    for global_index in absolute {
                        let reference = self
                            .state
                            .key_outputs
                            .get(input.amount, global_index)
                            .ok_or(ValidationError::InvalidTransaction("ring member does not exist"))?;
                        let (entry, slot) = self.transaction_at(reference.transaction)?;
                        let source = &entry.transactions[slot].tx;
                        if !is_unlocked(source.unlock_time, chain_len, now, &self.params) {
                            return Err(ValidationError::InvalidTransaction("ring member is still locked").into());
                        }
                        match source
                            .outputs
                            .get(usize::from(reference.output))
                            .map(|output| &output.target)
                        {
                            Some(OutputTarget::Key(key)) => ring.push(*key),
                            _ => return Err(LedgerError::Corrupt("key output index points at a non-key output")),
                        }
                        max_used_block = max_used_block.max(reference.transaction.block);
                    }
                    if !skip_signatures
                        && !self.crypto.check_ring_signature(
                            &prefix_hash,
                            &input.key_image,
                            &ring,
                            signatures,
                        )
                    {
                        return Err(ValidationError::InvalidTransaction("invalid ring signature").into());
                    }
                }
                TransactionInput::Multisignature(input) => {
                    let usage = self
                        .state
                        .multisig_outputs
                        .get(input.amount, input.output_index)
                        .ok_or(ValidationError::InvalidTransaction(
                            "multisignature output does not exist",
                        ))?;
                    if usage.is_used {
                        return Err(ValidationError::DoubleSpend.into());
                    }
                    if let Some(spends) = spends.as_deref_mut() {
                        if !spends.multisig_outputs.insert((input.amount, input.output_index)) {
                            return Err(ValidationError::DoubleSpend.into());
                        }
                    }
                    let (entry, slot) = self.transaction_at(usage.transaction_index)?;
                    let source = &entry.transactions[slot].tx;
                    if !is_unlocked(source.unlock_time, chain_len, now, &self.params) {
                        return Err(ValidationError::InvalidTransaction(
                            "multisignature output is still locked",
                        )
                        .into());
                    }
                    let Some(OutputTarget::Multisignature(output)) = source
                        .outputs
                        .get(usize::from(usage.output_index))
                        .map(|output| &output.target)
                    else {
                        return Err(LedgerError::Corrupt(
                            "multisignature index points at a non-multisignature output",
                        ));
                    };
                    if input.signature_count != output.required_signatures {
                        return Err(ValidationError::InvalidTransaction(
                            "multisignature input has wrong signature count",
                        )
                        .into());
                    }
                    if input.term != output.term {
                        return Err(ValidationError::InvalidTransaction(
                            "multisignature input term does not match output",
                        )
                        .into());
                    }
                    if input.term != 0
                        && u64::from(usage.transaction_index.block) + u64::from(input.term)
                            > u64::from(chain_len)
                    {
                        return Err(ValidationError::InvalidTransaction("deposit term has not elapsed").into());
                    }
                    if !skip_signatures
                        && !self.check_multisignature(&prefix_hash, &output.keys, signatures)
                    {
                        return Err(ValidationError::InvalidTransaction(
                            "invalid multisignature signature",
                        )
                        .into());
                    }
                    max_used_block = max_used_block.max(usage.transaction_index.block);
                }
            }
        }
        Ok(max_used_block)
    }

    /// Signatures must verify against the output keys in order; a key may
    /// be skipped but not reused.
    fn check_multisignature(
        &self,
        prefix_hash: &Hash256,
        keys: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        let mut keys = keys.iter();
        signatures.iter().all(|signature| {
            keys.by_ref()
                .any(|key| self.crypto.check_signature(prefix_hash, key, signature))
        })
    }

    fn have_spent_key_images(&self, tx: &Transaction) -> bool {
        tx.key_images()
            .any(|key_image| self.state.key_images.contains(key_image))
    }

    // ---- main chain mutation ---------------------------------------------

    fn release_transactions(&self, transactions: impl IntoIterator<Item = Transaction>) {
        for tx in transactions {
            self.pool.return_transaction(tx);
        }
    }

    fn take_block_transactions(&self, block: &Block) -> Result<Vec<Transaction>, LedgerError> {
        let mut seen = HashSet::with_capacity(block.transaction_hashes.len());
        if !block.transaction_hashes.iter().all(|hash| seen.insert(*hash)) {
            return Err(ValidationError::DuplicateTransaction.into());
        }
        let mut taken = Vec::with_capacity(block.transaction_hashes.len());
        for tx_hash in &block.transaction_hashes {
            match self.pool.take_transaction(tx_hash) {
                Some(tx) if tx.hash() == *tx_hash => taken.push(tx),
                other => {
                    if let Some(tx) = other {
                        self.pool.return_transaction(tx);
                    }
                    self.release_transactions(taken);
                    log_info!("block references unknown transaction {}", hash_to_hex(tx_hash));
                    return Err(ValidationError::InvalidBlock("block references an unknown transaction").into());
                }
            }
        }
        Ok(taken)
    }

    /// Validates and commits `block` on top of the tail. Transactions come
    /// from the pool unless `supplied`; pooled transactions go back to the
    /// pool when the block is rejected.
    fn push_block(
        &mut self,
        block: Block,
        hash: Hash256,
        supplied: Option<Vec<Transaction>>,
    ) -> Result<(), LedgerError> {
        let from_pool = supplied.is_none();
        let transactions = match supplied {
            Some(transactions) => transactions,
            None => self.take_block_transactions(&block)?,
        };
        let height = self.chain_len();
        let tx_hashes: Vec<Hash256> = std::iter::once(block.base_transaction.hash())
            .chain(block.transaction_hashes.iter().copied())
            .collect();

        let started = Instant::now();
        let facts = match self.validate_block(&block, &hash, height, &transactions, &tx_hashes, false) {
            Ok(facts) => facts,
            Err(err) => {
                if from_pool {
                    self.release_transactions(transactions);
                }
                return Err(err);
            }
        };
        let validate_time = started.elapsed();

        let committed = Instant::now();
        let mut entries = Vec::with_capacity(transactions.len() + 1);
        entries.push(TransactionEntry::new(block.base_transaction.clone()));
        entries.extend(transactions.into_iter().map(TransactionEntry::new));
        let entry = BlockEntry {
            block,
            height,
            block_cumulative_size: facts.cumulative_size,
            cumulative_difficulty: facts.cumulative_difficulty,
            already_generated_coins: facts.already_generated_coins,
            transactions: entries,
        };
        let transaction_count = entry.transactions.len() - 1;
        if let Err((err, entry)) = self.commit_entry(entry, hash, &tx_hashes) {
            if from_pool {
                self.release_transactions(entry.transactions.into_iter().skip(1).map(|tx_entry| tx_entry.tx));
            }
            return Err(err);
        }
        self.metrics.record_push(validate_time, committed.elapsed());
        log_info!(
            "block {} added at height {height}, difficulty {}, {transaction_count} transactions",
            hash_to_hex(&hash),
            self.difficulty_at_height(height).unwrap_or(0)
        );
        Ok(())
    }

    /// Indexes `entry` and appends its record. On failure the indices are
    /// left as they were and the entry is handed back.
    fn commit_entry(
        &mut self,
        mut entry: BlockEntry,
        hash: Hash256,
        tx_hashes: &[Hash256],
    ) -> Result<(), (LedgerError, BlockEntry)> {
        if let Err(err) = self.index_entry(&mut entry, hash, tx_hashes) {
            return Err((err, entry));
        }
        let height = entry.height;
        match self.log.append(&entry.encode()) {
            Ok(appended) if appended == height => {}
            Ok(_) => {
                self.unindex_tail(&entry);
                return Err((LedgerError::Corrupt("block log height disagrees with the chain"), entry));
            }
            Err(err) => {
                self.unindex_tail(&entry);
                return Err((err.into(), entry));
            }
        }
        if let Ok(mut cache) = self.entry_cache.lock() {
            cache.insert(height, Arc::new(entry));
        }
        self.pool.on_blockchain_inc(height, &hash);
        Ok(())
    }

    /// Adds `entry` to every in-memory index and assigns its global output
    /// indexes. On failure the indices are left as they were.
    fn index_entry(
        &mut self,
        entry: &mut BlockEntry,
        hash: Hash256,
        tx_hashes: &[Hash256],
    ) -> Result<(), LedgerError> {
        let height = self.chain_len();
        if entry.height != height {
            return Err(LedgerError::Corrupt("block height does not follow the tail"));
        }
        if tx_hashes.len() != entry.transactions.len() {
            return Err(LedgerError::Corrupt("transaction hash count mismatch"));
        }
        if self.state.height_index.contains(&hash) {
            return Err(LedgerError::Corrupt("block is already indexed"));
        }
        let (deposit_delta, deposit_interest) =
            deposit_changes(&entry.transactions, height, &self.params)?;
        self.state.deposits.push(deposit_delta, deposit_interest)?;

        self.state.height_index.append(hash);
        self.state.summaries.push(BlockSummary::new(entry, hash));
        for (slot, (tx_entry, tx_hash)) in entry.transactions.iter_mut().zip(tx_hashes).enumerate() {
            let transaction = TransactionIndex {
                block: height,
                transaction: slot as u16,
            };
            self.state.transactions.insert(*tx_hash, transaction);
            for input in &tx_entry.tx.inputs {
                match input {
                    TransactionInput::Base { .. } => {}
                    TransactionInput::Key(input) => {
                        self.state.key_images.insert(input.key_image, height);
                    }
                    TransactionInput::Multisignature(input) => {
                        self.state
                            .multisig_outputs
                            .set_used(input.amount, input.output_index, true);
                    }
                }
            }
            tx_entry.global_output_indexes.clear();
            for (output_index, output) in tx_entry.tx.outputs.iter().enumerate() {
                let global_index = match &output.target {
                    OutputTarget::Key(_) => self.state.key_outputs.push(
                        output.amount,
                        OutputReference {
                            transaction,
                            output: output_index as u16,
                        },
                    ),
                    OutputTarget::Multisignature(_) => self.state.multisig_outputs.push(
                        output.amount,
                        transaction,
                        output_index as u16,
                    ),
                };
                tx_entry.global_output_indexes.push(global_index);
            }
        }

        let detectors = self.upgrade_detectors.clone();
        let summaries = self.state.summaries.as_slice();
        let pushed = self
            .upgrade_detectors
            .iter_mut()
            .try_for_each(|detector| detector.block_pushed(summaries));
        if let Err(err) = pushed {
            log_warn!("block {} at height {height} breaks the upgrade schedule: {err}", hash_to_hex(&hash));
            self.upgrade_detectors = detectors;
            self.unindex_records(entry);
            return Err(err.into());
        }
        Ok(())
    }

    /// Reverses [`Self::index_entry`] for the tail block.
    fn unindex_tail(&mut self, entry: &BlockEntry) {
        self.unindex_records(entry);
        for detector in &mut self.upgrade_detectors {
            if let Err(err) = detector.block_popped(self.state.summaries.as_slice()) {
                abort_inconsistent(
                    "upgrade detector disagrees with the popped chain",
                    &LedgerError::from(err),
                );
            }
        }
        if let Ok(mut cache) = self.entry_cache.lock() {
            cache.remove(entry.height);
        }
    }

    fn unindex_records(&mut self, entry: &BlockEntry) {
        for tx_entry in entry.transactions.iter().rev() {
            let tx = &tx_entry.tx;
            for output in tx.outputs.iter().rev() {
                match &output.target {
                    OutputTarget::Key(_) => {
                        self.state.key_outputs.pop(output.amount);
                    }
                    OutputTarget::Multisignature(_) => {
                        self.state.multisig_outputs.pop(output.amount);
                    }
                }
            }
            for input in tx.inputs.iter().rev() {
                match input {
                    TransactionInput::Base { .. } => {}
                    TransactionInput::Key(input) => {
                        self.state.key_images.remove(&input.key_image);
                    }
                    TransactionInput::Multisignature(input) => {
                        self.state
                            .multisig_outputs
                            .set_used(input.amount, input.output_index, false);
                    }
                }
            }
            self.state.transactions.remove(&tx.hash());
        }
        self.state.deposits.pop();
        self.state.summaries.pop();
        self.state.height_index.pop();
    }

    /// Removes the tail block and hands its transactions back to the pool.
    fn pop_block(&mut self) -> Result<Arc<BlockEntry>, LedgerError> {
        let len = self.chain_len();
        if len <= 1 {
            return Err(LedgerError::Corrupt("cannot pop the genesis block"));
        }
        let height = len - 1;
        let entry = self.load_entry(height)?;
        self.log.truncate_from(height)?;
        self.unindex_tail(&entry);

        let tail = self.tail_hash();
        self.pool.on_blockchain_dec(height - 1, &tail);
        self.release_transactions(entry.transactions.iter().skip(1).map(|tx_entry| tx_entry.tx.clone()));
        self.metrics.record_pop();
        log_debug!("popped block {} at height {height}", hash_to_hex(&entry.hash()));
        Ok(entry)
    }

    /// Pops main-chain blocks until `height` is the tail. Returns the number
    /// of blocks removed.
    fn rollback_to(&mut self, height: u32) -> Result<u32, LedgerError> {
        let mut popped = 0;
        while self.chain_len() > height.saturating_add(1) {
            self.pop_block()?;
            popped += 1;
        }
        if popped > 0 {
            log_info!("rolled back {popped} blocks to height {}", self.chain_len() - 1);
        }
        Ok(popped)
    }

    // ---- alternative chains ----------------------------------------------

    fn add_new_block(&mut self, block: Block) -> BlockVerification {
        let hash = block.hash();
        if self.have_block(&hash) {
            log_debug!("block {} already known", hash_to_hex(&hash));
            return BlockVerification::AlreadyExists;
        }
        let result = if block.header.prev_hash == self.tail_hash() {
            self.push_block(block, hash, None)
                .map(|()| BlockVerification::AddedToMainChain)
        } else {
            self.handle_alternative_block(block, hash)
        };
        match result {
            Ok(verification) => verification,
            Err(LedgerError::Orphan) => BlockVerification::Orphan,
            Err(err) => {
                self.metrics.record_rejected();
                log_info!("block {} rejected: {err}", hash_to_hex(&hash));
                BlockVerification::VerificationFailed(err)
            }
        }
    }

    fn have_block(&self, hash: &Hash256) -> bool {
        self.state.height_index.contains(hash) || self.alternative_chains.contains_key(hash)
    }

    /// Timestamps and cumulative difficulties of the last `count` blocks of
    /// the chain formed by the main chain up to `split_parent` followed by
    /// `branch`, oldest first.
    fn branch_window(
        &self,
        split_parent: u32,
        branch: &[Hash256],
        count: usize,
        skip_genesis: bool,
    ) -> (Vec<u64>, Vec<Difficulty>) {
        let alternatives: Vec<&AlternativeBlock> = branch
            .iter()
            .filter_map(|hash| self.alternative_chains.get(hash))
            .collect();
        let from_branch = alternatives.len().min(count);
        let from_main = count - from_branch;
        let main_end = split_parent as usize + 1;
        let first = usize::from(skip_genesis);
        let main_start = main_end.saturating_sub(from_main).max(first).min(main_end);

        let mut timestamps = Vec::with_capacity(count);
        let mut cumulative = Vec::with_capacity(count);
        for summary in &self.state.summaries[main_start..main_end] {
            timestamps.push(summary.timestamp);
            cumulative.push(summary.cumulative_difficulty);
        }
        for alternative in &alternatives[alternatives.len() - from_branch..] {
            timestamps.push(alternative.block.header.timestamp);
            cumulative.push(alternative.cumulative_difficulty);
        }
        (timestamps, cumulative)
    }

    fn handle_alternative_block(
        &mut self,
        block: Block,
        hash: Hash256,
    ) -> Result<BlockVerification, LedgerError> {
        let chain_len = self.chain_len();
        let height = match block.coinbase_height() {
            Some(height) if height > 0 => height,
            _ => {
                return Err(ValidationError::InvalidBlock("alternative block has no valid coinbase height").into())
            }
        };
        if !self.checkpoints.is_alternative_block_allowed(chain_len, height) {
            log_info!(
                "block {} at height {height} cannot be accepted as alternative, chain length {chain_len}",
                hash_to_hex(&hash)
            );
            return Err(ValidationError::InvalidBlock("alternative block below the last checkpoint").into());
        }
        self.check_block_version(&block, height)?;

        let mut cumulative_size = block.base_transaction.blob_size();
        for tx_hash in &block.transaction_hashes {
            cumulative_size =
                cumulative_size.saturating_add(self.pool.transaction_size(tx_hash).unwrap_or(0));
        }
        if cumulative_size > max_block_cumulative_size(u64::from(height), &self.params) {
            return Err(LedgerError::ResourceExhaustion("block cumulative size is too big"));
        }

        let mut branch = Vec::new();
        let mut cursor = block.header.prev_hash;
        while let Some(ancestor) = self.alternative_chains.get(&cursor) {
            branch.push(cursor);
            cursor = ancestor.block.header.prev_hash;
        }
        let Some(split_parent) = self.state.height_index.height_of(&cursor) else {
            self.metrics.record_orphan();
            log_debug!(
                "orphan block {} with unknown parent {}",
                hash_to_hex(&hash),
                hash_to_hex(&block.header.prev_hash)
            );
            return Err(LedgerError::Orphan);
        };
        branch.reverse();
        if split_parent as usize + branch.len() + 1 != height as usize {
            return Err(ValidationError::InvalidBlock("alternative block height does not follow its parent").into());
        }

        let major_version = block.header.major_version;
        let (timestamps, _) = self.branch_window(
            split_parent,
            &branch,
            self.params.timestamp_check_window(major_version),
            false,
        );
        check_block_timestamp(
            block.header.timestamp,
            &timestamps,
            self.time.now(),
            major_version,
            &self.params,
        )?;

        let (timestamps, cumulative) = self.branch_window(
            split_parent,
            &branch,
            self.params.difficulty_blocks_count(major_version),
            true,
        );
        let difficulty = next_difficulty(major_version, height, &timestamps, &cumulative, &self.params)
            .map_err(ValidationError::from)?;
        if difficulty == 0 {
            return Err(ValidationError::Difficulty(DifficultyError::Overflow).into());
        }
        if !self.checkpoints.check_block(height, &hash) {
            return Err(ValidationError::CheckpointMismatch(height).into());
        }
        check_proof_of_work(self.pow.as_ref(), &block, difficulty).map_err(ValidationError::from)?;
        prevalidate_miner_transaction(&block, height, &self.params)?;

        let parent_difficulty = match branch.last() {
            Some(parent) => self
                .alternative_chains
                .get(parent)
                .map(|alternative| alternative.cumulative_difficulty),
            None => self
                .state
                .summaries
                .get(split_parent as usize)
                .map(|summary| summary.cumulative_difficulty),
        }
        .ok_or(LedgerError::Corrupt("alternative parent vanished"))?;
        let cumulative_difficulty = parent_difficulty
            .checked_add(difficulty)
            .ok_or(ValidationError::Difficulty(DifficultyError::Overflow))?;

        self.alternative_chains.insert(
            hash,
            AlternativeBlock {
                block,
                height,
                cumulative_difficulty,
            },
        );
        self.metrics.record_alternative();
        branch.push(hash);

        let main_difficulty = self
            .state
            .summaries
            .last()
            .map_or(0, |summary| summary.cumulative_difficulty);
        if self.checkpoints.is_checkpoint(height) {
            log_info!(
                "reorganizing to checkpointed block {} at height {height}",
                hash_to_hex(&hash)
            );
            return self.switch_to_alternative(branch, true);
        }
        if main_difficulty < cumulative_difficulty {
            log_info!(
                "reorganizing at height {height}: main chain difficulty {main_difficulty}, alternative {cumulative_difficulty}"
            );
            return self.switch_to_alternative(branch, false);
        }
        log_info!(
            "block {} added as alternative at height {height}, difficulty {difficulty}",
            hash_to_hex(&hash)
        );
        Ok(BlockVerification::AddedToAlternativeChain { switched: false })
    }

    /// Replaces the main chain above the fork point with `branch`. A failure
    /// while applying the branch restores the original chain.
    fn switch_to_alternative(
        &mut self,
        branch: Vec<Hash256>,
        discard_disconnected: bool,
    ) -> Result<BlockVerification, LedgerError> {
        let split_height = branch
            .first()
            .and_then(|hash| self.alternative_chains.get(hash))
            .map(|alternative| alternative.height)
            .ok_or(LedgerError::Corrupt("empty alternative branch"))?;
        if split_height == 0 || self.chain_len() < split_height {
            return Err(LedgerError::Corrupt("alternative branch does not fork the main chain"));
        }

        let mut disconnected = Vec::new();
        while self.chain_len() > split_height {
            match self.pop_block() {
                Ok(entry) => disconnected.push(entry),
                Err(err) => {
                    disconnected.reverse();
                    let fork_height = self.chain_len();
                    self.restore_main_chain(fork_height, &disconnected);
                    self.metrics.record_reorg(false);
                    return Err(LedgerError::ReorgFailure(Box::new(err)));
                }
            }
        }
        disconnected.reverse();

        for (position, alternative_hash) in branch.iter().enumerate() {
            let block = self
                .alternative_chains
                .get(alternative_hash)
                .map(|alternative| alternative.block.clone());
            let pushed = match block {
                Some(block) => self.push_block(block, *alternative_hash, None),
                None => Err(LedgerError::Corrupt("alternative block vanished")),
            };
            if let Err(err) = pushed {
                log_warn!(
                    "failed to switch to alternative chain at block {}: {err}",
                    hash_to_hex(alternative_hash)
                );
                self.restore_main_chain(split_height, &disconnected);
                for dropped in &branch[position..] {
                    self.alternative_chains.remove(dropped);
                }
                self.metrics.record_reorg(false);
                return Err(LedgerError::ReorgFailure(Box::new(err)));
            }
        }

        if !discard_disconnected {
            for entry in &disconnected {
                self.alternative_chains.insert(
                    entry.hash(),
                    AlternativeBlock {
                        block: entry.block.clone(),
                        height: entry.height,
                        cumulative_difficulty: entry.cumulative_difficulty,
                    },
                );
            }
        }
        for applied in &branch {
            self.alternative_chains.remove(applied);
        }
        self.metrics.record_reorg(true);
        log_info!(
            "REORGANIZE SUCCESS! on height: {split_height}, new blockchain size: {}",
            self.chain_len()
        );
        Ok(BlockVerification::AddedToAlternativeChain { switched: true })
    }

    /// Pops back to `fork_height` and puts `disconnected` (oldest first) on
    /// top of it. Panics if that is impossible.
    fn restore_main_chain(&mut self, fork_height: u32, disconnected: &[Arc<BlockEntry>]) {
        while self.chain_len() > fork_height {
            if let Err(err) = self.pop_block() {
                abort_rollback(&err);
            }
        }
        for entry in disconnected {
            let transactions: Vec<Transaction> = entry
                .transactions
                .iter()
                .skip(1)
                .map(|tx_entry| tx_entry.tx.clone())
                .collect();
            if let Err(err) = self.push_block(entry.block.clone(), entry.hash(), Some(transactions)) {
                abort_rollback(&err);
            }
            for tx_hash in &entry.block.transaction_hashes {
                self.pool.take_transaction(tx_hash);
            }
        }
        log_info!("main chain restored at height {}", self.chain_len() - 1);
    }

    // ---- pool entry points -----------------------------------------------

    fn handle_incoming_transaction(&self, bytes: &[u8]) -> TxVerification {
        let verification = self.verify_incoming_transaction(bytes);
        self.metrics
            .record_transaction(matches!(verification, TxVerification::Added));
        if let TxVerification::Rejected(err) = &verification {
            log_debug!("transaction rejected: {err}");
        }
        verification
    }

    fn verify_incoming_transaction(&self, bytes: &[u8]) -> TxVerification {
        if bytes.len() > self.params.max_tx_size {
            return TxVerification::Rejected(LedgerError::ResourceExhaustion("transaction is too big"));
        }
        let tx = match Transaction::consensus_decode(bytes) {
            Ok(tx) => tx,
            Err(err) => return TxVerification::Rejected(LedgerError::MalformedInput(err)),
        };
        let hash = tx.hash();
        if self.state.transactions.contains_key(&hash) {
            return TxVerification::AlreadyInChain;
        }
        if let Err(err) = check_transaction_syntax(&tx)
            .and_then(|()| check_outputs(&tx, self.crypto.as_ref(), &self.params))
        {
            return TxVerification::Rejected(err.into());
        }
        if tx.outputs.len() > usize::from(u16::MAX) {
            return TxVerification::Rejected(
                ValidationError::InvalidTransaction("too many outputs").into(),
            );
        }
        if self.have_spent_key_images(&tx) {
            return TxVerification::AlreadySpent;
        }
        let height = self.chain_len();
        let skip_signatures = self.checkpoints.is_in_checkpoint_zone(height);
        if let Err(err) = self.check_inputs(&tx, None, skip_signatures) {
            return TxVerification::Rejected(err);
        }
        let Some(fee) = transaction_fee(tx.input_values(), &tx.output_amounts(), height, &self.params)
        else {
            return TxVerification::Rejected(
                ValidationError::InvalidTransaction("transaction outputs exceed inputs").into(),
            );
        };
        if self.pool.add_transaction(tx, hash, bytes.len(), fee) {
            TxVerification::Added
        } else {
            TxVerification::NotKept
        }
    }

    // ---- queries ---------------------------------------------------------

    fn find_blockchain_supplement(
        &self,
        remote_ids: &[Hash256],
        max_count: usize,
    ) -> Result<(Vec<Hash256>, u32, u32), LedgerError> {
        let genesis = self.state.height_index.hash_at(0).map_err(|_| LedgerError::NotFound)?;
        match remote_ids.last() {
            Some(last) if *last == genesis => {}
            _ => {
                return Err(LedgerError::MalformedInput(DecodeError::InvalidData(
                    "remote chain does not end at genesis",
                )))
            }
        }
        let start = self
            .state
            .height_index
            .find_supplement(remote_ids)
            .unwrap_or(0);
        let max_count = max_count.min(self.params.blocks_ids_synchronizing_count);
        let ids = self.state.height_index.hash_range(start, max_count);
        Ok((ids, self.chain_len(), start))
    }

    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, LedgerError> {
        if let Some(height) = self.state.height_index.height_of(hash) {
            return Ok(Some(self.load_entry(height)?.block.clone()));
        }
        Ok(self
            .alternative_chains
            .get(hash)
            .map(|alternative| alternative.block.clone()))
    }

    fn transaction(&self, hash: &Hash256) -> Result<Option<Transaction>, LedgerError> {
        let Some(index) = self.state.transactions.get(hash) else {
            return Ok(None);
        };
        let (entry, slot) = self.transaction_at(*index)?;
        Ok(Some(entry.transactions[slot].tx.clone()))
    }

    fn global_output_indexes(&self, hash: &Hash256) -> Result<Option<Vec<u32>>, LedgerError> {
        let Some(index) = self.state.transactions.get(hash) else {
            return Ok(None);
        };
        let (entry, slot) = self.transaction_at(*index)?;
        Ok(Some(entry.transactions[slot].global_output_indexes.to_vec()))
    }

    /// Unlocked key outputs of `amount`, newest first. Outputs mined within
    /// the unlock window are skipped.
    fn random_outputs_for_amount(
        &self,
        amount: Amount,
        count: usize,
    ) -> Result<Vec<RandomOutput>, LedgerError> {
        let chain_len = self.chain_len();
        let now = self.time.now();
        let bucket = self.state.key_outputs.bucket(amount);
        let mut picked = Vec::with_capacity(count.min(bucket.len()));
        for (global_index, reference) in bucket.iter().enumerate().rev() {
            if picked.len() == count {
                break;
            }
            if u64::from(reference.transaction.block)
                + u64::from(self.params.mined_money_unlock_window)
                > u64::from(chain_len)
            {
                continue;
            }
            let (entry, slot) = self.transaction_at(reference.transaction)?;
            let tx = &entry.transactions[slot].tx;
            if !is_unlocked(tx.unlock_time, chain_len, now, &self.params) {
                continue;
            }
            if let Some(OutputTarget::Key(key)) = tx
                .outputs
                .get(usize::from(reference.output))
                .map(|output| &output.target)
            {
                picked.push(RandomOutput {
                    global_index: global_index as u32,
                    key: *key,
                });
            }
        }
        Ok(picked)
    }
}

/// The thread-safe ledger. Every public method takes the lock once.
pub struct Ledger {
    inner: Mutex<Blockchain>,
    metrics: Arc<LedgerMetrics>,
}

impl Ledger {
    /// Opens the ledger over `store`. An empty store is initialized with the
    /// network's genesis block; otherwise the indices come from the cache
    /// snapshot or a replay of the block log.
    pub fn open(
        params: ConsensusParams,
        store: Arc<dyn KeyValueStore>,
        context: LedgerContext,
        options: LedgerOptions,
    ) -> Result<Self, LedgerError> {
        let log = KvBlockLog::open(Arc::clone(&store))?;
        let metrics = Arc::new(LedgerMetrics::default());
        let mut chain = Blockchain::new(
            params,
            Arc::new(log),
            store,
            context,
            options,
            Arc::clone(&metrics),
        );
        chain.load()?;
        Ok(Self {
            inner: Mutex::new(chain),
            metrics,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Blockchain>, LedgerError> {
        self.inner.lock().map_err(|_| LedgerError::Poisoned)
    }

    pub fn add_new_block(&self, block: Block) -> BlockVerification {
        match self.lock() {
            Ok(mut chain) => chain.add_new_block(block),
            Err(err) => BlockVerification::VerificationFailed(err),
        }
    }

    pub fn handle_incoming_block(&self, bytes: &[u8]) -> BlockVerification {
        let mut chain = match self.lock() {
            Ok(chain) => chain,
            Err(err) => return BlockVerification::VerificationFailed(err),
        };
        if bytes.len() > chain.params.max_block_blob_size {
            return BlockVerification::VerificationFailed(LedgerError::ResourceExhaustion(
                "block blob is too big",
            ));
        }
        match Block::consensus_decode(bytes) {
            Ok(block) => chain.add_new_block(block),
            Err(err) => BlockVerification::VerificationFailed(LedgerError::MalformedInput(err)),
        }
    }

    pub fn handle_incoming_transaction(&self, bytes: &[u8]) -> TxVerification {
        match self.lock() {
            Ok(chain) => chain.handle_incoming_transaction(bytes),
            Err(err) => TxVerification::Rejected(err),
        }
    }

    pub fn block_count(&self) -> Result<u32, LedgerError> {
        Ok(self.lock()?.chain_len())
    }

    /// Height and id of the tail block.
    pub fn tail(&self) -> Result<(u32, Hash256), LedgerError> {
        let chain = self.lock()?;
        Ok((chain.chain_len().saturating_sub(1), chain.tail_hash()))
    }

    pub fn rollback_to(&self, height: u32) -> Result<u32, LedgerError> {
        self.lock()?.rollback_to(height)
    }

    pub fn block_ids(&self, start: u32, count: usize) -> Result<Vec<Hash256>, LedgerError> {
        Ok(self.lock()?.state.height_index.hash_range(start, count))
    }

    pub fn block_id_at(&self, height: u32) -> Result<Option<Hash256>, LedgerError> {
        Ok(self.lock()?.state.height_index.hash_at(height).ok())
    }

    pub fn build_sparse_chain(&self) -> Result<Vec<Hash256>, LedgerError> {
        let chain = self.lock()?;
        let tail = chain.chain_len().saturating_sub(1);
        Ok(chain.state.height_index.build_sparse_chain(tail))
    }

    /// Ids the remote side is missing, the local block count and the height
    /// of the first returned id. `remote_ids` is a sparse chain ending at
    /// genesis.
    pub fn find_blockchain_supplement(
        &self,
        remote_ids: &[Hash256],
        max_count: usize,
    ) -> Result<(Vec<Hash256>, u32, u32), LedgerError> {
        self.lock()?.find_blockchain_supplement(remote_ids, max_count)
    }

    pub fn have_block(&self, hash: &Hash256) -> Result<bool, LedgerError> {
        Ok(self.lock()?.have_block(hash))
    }

    pub fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, LedgerError> {
        self.lock()?.block_by_hash(hash)
    }

    pub fn block_height(&self, hash: &Hash256) -> Result<Option<u32>, LedgerError> {
        Ok(self.lock()?.state.height_index.height_of(hash))
    }

    pub fn block_timestamp(&self, height: u32) -> Result<Option<u64>, LedgerError> {
        Ok(self
            .lock()?
            .state
            .summaries
            .get(height as usize)
            .map(|summary| summary.timestamp))
    }

    pub fn block_summary(&self, height: u32) -> Result<Option<BlockSummary>, LedgerError> {
        Ok(self.lock()?.state.summaries.get(height as usize).copied())
    }

    pub fn difficulty_for_next_block(&self) -> Result<Difficulty, LedgerError> {
        self.lock()?.difficulty_for_next_block()
    }

    pub fn difficulty_at_height(&self, height: u32) -> Result<Option<Difficulty>, LedgerError> {
        Ok(self.lock()?.difficulty_at_height(height))
    }

    pub fn block_major_version_for_height(&self, height: u32) -> Result<u8, LedgerError> {
        Ok(self.lock()?.block_major_version_for_height(height))
    }

    /// Height of the last block allowed below `major_version`, if known.
    pub fn upgrade_height(&self, major_version: u8) -> Result<Option<u32>, LedgerError> {
        Ok(self
            .lock()?
            .upgrade_detectors
            .iter()
            .find(|detector| detector.target_version() == major_version)
            .map(UpgradeDetector::upgrade_height)
            .filter(|height| *height != ccx_consensus::UNDEF_HEIGHT))
    }

    pub fn coins_in_circulation(&self) -> Result<Amount, LedgerError> {
        Ok(self
            .lock()?
            .state
            .summaries
            .last()
            .map_or(0, |summary| summary.already_generated_coins))
    }

    pub fn deposit_amount_at(&self, height: u32) -> Result<Amount, LedgerError> {
        Ok(self.lock()?.state.deposits.amount_at(height))
    }

    pub fn deposit_interest_at(&self, height: u32) -> Result<Amount, LedgerError> {
        Ok(self.lock()?.state.deposits.interest_at(height))
    }

    /// Total amount locked in deposits at the tail.
    pub fn full_deposit_amount(&self) -> Result<Amount, LedgerError> {
        Ok(self.lock()?.state.deposits.full_deposit_amount())
    }

    pub fn is_in_checkpoint_zone(&self, height: u32) -> Result<bool, LedgerError> {
        Ok(self.lock()?.checkpoints.is_in_checkpoint_zone(height))
    }

    pub fn is_key_image_spent(&self, key_image: &KeyImage) -> Result<bool, LedgerError> {
        Ok(self.lock()?.state.key_images.contains(key_image))
    }

    pub fn transaction(&self, hash: &Hash256) -> Result<Option<Transaction>, LedgerError> {
        self.lock()?.transaction(hash)
    }

    pub fn global_output_indexes(&self, tx_hash: &Hash256) -> Result<Option<Vec<u32>>, LedgerError> {
        self.lock()?.global_output_indexes(tx_hash)
    }

    pub fn random_outputs_for_amount(
        &self,
        amount: Amount,
        count: usize,
    ) -> Result<Vec<RandomOutput>, LedgerError> {
        self.lock()?.random_outputs_for_amount(amount, count)
    }

    pub fn total_transactions(&self) -> Result<usize, LedgerError> {
        Ok(self.lock()?.state.transactions.len())
    }

    pub fn alternative_blocks_count(&self) -> Result<usize, LedgerError> {
        Ok(self.lock()?.alternative_chains.len())
    }

    pub fn current_cumulative_block_size_limit(&self) -> Result<usize, LedgerError> {
        Ok(self.lock()?.current_cumulative_block_size_limit())
    }

    /// Writes the index snapshot so the next open can skip the replay.
    pub fn save_cache(&self) -> Result<(), LedgerError> {
        self.lock()?.save_cache()
    }

    /// Deletes the persisted snapshot.
    pub fn discard_cache(&self) -> Result<(), LedgerError> {
        let chain = self.lock()?;
        cache::discard(chain.store.as_ref())?;
        Ok(())
    }

    pub fn metrics(&self) -> LedgerMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl TransactionValidator for Ledger {
    fn check_transaction_inputs(&self, tx: &Transaction) -> Result<BlockInfo, LedgerError> {
        let chain = self.lock()?;
        let skip_signatures = chain.checkpoints.is_in_checkpoint_zone(chain.chain_len());
        let height = chain.check_inputs(tx, None, skip_signatures)?;
        let id = chain
            .state
            .height_index
            .hash_at(height)
            .map_err(|_| LedgerError::Corrupt("referenced block is not indexed"))?;
        Ok(BlockInfo { height, id })
    }

    fn have_spent_key_images(&self, tx: &Transaction) -> bool {
        match self.lock() {
            Ok(chain) => chain.have_spent_key_images(tx),
            Err(_) => true,
        }
    }

    fn check_transaction_size(&self, blob_size: usize) -> bool {
        let Ok(chain) = self.lock() else {
            return false;
        };
        let limit = chain
            .current_cumulative_block_size_limit()
            .saturating_sub(chain.params.miner_tx_blob_reserved_size);
        if blob_size > limit {
            log_info!("transaction of {blob_size} bytes exceeds the size limit {limit}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccx_consensus::{consensus_params, Network};

    #[test]
    fn genesis_matches_network_parameters() {
        let params = consensus_params(Network::Regtest);
        let genesis = genesis_block(&params).expect("genesis");
        assert_eq!(genesis.header.timestamp, params.genesis_timestamp);
        assert_eq!(genesis.header.nonce, params.genesis_nonce);
        assert_eq!(genesis.coinbase_height(), Some(0));
    }

    #[test]
    fn deposit_changes_net_locks_and_withdrawals() {
        use ccx_primitives::{MultisignatureInput, MultisignatureOutput, TransactionOutput};

        let params = consensus_params(Network::Mainnet);
        let lock = Transaction {
            version: 2,
            unlock_time: 0,
            inputs: vec![],
            outputs: vec![
                TransactionOutput {
                    amount: 5_000,
                    target: OutputTarget::Multisignature(MultisignatureOutput {
                        keys: vec![[1u8; 32]],
                        required_signatures: 1,
                        term: params.deposit_min_term,
                    }),
                },
                TransactionOutput {
                    amount: 7,
                    target: OutputTarget::Multisignature(MultisignatureOutput {
                        keys: vec![[1u8; 32]],
                        required_signatures: 1,
                        term: 0,
                    }),
                },
            ],
            extra: vec![],
            signatures: vec![],
        };
        let withdraw = Transaction {
            version: 2,
            unlock_time: 0,
            inputs: vec![TransactionInput::Multisignature(MultisignatureInput {
                amount: 2_000,
                signature_count: 1,
                output_index: 0,
                term: params.deposit_min_term,
            })],
            outputs: vec![],
            extra: vec![],
            signatures: vec![vec![[0u8; 64]]],
        };
        let entries = vec![TransactionEntry::new(lock), TransactionEntry::new(withdraw)];
        let (delta, interest) = deposit_changes(&entries, 100, &params).expect("changes");
        assert_eq!(delta, 3_000);
        let expected = total_transaction_interest(
            [ccx_consensus::InputValue::Multisignature {
                amount: 2_000,
                term: params.deposit_min_term,
            }],
            100,
            &params,
        )
        .expect("interest");
        assert_eq!(interest, expected);
    }

    #[test]
    fn entry_cache_evicts_oldest() {
        let params = consensus_params(Network::Regtest);
        let block = genesis_block(&params).expect("genesis");
        let entry = Arc::new(BlockEntry {
            transactions: vec![TransactionEntry::new(block.base_transaction.clone())],
            block,
            height: 0,
            block_cumulative_size: 0,
            cumulative_difficulty: 1,
            already_generated_coins: 0,
        });
        let mut cache = EntryCache::new(2);
        cache.insert(1, Arc::clone(&entry));
        cache.insert(2, Arc::clone(&entry));
        cache.insert(3, Arc::clone(&entry));
        assert!(cache.get(1).is_none());
        assert!(cache.get(3).is_some());
        cache.remove(3);
        assert!(cache.get(3).is_none());
        assert_eq!(cache.order, VecDeque::from(vec![2]));

        let mut disabled = EntryCache::new(0);
        disabled.insert(1, entry);
        assert!(disabled.get(1).is_none());
    }

    #[test]
    fn block_verification_predicates() {
        assert!(BlockVerification::AddedToMainChain.is_added());
        assert!(BlockVerification::AddedToAlternativeChain { switched: false }.is_added());
        assert!(!BlockVerification::Orphan.is_added());
        assert!(BlockVerification::VerificationFailed(LedgerError::Orphan).is_failed());
    }
}
