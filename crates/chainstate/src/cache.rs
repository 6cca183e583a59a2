//! Persisted snapshot of the derived ledger indices.
//!
//! The record lives in [`Column::Meta`] under [`CACHE_KEY`]: a SHA-256 of the
//! payload followed by the payload itself. The payload opens with a format
//! version and the block count and tail hash it was taken at, so a snapshot
//! that no longer matches the block log can be rejected before the indices
//! are decoded.

use std::collections::HashMap;

use ccx_consensus::Hash256;
use ccx_primitives::encoding::{Decoder, Encoder};
use ccx_primitives::{DecodeError, NULL_HASH};
use ccx_storage::{Column, KeyValueStore, StoreError};
use sha2::{Digest, Sha256};

use crate::blockchain::{BlockSummary, LedgerState};
use crate::deposits::DepositLedger;
use crate::height_index::HeightIndex;
use crate::outputs::{KeyImageSet, KeyOutputIndex, MultisignatureOutputIndex, TransactionIndex};

pub const CACHE_KEY: &[u8] = b"ledger_cache";

const CACHE_FORMAT_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug)]
pub enum CacheError {
    Store(StoreError),
    Checksum,
    Version(u8),
    Decode(DecodeError),
    Inconsistent(&'static str),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Store(err) => write!(f, "{err}"),
            CacheError::Checksum => write!(f, "ledger cache checksum mismatch"),
            CacheError::Version(version) => write!(f, "unknown ledger cache version {version}"),
            CacheError::Decode(err) => write!(f, "ledger cache decode failed: {err}"),
            CacheError::Inconsistent(message) => write!(f, "inconsistent ledger cache: {message}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Store(err)
    }
}

impl From<DecodeError> for CacheError {
    fn from(err: DecodeError) -> Self {
        CacheError::Decode(err)
    }
}

/// Decoded snapshot. `voting_heights` pairs each upgrade target with the
/// voting-complete height its detector had reached.
#[derive(Debug)]
pub(crate) struct CachedLedger {
    pub(crate) block_count: u32,
    pub(crate) tail: Hash256,
    pub(crate) state: LedgerState,
    pub(crate) voting_heights: Vec<(u8, u32)>,
}

pub(crate) fn encode(state: &LedgerState, voting_heights: &[(u8, u32)]) -> Vec<u8> {
    let mut payload = Encoder::with_capacity(64 * 1024);
    payload.write_u8(CACHE_FORMAT_VERSION);
    payload.write_u32_le(state.height_index.len());
    payload.write_hash(&state.height_index.tail().unwrap_or(NULL_HASH));

    state.height_index.encode(&mut payload);
    payload.write_varint(state.summaries.len() as u64);
    for summary in &state.summaries {
        encode_summary(summary, &mut payload);
    }
    state.key_images.encode(&mut payload);
    state.key_outputs.encode(&mut payload);
    state.multisig_outputs.encode(&mut payload);

    let mut transactions: Vec<(&Hash256, &TransactionIndex)> = state.transactions.iter().collect();
    transactions.sort_unstable_by_key(|(_, index)| **index);
    payload.write_varint(transactions.len() as u64);
    for (hash, index) in transactions {
        payload.write_hash(hash);
        index.encode(&mut payload);
    }

    state.deposits.encode(&mut payload);

    payload.write_varint(voting_heights.len() as u64);
    for (target, height) in voting_heights {
        payload.write_u8(*target);
        payload.write_u32_le(*height);
    }

    let payload = payload.into_inner();
    let mut record = Vec::with_capacity(CHECKSUM_LEN + payload.len());
    record.extend_from_slice(&Sha256::digest(&payload));
    record.extend_from_slice(&payload);
    record
}

pub(crate) fn decode(record: &[u8]) -> Result<CachedLedger, CacheError> {
    if record.len() < CHECKSUM_LEN {
        return Err(CacheError::Checksum);
    }
    let (checksum, payload) = record.split_at(CHECKSUM_LEN);
    if Sha256::digest(payload).as_slice() != checksum {
        return Err(CacheError::Checksum);
    }

    let mut decoder = Decoder::new(payload);
    let version = decoder.read_u8()?;
    if version != CACHE_FORMAT_VERSION {
        return Err(CacheError::Version(version));
    }
    let block_count = decoder.read_u32_le()?;
    let tail = decoder.read_hash()?;

    let height_index = HeightIndex::decode(&mut decoder)?;
    if height_index.len() != block_count || height_index.tail().unwrap_or(NULL_HASH) != tail {
        return Err(CacheError::Inconsistent("height index disagrees with recorded tail"));
    }

    let summary_count = decoder.read_count()?;
    if summary_count != block_count as usize {
        return Err(CacheError::Inconsistent("block summary count"));
    }
    let mut summaries = Vec::with_capacity(summary_count);
    for height in 0..block_count {
        let hash = height_index
            .hash_at(height)
            .map_err(|_| CacheError::Inconsistent("block summary without id"))?;
        summaries.push(decode_summary(hash, &mut decoder)?);
    }

    let key_images = KeyImageSet::decode(&mut decoder)?;
    let key_outputs = KeyOutputIndex::decode(&mut decoder)?;
    let multisig_outputs = MultisignatureOutputIndex::decode(&mut decoder)?;

    let transaction_count = decoder.read_count()?;
    let mut transactions = HashMap::with_capacity(transaction_count);
    for _ in 0..transaction_count {
        let hash = decoder.read_hash()?;
        let index = TransactionIndex::decode(&mut decoder)?;
        if index.block >= block_count || transactions.insert(hash, index).is_some() {
            return Err(CacheError::Inconsistent("transaction map"));
        }
    }

    let deposits = DepositLedger::decode(&mut decoder)?;
    if deposits.block_count() != block_count {
        return Err(CacheError::Inconsistent("deposit ledger block count"));
    }

    let detector_count = decoder.read_count()?;
    let mut voting_heights = Vec::with_capacity(detector_count);
    for _ in 0..detector_count {
        voting_heights.push((decoder.read_u8()?, decoder.read_u32_le()?));
    }
    if !decoder.is_empty() {
        return Err(CacheError::Decode(DecodeError::TrailingBytes));
    }

    Ok(CachedLedger {
        block_count,
        tail,
        state: LedgerState {
            height_index,
            summaries,
            key_images,
            key_outputs,
            multisig_outputs,
            transactions,
            deposits,
        },
        voting_heights,
    })
}

pub(crate) fn load<S: KeyValueStore + ?Sized>(store: &S) -> Result<Option<CachedLedger>, CacheError> {
    match store.get(Column::Meta, CACHE_KEY)? {
        None => Ok(None),
        Some(record) => decode(&record).map(Some),
    }
}

pub(crate) fn save<S: KeyValueStore + ?Sized>(store: &S, record: &[u8]) -> Result<(), StoreError> {
    store.put(Column::Meta, CACHE_KEY, record)
}

pub(crate) fn discard<S: KeyValueStore + ?Sized>(store: &S) -> Result<(), StoreError> {
    store.delete(Column::Meta, CACHE_KEY)
}

fn encode_summary(summary: &BlockSummary, encoder: &mut Encoder) {
    encoder.write_u64_le(summary.timestamp);
    encoder.write_u8(summary.major_version);
    encoder.write_u8(summary.minor_version);
    encoder.write_varint(summary.block_size as u64);
    encoder.write_varint(summary.cumulative_difficulty);
    encoder.write_varint(summary.already_generated_coins);
    encoder.write_varint(u64::from(summary.transaction_count));
}

fn decode_summary(hash: Hash256, decoder: &mut Decoder) -> Result<BlockSummary, DecodeError> {
    Ok(BlockSummary {
        hash,
        timestamp: decoder.read_u64_le()?,
        major_version: decoder.read_u8()?,
        minor_version: decoder.read_u8()?,
        block_size: usize::try_from(decoder.read_varint()?).map_err(|_| DecodeError::VarIntOverflow)?,
        cumulative_difficulty: decoder.read_varint()?,
        already_generated_coins: decoder.read_varint()?,
        transaction_count: decoder.read_varint_u32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::OutputReference;
    use ccx_storage::memory::MemoryStore;

    fn sample_state() -> LedgerState {
        let mut state = LedgerState::default();
        for height in 0..3u32 {
            let hash = [height as u8 + 1; 32];
            state.height_index.append(hash);
            state.summaries.push(BlockSummary {
                hash,
                timestamp: 1_000 + u64::from(height) * 120,
                major_version: 1,
                minor_version: 0,
                block_size: 100,
                cumulative_difficulty: u64::from(height) + 1,
                already_generated_coins: 5_000 * (u64::from(height) + 1),
                transaction_count: 1,
            });
            let transaction = TransactionIndex {
                block: height,
                transaction: 0,
            };
            state.transactions.insert([0x80 | height as u8; 32], transaction);
            state.key_outputs.push(
                5_000,
                OutputReference {
                    transaction,
                    output: 0,
                },
            );
            state.deposits.push(0, 0).expect("deposit push");
        }
        state.key_images.insert([9u8; 32], 2);
        state.multisig_outputs.push(1_000, TransactionIndex { block: 1, transaction: 0 }, 0);
        state
    }

    #[test]
    fn snapshot_round_trips() {
        let state = sample_state();
        let record = encode(&state, &[(2, 7), (3, ccx_consensus::UNDEF_HEIGHT)]);
        let cached = decode(&record).expect("decode");
        assert_eq!(cached.block_count, 3);
        assert_eq!(cached.tail, [3u8; 32]);
        assert_eq!(cached.state, state);
        assert_eq!(cached.voting_heights, vec![(2, 7), (3, ccx_consensus::UNDEF_HEIGHT)]);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut record = encode(&sample_state(), &[]);
        let last = record.len() - 1;
        record[last] ^= 0x01;
        assert!(matches!(decode(&record), Err(CacheError::Checksum)));
        assert!(matches!(decode(&record[..10]), Err(CacheError::Checksum)));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let record = encode(&sample_state(), &[]);
        let mut payload = record[CHECKSUM_LEN..].to_vec();
        payload[0] = CACHE_FORMAT_VERSION + 1;
        let mut forged = Sha256::digest(&payload).to_vec();
        forged.extend_from_slice(&payload);
        assert!(matches!(decode(&forged), Err(CacheError::Version(2))));
    }

    #[test]
    fn store_round_trip() {
        let store = MemoryStore::new();
        assert!(load(&store).expect("empty load").is_none());
        save(&store, &encode(&sample_state(), &[])).expect("save");
        let cached = load(&store).expect("load").expect("cached");
        assert_eq!(cached.state.summaries.len(), 3);
        discard(&store).expect("discard");
        assert!(load(&store).expect("load after discard").is_none());
    }
}
