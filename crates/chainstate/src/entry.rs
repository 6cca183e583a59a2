//! Main-chain block records as stored in the block log.

use ccx_consensus::money::Amount;
use ccx_consensus::Hash256;
use ccx_pow::difficulty::Difficulty;
use ccx_primitives::encoding::{Decodable, Decoder, Encodable, Encoder};
use ccx_primitives::{Block, DecodeError, Transaction};
use smallvec::SmallVec;

const ENTRY_FORMAT_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionEntry {
    pub tx: Transaction,
    /// Global index of each output within its amount (or multisignature)
    /// list, in output order.
    pub global_output_indexes: SmallVec<[u32; 4]>,
}

impl TransactionEntry {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            global_output_indexes: SmallVec::new(),
        }
    }
}

/// A block as committed to the main chain. `transactions[0]` is the coinbase;
/// the rest follow `block.transaction_hashes` order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEntry {
    pub block: Block,
    pub height: u32,
    pub block_cumulative_size: usize,
    pub cumulative_difficulty: Difficulty,
    pub already_generated_coins: Amount,
    pub transactions: Vec<TransactionEntry>,
}

impl BlockEntry {
    pub fn hash(&self) -> Hash256 {
        self.block.hash()
    }

    pub fn timestamp(&self) -> u64 {
        self.block.header.timestamp
    }

    /// Serialized record. The coinbase is stored once, inside the block.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(512);
        encoder.write_u8(ENTRY_FORMAT_VERSION);
        Encodable::consensus_encode(&self.block, &mut encoder);
        encoder.write_varint(u64::from(self.height));
        encoder.write_varint(self.block_cumulative_size as u64);
        encoder.write_varint(self.cumulative_difficulty);
        encoder.write_varint(self.already_generated_coins);
        encoder.write_varint(self.transactions.len() as u64);
        for (slot, entry) in self.transactions.iter().enumerate() {
            if slot > 0 {
                Encodable::consensus_encode(&entry.tx, &mut encoder);
            }
            encoder.write_varint(entry.global_output_indexes.len() as u64);
            for index in &entry.global_output_indexes {
                encoder.write_varint(u64::from(*index));
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_u8()? != ENTRY_FORMAT_VERSION {
            return Err(DecodeError::InvalidData("unknown block entry version"));
        }
        let block = <Block as Decodable>::consensus_decode(&mut decoder)?;
        let height = decoder.read_varint_u32()?;
        let block_cumulative_size = usize::try_from(decoder.read_varint()?)
            .map_err(|_| DecodeError::VarIntOverflow)?;
        let cumulative_difficulty = decoder.read_varint()?;
        let already_generated_coins = decoder.read_varint()?;

        let count = decoder.read_count()?;
        if count != block.transaction_hashes.len() + 1 {
            return Err(DecodeError::InvalidData("block entry transaction count mismatch"));
        }
        let mut transactions = Vec::with_capacity(count);
        for slot in 0..count {
            let tx = if slot == 0 {
                block.base_transaction.clone()
            } else {
                <Transaction as Decodable>::consensus_decode(&mut decoder)?
            };
            let index_count = decoder.read_count()?;
            if index_count != tx.outputs.len() {
                return Err(DecodeError::InvalidData("global output index count mismatch"));
            }
            let mut global_output_indexes = SmallVec::with_capacity(index_count);
            for _ in 0..index_count {
                global_output_indexes.push(decoder.read_varint_u32()?);
            }
            transactions.push(TransactionEntry {
                tx,
                global_output_indexes,
            });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            block,
            height,
            block_cumulative_size,
            cumulative_difficulty,
            already_generated_coins,
            transactions,
        })
    }
}
