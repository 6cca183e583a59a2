//! Block header and block types.

use ccx_consensus::constants::BLOCK_MAJOR_VERSION_8;
use ccx_consensus::Hash256;

use crate::encoding::{varint_len, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{fast_hash, tree_hash};
use crate::transaction::{Transaction, TransactionInput};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub prev_hash: Hash256,
    pub nonce: u32,
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(u64::from(self.major_version));
        encoder.write_varint(u64::from(self.minor_version));
        encoder.write_varint(self.timestamp);
        encoder.write_hash(&self.prev_hash);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let major_version = decoder.read_varint_u8()?;
        if major_version > BLOCK_MAJOR_VERSION_8 {
            return Err(DecodeError::InvalidData("unsupported block major version"));
        }
        Ok(Self {
            major_version,
            minor_version: decoder.read_varint_u8()?,
            timestamp: decoder.read_varint()?,
            prev_hash: decoder.read_hash()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash256>,
}

impl Block {
    pub fn consensus_encode(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    /// Root over the coinbase hash followed by the included transaction hashes.
    pub fn transactions_root(&self) -> Hash256 {
        let mut leaves = Vec::with_capacity(self.transaction_hashes.len() + 1);
        leaves.push(self.base_transaction.hash());
        leaves.extend_from_slice(&self.transaction_hashes);
        tree_hash(&leaves)
    }

    /// `header || transactions_root || varint(1 + tx count)`; also the input
    /// of the proof-of-work hash.
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(128);
        self.header.consensus_encode(&mut encoder);
        encoder.write_hash(&self.transactions_root());
        encoder.write_varint(self.transaction_hashes.len() as u64 + 1);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash256 {
        let blob = self.hashing_blob();
        let mut encoder = Encoder::with_capacity(blob.len() + varint_len(blob.len() as u64));
        encoder.write_var_bytes(&blob);
        fast_hash(&encoder.into_inner())
    }

    /// Height claimed by the coinbase input, if the coinbase is well formed.
    pub fn coinbase_height(&self) -> Option<u32> {
        match self.base_transaction.inputs.as_slice() {
            [TransactionInput::Base { block_index }] => Some(*block_index),
            _ => None,
        }
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        Encodable::consensus_encode(&self.base_transaction, encoder);
        encoder.write_varint(self.transaction_hashes.len() as u64);
        for hash in &self.transaction_hashes {
            encoder.write_hash(hash);
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let base_transaction = <Transaction as Decodable>::consensus_decode(decoder)?;
        let count = decoder.read_count()?;
        let mut transaction_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            transaction_hashes.push(decoder.read_hash()?);
        }
        Ok(Self {
            header,
            base_transaction,
            transaction_hashes,
        })
    }
}
