//! Bidirectional height <-> block id index for the main chain.

use std::collections::HashMap;

use ccx_consensus::Hash256;
use ccx_primitives::encoding::{Decoder, Encoder};
use ccx_primitives::DecodeError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeightOutOfRange {
    pub height: u32,
    pub len: u32,
}

impl std::fmt::Display for HeightOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "height {} out of range (chain length {})", self.height, self.len)
    }
}

impl std::error::Error for HeightOutOfRange {}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HeightIndex {
    hashes: Vec<Hash256>,
    heights: HashMap<Hash256, u32>,
}

impl HeightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hash` at the next height. Returns false, leaving the index
    /// unchanged, when the hash is already indexed.
    pub fn append(&mut self, hash: Hash256) -> bool {
        let height = self.hashes.len() as u32;
        if self.heights.contains_key(&hash) {
            return false;
        }
        self.heights.insert(hash, height);
        self.hashes.push(hash);
        true
    }

    pub fn pop(&mut self) -> Option<Hash256> {
        let hash = self.hashes.pop()?;
        self.heights.remove(&hash);
        Some(hash)
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
        self.heights.clear();
    }

    pub fn len(&self) -> u32 {
        self.hashes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.heights.contains_key(hash)
    }

    pub fn height_of(&self, hash: &Hash256) -> Option<u32> {
        self.heights.get(hash).copied()
    }

    pub fn hash_at(&self, height: u32) -> Result<Hash256, HeightOutOfRange> {
        self.hashes
            .get(height as usize)
            .copied()
            .ok_or(HeightOutOfRange {
                height,
                len: self.len(),
            })
    }

    pub fn tail(&self) -> Option<Hash256> {
        self.hashes.last().copied()
    }

    /// Up to `max_count` ids starting at `start`.
    pub fn hash_range(&self, start: u32, max_count: usize) -> Vec<Hash256> {
        let start = (start as usize).min(self.hashes.len());
        let end = start.saturating_add(max_count).min(self.hashes.len());
        self.hashes[start..end].to_vec()
    }

    /// Ids at `from`, `from - 1`, `from - 3`, `from - 7`, ... walking back
    /// with doubling steps, always ending with the genesis id.
    pub fn build_sparse_chain(&self, from: u32) -> Vec<Hash256> {
        if self.hashes.is_empty() {
            return Vec::new();
        }
        let end = (from as usize).min(self.hashes.len() - 1) + 1;
        let mut ids = Vec::new();
        let mut step = 1usize;
        while step <= end {
            ids.push(self.hashes[end - step]);
            step *= 2;
        }
        if ids.last() != self.hashes.first() {
            ids.push(self.hashes[0]);
        }
        ids
    }

    /// Height of the first id in `ids` this index knows.
    pub fn find_supplement(&self, ids: &[Hash256]) -> Option<u32> {
        ids.iter().find_map(|id| self.height_of(id))
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.hashes.len() as u64);
        for hash in &self.hashes {
            encoder.write_hash(hash);
        }
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let count = decoder.read_count()?;
        let mut index = Self {
            hashes: Vec::with_capacity(count),
            heights: HashMap::with_capacity(count),
        };
        for _ in 0..count {
            if !index.append(decoder.read_hash()?) {
                return Err(DecodeError::InvalidData("duplicate block id in height index"));
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> Hash256 {
        let mut hash = [0u8; 32];
        hash[..4].copy_from_slice(&n.to_le_bytes());
        hash[31] = 0xaa;
        hash
    }

    fn index_of(len: u32) -> HeightIndex {
        let mut index = HeightIndex::new();
        for n in 0..len {
            assert!(index.append(id(n)));
        }
        index
    }

    #[test]
    fn append_rejects_known_hash() {
        let mut index = index_of(3);
        assert!(!index.append(id(1)));
        assert_eq!(index.len(), 3);
        assert_eq!(index.height_of(&id(2)), Some(2));
        assert_eq!(index.tail(), Some(id(2)));
    }

    #[test]
    fn pop_forgets_tail() {
        let mut index = index_of(3);
        assert_eq!(index.pop(), Some(id(2)));
        assert!(!index.contains(&id(2)));
        assert_eq!(index.len(), 2);
        assert!(index.append(id(2)));
    }

    #[test]
    fn hash_at_reports_out_of_range() {
        let index = index_of(2);
        assert_eq!(index.hash_at(1), Ok(id(1)));
        assert_eq!(index.hash_at(2), Err(HeightOutOfRange { height: 2, len: 2 }));
    }

    #[test]
    fn hash_range_clamps_to_chain() {
        let index = index_of(5);
        assert_eq!(index.hash_range(3, 10), vec![id(3), id(4)]);
        assert_eq!(index.hash_range(1, 2), vec![id(1), id(2)]);
        assert!(index.hash_range(9, 2).is_empty());
    }

    #[test]
    fn sparse_chain_doubles_back_to_genesis() {
        let index = index_of(20);
        let heights: Vec<u32> = index
            .build_sparse_chain(19)
            .iter()
            .map(|hash| index.height_of(hash).expect("indexed"))
            .collect();
        assert_eq!(heights, vec![19, 18, 16, 12, 4, 0]);

        let heights: Vec<u32> = index
            .build_sparse_chain(15)
            .iter()
            .map(|hash| index.height_of(hash).expect("indexed"))
            .collect();
        assert_eq!(heights, vec![15, 14, 12, 8, 0]);

        assert_eq!(index_of(1).build_sparse_chain(0), vec![id(0)]);
        assert!(HeightIndex::new().build_sparse_chain(0).is_empty());
    }

    #[test]
    fn supplement_uses_first_known_id() {
        let index = index_of(10);
        let unknown = [0xffu8; 32];
        assert_eq!(index.find_supplement(&[unknown, id(7), id(3)]), Some(7));
        assert_eq!(index.find_supplement(&[unknown]), None);
    }

    #[test]
    fn encoding_restores_lookups() {
        let index = index_of(4);
        let mut encoder = Encoder::new();
        index.encode(&mut encoder);
        let bytes = encoder.into_inner();
        let decoded = HeightIndex::decode(&mut Decoder::new(&bytes)).expect("decode");
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.height_of(&id(3)), Some(3));
    }
}
