//! Spent key images and the global output lists that ring members and
//! multisignature spends refer to.

use std::collections::{BTreeMap, HashMap};

use ccx_consensus::money::Amount;
use ccx_primitives::encoding::{Decoder, Encoder};
use ccx_primitives::{DecodeError, KeyImage};

/// Locator of a committed transaction: block height and slot in the block.
/// Slot 0 is the coinbase.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TransactionIndex {
    pub block: u32,
    pub transaction: u16,
}

impl TransactionIndex {
    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(u64::from(self.block));
        encoder.write_varint(u64::from(self.transaction));
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let block = decoder.read_varint_u32()?;
        let transaction = u16::try_from(decoder.read_varint()?)
            .map_err(|_| DecodeError::InvalidData("transaction slot out of range"))?;
        Ok(Self { block, transaction })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputReference {
    pub transaction: TransactionIndex,
    pub output: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MultisignatureOutputUsage {
    pub transaction_index: TransactionIndex,
    pub output_index: u16,
    pub is_used: bool,
}

fn read_output_slot(decoder: &mut Decoder) -> Result<u16, DecodeError> {
    u16::try_from(decoder.read_varint()?)
        .map_err(|_| DecodeError::InvalidData("output slot out of range"))
}

/// Key outputs grouped by amount; the position in a bucket is the output's
/// global index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyOutputIndex {
    buckets: BTreeMap<Amount, Vec<OutputReference>>,
}

impl KeyOutputIndex {
    pub fn push(&mut self, amount: Amount, reference: OutputReference) -> u32 {
        let bucket = self.buckets.entry(amount).or_default();
        bucket.push(reference);
        (bucket.len() - 1) as u32
    }

    pub fn pop(&mut self, amount: Amount) -> Option<OutputReference> {
        let bucket = self.buckets.get_mut(&amount)?;
        let reference = bucket.pop();
        if bucket.is_empty() {
            self.buckets.remove(&amount);
        }
        reference
    }

    pub fn get(&self, amount: Amount, global_index: u32) -> Option<OutputReference> {
        self.buckets
            .get(&amount)?
            .get(global_index as usize)
            .copied()
    }

    pub fn count(&self, amount: Amount) -> usize {
        self.buckets.get(&amount).map_or(0, Vec::len)
    }

    pub fn bucket(&self, amount: Amount) -> &[OutputReference] {
        self.buckets.get(&amount).map_or(&[], Vec::as_slice)
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.buckets.len() as u64);
        for (amount, bucket) in &self.buckets {
            encoder.write_varint(*amount);
            encoder.write_varint(bucket.len() as u64);
            for reference in bucket {
                reference.transaction.encode(encoder);
                encoder.write_varint(u64::from(reference.output));
            }
        }
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let mut buckets = BTreeMap::new();
        for _ in 0..decoder.read_count()? {
            let amount = decoder.read_varint()?;
            let count = decoder.read_count()?;
            let mut bucket = Vec::with_capacity(count);
            for _ in 0..count {
                bucket.push(OutputReference {
                    transaction: TransactionIndex::decode(decoder)?,
                    output: read_output_slot(decoder)?,
                });
            }
            buckets.insert(amount, bucket);
        }
        Ok(Self { buckets })
    }
}

/// Multisignature outputs grouped by amount, with their spent flag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MultisignatureOutputIndex {
    buckets: BTreeMap<Amount, Vec<MultisignatureOutputUsage>>,
}

impl MultisignatureOutputIndex {
    pub fn push(&mut self, amount: Amount, transaction_index: TransactionIndex, output_index: u16) -> u32 {
        let bucket = self.buckets.entry(amount).or_default();
        bucket.push(MultisignatureOutputUsage {
            transaction_index,
            output_index,
            is_used: false,
        });
        (bucket.len() - 1) as u32
    }

    pub fn pop(&mut self, amount: Amount) -> Option<MultisignatureOutputUsage> {
        let bucket = self.buckets.get_mut(&amount)?;
        let usage = bucket.pop();
        if bucket.is_empty() {
            self.buckets.remove(&amount);
        }
        usage
    }

    pub fn get(&self, amount: Amount, global_index: u32) -> Option<MultisignatureOutputUsage> {
        self.buckets
            .get(&amount)?
            .get(global_index as usize)
            .copied()
    }

    /// Flips the spent flag. Returns false if the output does not exist or
    /// already has the requested state.
    pub fn set_used(&mut self, amount: Amount, global_index: u32, used: bool) -> bool {
        let Some(usage) = self
            .buckets
            .get_mut(&amount)
            .and_then(|bucket| bucket.get_mut(global_index as usize))
        else {
            return false;
        };
        if usage.is_used == used {
            return false;
        }
        usage.is_used = used;
        true
    }

    pub fn count(&self, amount: Amount) -> usize {
        self.buckets.get(&amount).map_or(0, Vec::len)
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.buckets.len() as u64);
        for (amount, bucket) in &self.buckets {
            encoder.write_varint(*amount);
            encoder.write_varint(bucket.len() as u64);
            for usage in bucket {
                usage.transaction_index.encode(encoder);
                encoder.write_varint(u64::from(usage.output_index));
                encoder.write_u8(u8::from(usage.is_used));
            }
        }
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let mut buckets = BTreeMap::new();
        for _ in 0..decoder.read_count()? {
            let amount = decoder.read_varint()?;
            let count = decoder.read_count()?;
            let mut bucket = Vec::with_capacity(count);
            for _ in 0..count {
                let transaction_index = TransactionIndex::decode(decoder)?;
                let output_index = read_output_slot(decoder)?;
                let is_used = match decoder.read_u8()? {
                    0 => false,
                    1 => true,
                    _ => return Err(DecodeError::InvalidData("invalid used flag")),
                };
                bucket.push(MultisignatureOutputUsage {
                    transaction_index,
                    output_index,
                    is_used,
                });
            }
            buckets.insert(amount, bucket);
        }
        Ok(Self { buckets })
    }
}

/// Key images spent on the main chain, with the height that spent them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyImageSet {
    spent: HashMap<KeyImage, u32>,
}

impl KeyImageSet {
    /// Returns false if the image is already spent.
    pub fn insert(&mut self, key_image: KeyImage, height: u32) -> bool {
        match self.spent.entry(key_image) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(height);
                true
            }
        }
    }

    pub fn remove(&mut self, key_image: &KeyImage) -> bool {
        self.spent.remove(key_image).is_some()
    }

    pub fn contains(&self, key_image: &KeyImage) -> bool {
        self.spent.contains_key(key_image)
    }

    pub fn spent_height(&self, key_image: &KeyImage) -> Option<u32> {
        self.spent.get(key_image).copied()
    }

    pub fn len(&self) -> usize {
        self.spent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        let mut images: Vec<(&KeyImage, &u32)> = self.spent.iter().collect();
        images.sort_unstable();
        encoder.write_varint(images.len() as u64);
        for (image, height) in images {
            encoder.write_hash(image);
            encoder.write_varint(u64::from(*height));
        }
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let count = decoder.read_count()?;
        let mut set = Self {
            spent: HashMap::with_capacity(count),
        };
        for _ in 0..count {
            let image = decoder.read_hash()?;
            let height = decoder.read_varint_u32()?;
            if !set.insert(image, height) {
                return Err(DecodeError::InvalidData("duplicate key image"));
            }
        }
        Ok(set)
    }
}
