//! Cumulative locked-deposit amount and paid interest by height.
//!
//! Entries are only written for blocks that change the locked amount, so
//! lookups resolve to the nearest entry at or below the queried height.

use ccx_consensus::money::Amount;
use ccx_primitives::encoding::{Decoder, Encoder};
use ccx_primitives::DecodeError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepositError {
    AmountOverflow,
    NegativeAmount,
    InterestOverflow,
    HeightOverflow,
}

impl std::fmt::Display for DepositError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepositError::AmountOverflow => write!(f, "deposit amount overflow"),
            DepositError::NegativeAmount => write!(f, "deposit amount below zero"),
            DepositError::InterestOverflow => write!(f, "deposit interest overflow"),
            DepositError::HeightOverflow => write!(f, "deposit ledger height overflow"),
        }
    }
}

impl std::error::Error for DepositError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DepositEntry {
    pub height: u32,
    pub amount: Amount,
    pub interest: Amount,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DepositLedger {
    entries: Vec<DepositEntry>,
    block_count: u32,
}

impl DepositLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(expected_blocks: usize) -> Self {
        Self {
            entries: Vec::with_capacity(expected_blocks),
            block_count: 0,
        }
    }

    /// Records one block. An entry is appended only when `delta_amount` is
    /// nonzero; the block count advances either way. On error nothing changes.
    pub fn push(&mut self, delta_amount: i64, delta_interest: Amount) -> Result<(), DepositError> {
        let next_count = self
            .block_count
            .checked_add(1)
            .ok_or(DepositError::HeightOverflow)?;
        if delta_amount != 0 {
            let amount = self.full_deposit_amount();
            let amount = if delta_amount > 0 {
                amount
                    .checked_add(delta_amount.unsigned_abs())
                    .ok_or(DepositError::AmountOverflow)?
            } else {
                amount
                    .checked_sub(delta_amount.unsigned_abs())
                    .ok_or(DepositError::NegativeAmount)?
            };
            let interest = self
                .full_interest_amount()
                .checked_add(delta_interest)
                .ok_or(DepositError::InterestOverflow)?;
            self.entries.push(DepositEntry {
                height: self.block_count,
                amount,
                interest,
            });
        }
        self.block_count = next_count;
        Ok(())
    }

    pub fn pop(&mut self) {
        if self.block_count == 0 {
            return;
        }
        self.block_count -= 1;
        if self
            .entries
            .last()
            .is_some_and(|entry| entry.height == self.block_count)
        {
            self.entries.pop();
        }
    }

    /// Drops every block at or above `from`. Returns the number of blocks
    /// removed.
    pub fn pop_through(&mut self, from: u32) -> u32 {
        if from >= self.block_count {
            return 0;
        }
        let keep = self.entries.partition_point(|entry| entry.height < from);
        self.entries.truncate(keep);
        let removed = self.block_count - from;
        self.block_count = from;
        removed
    }

    fn entry_at(&self, height: u32) -> Option<&DepositEntry> {
        let upper = self.entries.partition_point(|entry| entry.height <= height);
        upper.checked_sub(1).map(|index| &self.entries[index])
    }

    pub fn amount_at(&self, height: u32) -> Amount {
        self.entry_at(height).map_or(0, |entry| entry.amount)
    }

    pub fn interest_at(&self, height: u32) -> Amount {
        self.entry_at(height).map_or(0, |entry| entry.interest)
    }

    pub fn full_deposit_amount(&self) -> Amount {
        self.entries.last().map_or(0, |entry| entry.amount)
    }

    pub fn full_interest_amount(&self) -> Amount {
        self.entries.last().map_or(0, |entry| entry.interest)
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn entries(&self) -> &[DepositEntry] {
        &self.entries
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(u64::from(self.block_count));
        encoder.write_varint(self.entries.len() as u64);
        for entry in &self.entries {
            encoder.write_varint(u64::from(entry.height));
            encoder.write_varint(entry.amount);
            encoder.write_varint(entry.interest);
        }
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let block_count = decoder.read_varint_u32()?;
        let count = decoder.read_count()?;
        let mut entries: Vec<DepositEntry> = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = DepositEntry {
                height: decoder.read_varint_u32()?,
                amount: decoder.read_varint()?,
                interest: decoder.read_varint()?,
            };
            if entry.height >= block_count
                || entries.last().is_some_and(|last| last.height >= entry.height)
            {
                return Err(DecodeError::InvalidData("deposit entries out of order"));
            }
            entries.push(entry);
        }
        Ok(Self {
            entries,
            block_count,
        })
    }
}
