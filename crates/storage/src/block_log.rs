//! Append-only log of committed block records.
//!
//! The ledger treats the log as an ordered, height-indexed sequence of opaque
//! records. Records are appended when a block is committed to the main chain
//! and truncated when blocks are popped.

use std::sync::Mutex;

use crate::{Column, KeyValueStore, StoreError, WriteBatch};

const LENGTH_KEY: &[u8] = b"block_log_len";

pub trait BlockLog: Send + Sync {
    fn len(&self) -> Result<u32, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn get(&self, height: u32) -> Result<Option<Vec<u8>>, StoreError>;

    /// Appends a record and returns its height.
    fn append(&self, record: &[u8]) -> Result<u32, StoreError>;

    /// Removes every record at or above `height`.
    fn truncate_from(&self, height: u32) -> Result<(), StoreError>;
}

/// [`BlockLog`] over any [`KeyValueStore`]. Records live in
/// [`Column::BlockLog`] under big-endian heights and the length is kept in
/// [`Column::Meta`] so both change in one batch.
pub struct KvBlockLog<S> {
    store: S,
    len: Mutex<u32>,
}

impl<S: KeyValueStore> KvBlockLog<S> {
    pub fn open(store: S) -> Result<Self, StoreError> {
        let len = match store.get(Column::Meta, LENGTH_KEY)? {
            None => 0,
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("block log length"))?;
                u32::from_le_bytes(bytes)
            }
        };
        Ok(Self {
            store,
            len: Mutex::new(len),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> BlockLog for KvBlockLog<S> {
    fn len(&self) -> Result<u32, StoreError> {
        let guard = self.len.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(*guard)
    }

    fn get(&self, height: u32) -> Result<Option<Vec<u8>>, StoreError> {
        if height >= self.len()? {
            return Ok(None);
        }
        self.store.get(Column::BlockLog, &height.to_be_bytes())
    }

    fn append(&self, record: &[u8]) -> Result<u32, StoreError> {
        let mut guard = self.len.lock().map_err(|_| StoreError::Poisoned)?;
        let height = *guard;
        let next = height
            .checked_add(1)
            .ok_or(StoreError::Corrupt("block log length overflow"))?;

        let mut batch = WriteBatch::new();
        batch.put(Column::BlockLog, height.to_be_bytes(), record);
        batch.put(Column::Meta, LENGTH_KEY, next.to_le_bytes());
        self.store.write_batch(&batch)?;

        *guard = next;
        Ok(height)
    }

    fn truncate_from(&self, height: u32) -> Result<(), StoreError> {
        let mut guard = self.len.lock().map_err(|_| StoreError::Poisoned)?;
        if height >= *guard {
            return Ok(());
        }

        let mut batch = WriteBatch::with_capacity((*guard - height) as usize + 1);
        for removed in height..*guard {
            batch.delete(Column::BlockLog, removed.to_be_bytes());
        }
        batch.put(Column::Meta, LENGTH_KEY, height.to_le_bytes());
        self.store.write_batch(&batch)?;

        if *guard - height > 1 {
            ccx_log::log_debug!("block log truncated from {} to {}", *guard, height);
        }
        *guard = height;
        Ok(())
    }
}
