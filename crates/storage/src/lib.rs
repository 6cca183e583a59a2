use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod block_log;
pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

pub use block_log::{BlockLog, KvBlockLog};

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
    Corrupt(&'static str),
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
            StoreError::Corrupt(message) => write!(f, "corrupt store: {message}"),
            StoreError::Poisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Logical partitions of the ledger store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// Committed block records keyed by big-endian height.
    BlockLog,
    /// Small bookkeeping values and the serialized ledger cache.
    Meta,
}

impl Column {
    pub const ALL: [Column; 2] = [Column::BlockLog, Column::Meta];

    pub const fn bit(self) -> u32 {
        match self {
            Column::BlockLog => 1 << 0,
            Column::Meta => 1 << 1,
        }
    }

    pub const fn index(self) -> usize {
        self.bit().trailing_zeros() as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::BlockLog => "block_log",
            Column::Meta => "meta",
        }
    }
}

/// Keys are heights or short names; they fit inline.
pub type BatchKey = SmallVec<[u8; 16]>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriteOp {
    Put {
        column: Column,
        key: BatchKey,
        value: Vec<u8>,
    },
    Delete {
        column: Column,
        key: BatchKey,
    },
}

impl WriteOp {
    pub fn column(&self) -> Column {
        match self {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => *column,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key.as_slice(),
        }
    }
}

/// Ordered set of writes applied atomically by [`KeyValueStore::write_batch`].
/// Later operations on the same key win.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn put(&mut self, column: Column, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.ops.push(WriteOp::Put {
            column,
            key: SmallVec::from_slice(key.as_ref()),
            value: value.as_ref().to_vec(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl AsRef<[u8]>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: SmallVec::from_slice(key.as_ref()),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.as_ref().put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.as_ref().delete(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(column, prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }
}
