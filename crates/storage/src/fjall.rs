//! On-disk [`KeyValueStore`] backed by a fjall keyspace, one partition per
//! [`Column`].

use std::path::Path;
use std::time::{Duration, Instant};

use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

const SLOW_COMMIT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    /// Block cache size in bytes.
    pub cache_bytes: Option<u64>,
    /// Sync every batch to disk before `write_batch` returns.
    pub sync_writes: bool,
}

pub struct FjallStore {
    keyspace: Keyspace,
    partitions: [PartitionHandle; 2],
    durability: PersistMode,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, FjallOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        let mut config = Config::new(path);
        if let Some(bytes) = options.cache_bytes {
            config = config.cache_size(bytes);
        }
        let keyspace = config.open().map_err(map_err)?;
        let open = |column: Column| {
            keyspace
                .open_partition(column.as_str(), PartitionCreateOptions::default())
                .map_err(map_err)
        };
        let partitions = [open(Column::BlockLog)?, open(Column::Meta)?];
        let durability = if options.sync_writes {
            PersistMode::SyncAll
        } else {
            PersistMode::Buffer
        };
        Ok(Self {
            keyspace,
            partitions,
            durability,
        })
    }

    fn partition(&self, column: Column) -> &PartitionHandle {
        &self.partitions[column.index()]
    }

    /// Flushes the journal to disk.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(map_err)
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.partition(column).get(key).map_err(map_err)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.partition(column).insert(key, value).map_err(map_err)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.partition(column).remove(key).map_err(map_err)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.partition(column)
            .prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(key, value)| (key.to_vec(), value.to_vec()))
                    .map_err(map_err)
            })
            .collect()
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pending = Batch::with_capacity(self.keyspace.clone(), batch.len())
            .durability(Some(self.durability));
        for op in batch.iter() {
            let partition = self.partition(op.column());
            match op {
                WriteOp::Put { value, .. } => pending.insert(partition, op.key(), value.as_slice()),
                WriteOp::Delete { .. } => pending.remove(partition, op.key()),
            }
        }
        let started = Instant::now();
        pending.commit().map_err(map_err)?;
        let elapsed = started.elapsed();
        if elapsed >= SLOW_COMMIT {
            ccx_log::log_warn!(
                "ledger store commit of {} ops took {}ms",
                batch.len(),
                elapsed.as_millis()
            );
        }
        Ok(())
    }
}

fn map_err(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
