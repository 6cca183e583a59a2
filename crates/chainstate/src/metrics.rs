//! Ledger counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct LedgerMetrics {
    blocks_pushed: AtomicU64,
    blocks_popped: AtomicU64,
    blocks_rejected: AtomicU64,
    alternative_blocks: AtomicU64,
    orphan_blocks: AtomicU64,
    reorgs: AtomicU64,
    failed_reorgs: AtomicU64,
    validate_us: AtomicU64,
    commit_us: AtomicU64,
    transactions_checked: AtomicU64,
    transactions_rejected: AtomicU64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LedgerMetricsSnapshot {
    pub blocks_pushed: u64,
    pub blocks_popped: u64,
    pub blocks_rejected: u64,
    pub alternative_blocks: u64,
    pub orphan_blocks: u64,
    pub reorgs: u64,
    pub failed_reorgs: u64,
    pub validate_us: u64,
    pub commit_us: u64,
    pub transactions_checked: u64,
    pub transactions_rejected: u64,
}

impl LedgerMetrics {
    pub fn record_push(&self, validate: Duration, commit: Duration) {
        self.validate_us
            .fetch_add(validate.as_micros() as u64, Ordering::Relaxed);
        self.commit_us
            .fetch_add(commit.as_micros() as u64, Ordering::Relaxed);
        self.blocks_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pop(&self) {
        self.blocks_popped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alternative(&self) {
        self.alternative_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphan(&self) {
        self.orphan_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reorg(&self, succeeded: bool) {
        if succeeded {
            self.reorgs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_reorgs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_transaction(&self, accepted: bool) {
        self.transactions_checked.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.transactions_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> LedgerMetricsSnapshot {
        LedgerMetricsSnapshot {
            blocks_pushed: self.blocks_pushed.load(Ordering::Relaxed),
            blocks_popped: self.blocks_popped.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            alternative_blocks: self.alternative_blocks.load(Ordering::Relaxed),
            orphan_blocks: self.orphan_blocks.load(Ordering::Relaxed),
            reorgs: self.reorgs.load(Ordering::Relaxed),
            failed_reorgs: self.failed_reorgs.load(Ordering::Relaxed),
            validate_us: self.validate_us.load(Ordering::Relaxed),
            commit_us: self.commit_us.load(Ordering::Relaxed),
            transactions_checked: self.transactions_checked.load(Ordering::Relaxed),
            transactions_rejected: self.transactions_rejected.load(Ordering::Relaxed),
        }
    }
}
