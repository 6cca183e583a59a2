mod common;

use std::sync::Arc;

use ccx_chainstate::{Ledger, LedgerOptions, TxVerification, CACHE_KEY};
use ccx_consensus::Hash256;
use ccx_storage::{Column, KeyValueStore};

use common::{
    extend, harness, key_output, key_spend, open_ledger, regtest_params, transaction_bytes,
    BlockTemplate, Harness, Wallet,
};

const SPENT_IMAGE: [u8; 32] = [5u8; 32];

/// Eleven blocks on top of genesis, the last one carrying a spend of the
/// block 1 coinbase. Returns the spend's hash.
fn populated(h: &Harness, miner: &Wallet) -> Hash256 {
    let ids = extend(h, miner, 10, 0);
    let funding = h
        .ledger
        .block_by_hash(&ids[0])
        .expect("lookup")
        .expect("block")
        .base_transaction;
    let amount = funding.outputs[0].amount;
    let global_index = h
        .ledger
        .global_output_indexes(&funding.hash())
        .expect("lookup")
        .expect("indexes")[0];
    let spend = key_spend(
        miner,
        amount,
        global_index,
        SPENT_IMAGE,
        vec![key_output(amount - 1_000, &Wallet::new(2))],
    );
    assert!(matches!(
        h.ledger.handle_incoming_transaction(&transaction_bytes(&spend)),
        TxVerification::Added
    ));
    let spends = [spend.clone()];
    let block = BlockTemplate::on(ids[9], 11)
        .with_transactions(&spends)
        .build(&h.params, miner);
    assert!(h.ledger.add_new_block(block).is_added());
    spend.hash()
}

fn assert_same_ledger(left: &Ledger, right: &Ledger, spend: &Hash256) {
    assert_eq!(left.tail().expect("tail"), right.tail().expect("tail"));
    assert_eq!(
        left.coins_in_circulation().expect("coins"),
        right.coins_in_circulation().expect("coins")
    );
    assert_eq!(
        left.total_transactions().expect("txs"),
        right.total_transactions().expect("txs")
    );
    assert_eq!(
        left.global_output_indexes(spend).expect("lookup"),
        right.global_output_indexes(spend).expect("lookup")
    );
    assert_eq!(
        left.block_summary(7).expect("summary"),
        right.block_summary(7).expect("summary")
    );
    assert_eq!(
        left.build_sparse_chain().expect("sparse"),
        right.build_sparse_chain().expect("sparse")
    );
    assert!(right.is_key_image_spent(&SPENT_IMAGE).expect("spent"));
}

#[test]
fn cache_restores_ledger_state() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let spend = populated(&h, &miner);
    h.ledger.save_cache().expect("save cache");
    assert!(h
        .store
        .get(Column::Meta, CACHE_KEY)
        .expect("read")
        .is_some());

    let cached = open_ledger(&params, Arc::clone(&h.store), LedgerOptions::default());
    assert_same_ledger(&h.ledger, &cached.ledger, &spend);

    let replayed = open_ledger(
        &params,
        Arc::clone(&h.store),
        LedgerOptions {
            use_cache: false,
            ..LedgerOptions::default()
        },
    );
    assert_same_ledger(&h.ledger, &replayed.ledger, &spend);

    drop(h);
    extend(&cached, &miner, 2, 0);
    assert_eq!(cached.ledger.block_count().expect("count"), 14);
}

#[test]
fn stale_cache_falls_back_to_replay() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let spend = populated(&h, &miner);
    h.ledger.save_cache().expect("save cache");
    extend(&h, &miner, 2, 0);

    let reopened = open_ledger(&params, Arc::clone(&h.store), LedgerOptions::default());
    assert_eq!(reopened.ledger.block_count().expect("count"), 14);
    assert_same_ledger(&h.ledger, &reopened.ledger, &spend);
}

#[test]
fn corrupt_cache_is_ignored() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let spend = populated(&h, &miner);
    h.store
        .put(Column::Meta, CACHE_KEY, b"not a ledger cache")
        .expect("write");

    let reopened = open_ledger(&params, Arc::clone(&h.store), LedgerOptions::default());
    assert_same_ledger(&h.ledger, &reopened.ledger, &spend);
}

#[test]
fn discard_removes_snapshot() {
    let params = regtest_params();
    let h = harness(&params);
    extend(&h, &Wallet::new(1), 3, 0);
    h.ledger.save_cache().expect("save cache");
    h.ledger.discard_cache().expect("discard cache");
    assert_eq!(h.store.get(Column::Meta, CACHE_KEY).expect("read"), None);

    let reopened = open_ledger(&params, Arc::clone(&h.store), LedgerOptions::default());
    assert_eq!(reopened.ledger.tail().expect("tail"), h.ledger.tail().expect("tail"));
}

#[test]
fn reopened_ledger_keeps_genesis() {
    let params = regtest_params();
    let h = harness(&params);
    let genesis = h.ledger.tail().expect("tail");
    let reopened = open_ledger(&params, Arc::clone(&h.store), LedgerOptions::default());
    assert_eq!(reopened.ledger.tail().expect("tail"), genesis);
    assert_eq!(reopened.ledger.block_count().expect("count"), 1);
}
