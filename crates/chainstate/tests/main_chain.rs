mod common;

use ccx_chainstate::validation::ValidationError;
use ccx_chainstate::{genesis_block, BlockVerification, LedgerError};
use ccx_consensus::constants::BLOCK_MAJOR_VERSION_2;

use common::{extend, harness, regtest_params, reward_at, BlockTemplate, Wallet};

#[test]
fn opens_with_genesis() {
    let params = regtest_params();
    let h = harness(&params);
    let genesis = genesis_block(&params).expect("genesis");

    assert_eq!(h.ledger.block_count().expect("count"), 1);
    assert_eq!(h.ledger.tail().expect("tail"), (0, genesis.hash()));
    assert_eq!(
        h.ledger.coins_in_circulation().expect("coins"),
        genesis.base_transaction.outputs_amount().expect("amount")
    );
    assert_eq!(h.ledger.total_transactions().expect("txs"), 1);
    assert_eq!(h.ledger.difficulty_for_next_block().expect("difficulty"), 1);
    assert_eq!(h.ledger.difficulty_at_height(0).expect("difficulty"), Some(1));
}

#[test]
fn extends_main_chain() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let genesis_coins = h.ledger.coins_in_circulation().expect("coins");

    let ids = extend(&h, &miner, 5, 0);

    assert_eq!(h.ledger.block_count().expect("count"), 6);
    assert_eq!(h.ledger.tail().expect("tail"), (5, ids[4]));
    assert_eq!(h.ledger.block_id_at(3).expect("id"), Some(ids[2]));
    assert_eq!(h.ledger.block_height(&ids[4]).expect("height"), Some(5));
    assert!(h.ledger.have_block(&ids[0]).expect("have"));
    let block = h.ledger.block_by_hash(&ids[1]).expect("lookup").expect("block");
    assert_eq!(block.hash(), ids[1]);
    assert_eq!(h.ledger.difficulty_at_height(5).expect("difficulty"), Some(1));
    assert_eq!(
        h.ledger.block_timestamp(5).expect("timestamp"),
        Some(common::block_timestamp(&params, 5))
    );

    let mined: u64 = (1..=5).map(|height| reward_at(&params, height, 0)).sum();
    assert_eq!(h.ledger.coins_in_circulation().expect("coins"), genesis_coins + mined);
    assert_eq!(h.ledger.total_transactions().expect("txs"), 6);
    assert_eq!(h.ledger.metrics().blocks_pushed, 5);
}

#[test]
fn known_block_is_reported() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let (_, tail) = h.ledger.tail().expect("tail");
    let block = BlockTemplate::on(tail, 1).build(&params, &miner);

    assert!(matches!(
        h.ledger.add_new_block(block.clone()),
        BlockVerification::AddedToMainChain
    ));
    assert!(matches!(
        h.ledger.add_new_block(block),
        BlockVerification::AlreadyExists
    ));
}

#[test]
fn unknown_parent_is_orphan() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    extend(&h, &miner, 2, 0);

    let orphan = BlockTemplate::on([7u8; 32], 5).build(&params, &miner);
    assert!(matches!(h.ledger.add_new_block(orphan), BlockVerification::Orphan));
    assert_eq!(h.ledger.block_count().expect("count"), 3);
    assert_eq!(h.ledger.alternative_blocks_count().expect("alt"), 0);
    assert_eq!(h.ledger.metrics().orphan_blocks, 1);
}

#[test]
fn rejects_wrong_reward() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let (_, tail) = h.ledger.tail().expect("tail");
    let greedy = BlockTemplate::on(tail, 1).build_with_reward(
        &params,
        &miner,
        reward_at(&params, 1, 0) + 1,
    );

    let verification = h.ledger.add_new_block(greedy);
    assert!(
        matches!(
            verification,
            BlockVerification::VerificationFailed(LedgerError::ConsensusViolation(
                ValidationError::RewardMismatch { .. }
            ))
        ),
        "{verification:?}"
    );
    assert_eq!(h.ledger.block_count().expect("count"), 1);
    assert_eq!(h.ledger.metrics().blocks_rejected, 1);
}

#[test]
fn rejects_bad_headers() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let (_, tail) = h.ledger.tail().expect("tail");

    let mut future = BlockTemplate::on(tail, 1).build(&params, &miner);
    future.header.timestamp = params.genesis_timestamp + 1_000_000 + params.block_future_time_limit(1) + 1;
    assert!(matches!(
        h.ledger.add_new_block(future),
        BlockVerification::VerificationFailed(LedgerError::ConsensusViolation(
            ValidationError::InvalidHeader(_)
        ))
    ));

    let early_upgrade = BlockTemplate::on(tail, 1)
        .versions(BLOCK_MAJOR_VERSION_2, 0)
        .build(&params, &miner);
    assert!(matches!(
        h.ledger.add_new_block(early_upgrade),
        BlockVerification::VerificationFailed(LedgerError::ConsensusViolation(
            ValidationError::InvalidHeader(_)
        ))
    ));

    let mut misnumbered = BlockTemplate::on(tail, 1).build(&params, &miner);
    misnumbered.base_transaction = common::coinbase(&params, 2, reward_at(&params, 1, 0), miner.public_key(), 0);
    misnumbered.base_transaction.unlock_time = 1 + u64::from(params.mined_money_unlock_window);
    assert!(matches!(
        h.ledger.add_new_block(misnumbered),
        BlockVerification::VerificationFailed(LedgerError::ConsensusViolation(
            ValidationError::InvalidBlock(_)
        ))
    ));
    assert_eq!(h.ledger.block_count().expect("count"), 1);
}

#[test]
fn rollback_restores_tail_state() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let ids = extend(&h, &miner, 2, 0);
    let coins_at_two = h.ledger.coins_in_circulation().expect("coins");
    let more = extend(&h, &miner, 3, 0);

    assert_eq!(h.ledger.rollback_to(2).expect("rollback"), 3);
    assert_eq!(h.ledger.block_count().expect("count"), 3);
    assert_eq!(h.ledger.tail().expect("tail"), (2, ids[1]));
    assert_eq!(h.ledger.coins_in_circulation().expect("coins"), coins_at_two);
    assert!(!h.ledger.have_block(&more[0]).expect("have"));
    assert_eq!(h.ledger.total_transactions().expect("txs"), 3);
    assert_eq!(h.ledger.metrics().blocks_popped, 3);

    let again = extend(&h, &miner, 3, 0);
    assert_eq!(again, more);
    assert_eq!(h.ledger.rollback_to(10).expect("noop"), 0);
}

#[test]
fn sparse_chain_and_supplement() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);
    let ids = extend(&h, &miner, 10, 0);
    let genesis = h.ledger.block_id_at(0).expect("id").expect("genesis");

    let sparse = h.ledger.build_sparse_chain().expect("sparse");
    assert_eq!(
        sparse,
        vec![ids[9], ids[8], ids[6], ids[2], genesis]
    );

    let remote = vec![ids[3], genesis];
    let (supplement, total, start) = h
        .ledger
        .find_blockchain_supplement(&remote, 100)
        .expect("supplement");
    assert_eq!(start, 4);
    assert_eq!(total, 11);
    assert_eq!(supplement.first(), Some(&ids[3]));
    assert_eq!(supplement.len(), 7);

    let (supplement, _, start) = h
        .ledger
        .find_blockchain_supplement(&[[9u8; 32], genesis], 3)
        .expect("supplement");
    assert_eq!(start, 0);
    assert_eq!(supplement, vec![genesis, ids[0], ids[1]]);

    assert!(h.ledger.find_blockchain_supplement(&[], 10).is_err());
    assert!(h.ledger.find_blockchain_supplement(&[ids[3]], 10).is_err());
    assert_eq!(h.ledger.block_ids(9, 5).expect("ids"), vec![ids[8], ids[9]]);
}

#[test]
fn incoming_block_bytes() {
    let params = regtest_params();
    let h = harness(&params);
    let miner = Wallet::new(1);

    assert!(matches!(
        h.ledger.handle_incoming_block(&[0x01, 0x00, 0xff]),
        BlockVerification::VerificationFailed(LedgerError::MalformedInput(_))
    ));

    let (_, tail) = h.ledger.tail().expect("tail");
    let block = BlockTemplate::on(tail, 1).build(&params, &miner);
    assert!(matches!(
        h.ledger.handle_incoming_block(&block.consensus_encode()),
        BlockVerification::AddedToMainChain
    ));
    assert_eq!(h.ledger.tail().expect("tail"), (1, block.hash()));
}

#[test]
fn block_size_limit_tracks_full_reward_zone() {
    let params = regtest_params();
    let h = harness(&params);
    extend(&h, &Wallet::new(1), 3, 0);
    assert_eq!(
        h.ledger.current_cumulative_block_size_limit().expect("limit"),
        2 * params.block_granted_full_reward_zone
    );
}
