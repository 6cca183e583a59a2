#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ccx_chainstate::{
    BlockVerification, CryptoVerifier, Ledger, LedgerContext, LedgerOptions, TimeSource,
    TransactionPool,
};
use ccx_consensus::constants::{BLOCK_MAJOR_VERSION_1, BLOCK_MINOR_VERSION_0};
use ccx_consensus::money::Amount;
use ccx_consensus::{block_reward, consensus_params, transaction_fee, ConsensusParams, Hash256, Network};
use ccx_pow::Blake2bPowHasher;
use ccx_primitives::{
    Block, BlockHeader, KeyImage, KeyInput, MultisignatureInput, MultisignatureOutput,
    OutputTarget, PublicKey, Signature, Transaction, TransactionInput, TransactionOutput,
};
use ccx_storage::memory::MemoryStore;
use ccx_storage::KeyValueStore;
use secp256k1::{schnorr, All, Keypair, Message, Secp256k1, XOnlyPublicKey};

pub const BLOCK_SPACING: u64 = 120;

/// Schnorr stand-in for the ring and multisignature checks: a ring signature
/// is valid when one member's slot carries a signature by that member.
pub struct TestCrypto {
    secp: Secp256k1<All>,
}

impl TestCrypto {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    fn verify(&self, prefix_hash: &Hash256, key: &PublicKey, signature: &Signature) -> bool {
        let Ok(key) = XOnlyPublicKey::from_slice(key) else {
            return false;
        };
        let Ok(signature) = schnorr::Signature::from_slice(signature) else {
            return false;
        };
        let message = Message::from_digest(*prefix_hash);
        self.secp.verify_schnorr(&signature, &message, &key).is_ok()
    }
}

impl CryptoVerifier for TestCrypto {
    fn check_key(&self, key: &PublicKey) -> bool {
        XOnlyPublicKey::from_slice(key).is_ok()
    }

    fn check_key_image(&self, key_image: &KeyImage) -> bool {
        *key_image != [0u8; 32]
    }

    fn check_ring_signature(
        &self,
        prefix_hash: &Hash256,
        _key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        ring.len() == signatures.len()
            && ring
                .iter()
                .zip(signatures)
                .any(|(key, signature)| self.verify(prefix_hash, key, signature))
    }

    fn check_signature(&self, prefix_hash: &Hash256, key: &PublicKey, signature: &Signature) -> bool {
        self.verify(prefix_hash, key, signature)
    }
}

#[derive(Default)]
pub struct TestPool {
    transactions: Mutex<HashMap<Hash256, Transaction>>,
}

impl TestPool {
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.transactions.lock().expect("pool").contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.lock().expect("pool").len()
    }

    pub fn insert(&self, tx: Transaction) {
        self.transactions.lock().expect("pool").insert(tx.hash(), tx);
    }
}

impl TransactionPool for TestPool {
    fn take_transaction(&self, hash: &Hash256) -> Option<Transaction> {
        self.transactions.lock().expect("pool").remove(hash)
    }

    fn return_transaction(&self, tx: Transaction) {
        self.insert(tx);
    }

    fn add_transaction(&self, tx: Transaction, hash: Hash256, _blob_size: usize, _fee: Amount) -> bool {
        self.transactions.lock().expect("pool").insert(hash, tx);
        true
    }

    fn transaction_size(&self, hash: &Hash256) -> Option<usize> {
        self.transactions
            .lock()
            .expect("pool")
            .get(hash)
            .map(Transaction::blob_size)
    }
}

pub struct FixedTime(pub u64);

impl TimeSource for FixedTime {
    fn now(&self) -> u64 {
        self.0
    }
}

pub fn regtest_params() -> ConsensusParams {
    consensus_params(Network::Regtest)
}

pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

pub struct Harness {
    pub params: ConsensusParams,
    pub store: Arc<dyn KeyValueStore>,
    pub pool: Arc<TestPool>,
    pub ledger: Ledger,
}

pub fn context(params: &ConsensusParams, pool: Arc<TestPool>) -> LedgerContext {
    LedgerContext {
        pow: Arc::new(Blake2bPowHasher),
        crypto: Arc::new(TestCrypto::new()),
        pool,
        time: Arc::new(FixedTime(params.genesis_timestamp + 1_000_000)),
    }
}

pub fn open_ledger(
    params: &ConsensusParams,
    store: Arc<dyn KeyValueStore>,
    options: LedgerOptions,
) -> Harness {
    let pool = Arc::new(TestPool::default());
    let ledger = Ledger::open(
        params.clone(),
        Arc::clone(&store),
        context(params, Arc::clone(&pool)),
        options,
    )
    .expect("open ledger");
    Harness {
        params: params.clone(),
        store,
        pool,
        ledger,
    }
}

pub fn harness(params: &ConsensusParams) -> Harness {
    open_ledger(params, memory_store(), LedgerOptions::default())
}

pub struct Wallet {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl Wallet {
    pub fn new(seed: u8) -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &[seed.max(1); 32]).expect("secret key");
        Self { secp, keypair }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.x_only_public_key().0.serialize()
    }

    pub fn sign(&self, prefix_hash: &Hash256) -> Signature {
        let message = Message::from_digest(*prefix_hash);
        self.secp
            .sign_schnorr_no_aux_rand(&message, &self.keypair)
            .serialize()
    }
}

pub fn block_timestamp(params: &ConsensusParams, height: u32) -> u64 {
    params.genesis_timestamp + BLOCK_SPACING * u64::from(height)
}

pub fn coinbase(params: &ConsensusParams, height: u32, reward: Amount, key: PublicKey, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        unlock_time: u64::from(height) + u64::from(params.mined_money_unlock_window),
        inputs: vec![TransactionInput::Base {
            block_index: height,
        }],
        outputs: vec![TransactionOutput {
            amount: reward,
            target: OutputTarget::Key(key),
        }],
        extra: vec![tag],
        signatures: vec![Vec::new()],
    }
}

pub fn fee_of(params: &ConsensusParams, tx: &Transaction, height: u32) -> Amount {
    transaction_fee(tx.input_values(), &tx.output_amounts(), height, params).expect("fee")
}

/// Reward a small block at `height` earns with `fee` in fees.
pub fn reward_at(params: &ConsensusParams, height: u32, fee: Amount) -> Amount {
    block_reward(0, 0, 0, fee, height, params)
        .expect("reward")
        .reward
}

pub struct BlockTemplate<'a> {
    pub prev_hash: Hash256,
    pub height: u32,
    pub major_version: u8,
    pub minor_version: u8,
    pub transactions: &'a [Transaction],
    pub tag: u8,
}

impl<'a> BlockTemplate<'a> {
    pub fn on(prev_hash: Hash256, height: u32) -> Self {
        Self {
            prev_hash,
            height,
            major_version: BLOCK_MAJOR_VERSION_1,
            minor_version: BLOCK_MINOR_VERSION_0,
            transactions: &[],
            tag: 0,
        }
    }

    pub fn tag(mut self, tag: u8) -> Self {
        self.tag = tag;
        self
    }

    pub fn versions(mut self, major_version: u8, minor_version: u8) -> Self {
        self.major_version = major_version;
        self.minor_version = minor_version;
        self
    }

    pub fn with_transactions(mut self, transactions: &'a [Transaction]) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn build(&self, params: &ConsensusParams, miner: &Wallet) -> Block {
        let fee: Amount = self
            .transactions
            .iter()
            .map(|tx| fee_of(params, tx, self.height))
            .sum();
        self.build_with_reward(params, miner, reward_at(params, self.height, fee))
    }

    pub fn build_with_reward(&self, params: &ConsensusParams, miner: &Wallet, reward: Amount) -> Block {
        Block {
            header: BlockHeader {
                major_version: self.major_version,
                minor_version: self.minor_version,
                timestamp: block_timestamp(params, self.height),
                prev_hash: self.prev_hash,
                nonce: u32::from(self.tag),
            },
            base_transaction: coinbase(params, self.height, reward, miner.public_key(), self.tag),
            transaction_hashes: self.transactions.iter().map(Transaction::hash).collect(),
        }
    }
}

/// Appends `count` empty blocks on the tail and returns their ids.
pub fn extend(harness: &Harness, miner: &Wallet, count: u32, tag: u8) -> Vec<Hash256> {
    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (tail_height, tail) = harness.ledger.tail().expect("tail");
        let block = BlockTemplate::on(tail, tail_height + 1)
            .tag(tag)
            .build(&harness.params, miner);
        ids.push(block.hash());
        let verification = harness.ledger.add_new_block(block);
        assert!(
            matches!(verification, BlockVerification::AddedToMainChain),
            "block at height {} not added: {verification:?}",
            tail_height + 1
        );
    }
    ids
}

/// Builds a chain of `count` empty blocks forking off `prev_hash` at
/// `first_height`, without submitting it.
pub fn branch(
    params: &ConsensusParams,
    miner: &Wallet,
    prev_hash: Hash256,
    first_height: u32,
    count: u32,
    tag: u8,
) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count as usize);
    let mut prev = prev_hash;
    for height in first_height..first_height + count {
        let block = BlockTemplate::on(prev, height).tag(tag).build(params, miner);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

/// One-member ring spend of the key output at `global_index`.
pub fn key_spend(
    owner: &Wallet,
    amount: Amount,
    global_index: u32,
    key_image: KeyImage,
    outputs: Vec<TransactionOutput>,
) -> Transaction {
    let mut tx = Transaction {
        version: 2,
        unlock_time: 0,
        inputs: vec![TransactionInput::Key(KeyInput {
            amount,
            output_indexes: vec![global_index],
            key_image,
        })],
        outputs,
        extra: Vec::new(),
        signatures: vec![vec![[0u8; 64]]],
    };
    tx.signatures[0][0] = owner.sign(&tx.prefix_hash());
    tx
}

/// Single-signer withdrawal of the multisignature output at `global_index`.
pub fn multisig_spend(
    owner: &Wallet,
    amount: Amount,
    global_index: u32,
    term: u32,
    outputs: Vec<TransactionOutput>,
) -> Transaction {
    let mut tx = Transaction {
        version: 2,
        unlock_time: 0,
        inputs: vec![TransactionInput::Multisignature(MultisignatureInput {
            amount,
            signature_count: 1,
            output_index: global_index,
            term,
        })],
        outputs,
        extra: Vec::new(),
        signatures: vec![vec![[0u8; 64]]],
    };
    tx.signatures[0][0] = owner.sign(&tx.prefix_hash());
    tx
}

pub fn key_output(amount: Amount, owner: &Wallet) -> TransactionOutput {
    TransactionOutput {
        amount,
        target: OutputTarget::Key(owner.public_key()),
    }
}

pub fn deposit_output(amount: Amount, owner: &Wallet, term: u32) -> TransactionOutput {
    TransactionOutput {
        amount,
        target: OutputTarget::Multisignature(MultisignatureOutput {
            keys: vec![owner.public_key()],
            required_signatures: 1,
            term,
        }),
    }
}

pub fn transaction_bytes(tx: &Transaction) -> Vec<u8> {
    tx.consensus_encode()
}
