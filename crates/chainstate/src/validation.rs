//! Context-free block and transaction rules.
//!
//! Checks that need the chain (spent key images, referenced outputs,
//! difficulty) live in the engine; everything here is a pure function of its
//! arguments.

use std::collections::HashSet;

use ccx_consensus::constants::{
    BLOCK_MINOR_VERSION_1, TRANSACTION_VERSION_1, TRANSACTION_VERSION_2,
};
use ccx_consensus::money::Amount;
use ccx_consensus::rewards::median;
use ccx_consensus::{block_reward, ConsensusParams};
use ccx_pow::{DifficultyError, PowError};
use ccx_primitives::{Block, DecodeError, OutputTarget, Transaction, TransactionInput};

use crate::deposits::DepositError;
use crate::verification::CryptoVerifier;

#[derive(Debug)]
pub enum ValidationError {
    InvalidBlock(&'static str),
    InvalidHeader(&'static str),
    InvalidTransaction(&'static str),
    ValueOutOfRange,
    DuplicateInput,
    DuplicateTransaction,
    DoubleSpend,
    CheckpointMismatch(u32),
    RewardMismatch { expected: Amount, found: Amount },
    Pow(PowError),
    Difficulty(DifficultyError),
    Deposit(DepositError),
    Decode(DecodeError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBlock(message) => write!(f, "{message}"),
            ValidationError::InvalidHeader(message) => write!(f, "{message}"),
            ValidationError::InvalidTransaction(message) => write!(f, "{message}"),
            ValidationError::ValueOutOfRange => write!(f, "value out of range"),
            ValidationError::DuplicateInput => write!(f, "duplicate input"),
            ValidationError::DuplicateTransaction => write!(f, "duplicate transaction"),
            ValidationError::DoubleSpend => write!(f, "input already spent"),
            ValidationError::CheckpointMismatch(height) => {
                write!(f, "block at height {height} does not match checkpoint")
            }
            ValidationError::RewardMismatch { expected, found } => {
                write!(f, "coinbase pays {found}, expected {expected}")
            }
            ValidationError::Pow(err) => write!(f, "{err}"),
            ValidationError::Difficulty(err) => write!(f, "{err}"),
            ValidationError::Deposit(err) => write!(f, "{err}"),
            ValidationError::Decode(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<PowError> for ValidationError {
    fn from(err: PowError) -> Self {
        ValidationError::Pow(err)
    }
}

impl From<DifficultyError> for ValidationError {
    fn from(err: DifficultyError) -> Self {
        ValidationError::Difficulty(err)
    }
}

impl From<DepositError> for ValidationError {
    fn from(err: DepositError) -> Self {
        ValidationError::Deposit(err)
    }
}

impl From<DecodeError> for ValidationError {
    fn from(err: DecodeError) -> Self {
        ValidationError::Decode(err)
    }
}

/// Structural checks for a non-coinbase transaction.
pub fn check_transaction_syntax(tx: &Transaction) -> Result<(), ValidationError> {
    if !(TRANSACTION_VERSION_1..=TRANSACTION_VERSION_2).contains(&tx.version) {
        return Err(ValidationError::InvalidTransaction(
            "unsupported transaction version",
        ));
    }
    if tx.inputs.is_empty() {
        return Err(ValidationError::InvalidTransaction("transaction has no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(ValidationError::InvalidTransaction("transaction has no outputs"));
    }
    if !tx.signatures_match_inputs() {
        return Err(ValidationError::InvalidTransaction(
            "signature count does not match inputs",
        ));
    }

    let mut key_images = HashSet::new();
    let mut multisignature_refs = HashSet::new();
    let mut amount_in: Amount = 0;
    for input in &tx.inputs {
        match input {
            TransactionInput::Base { .. } => {
                return Err(ValidationError::InvalidTransaction(
                    "base input outside coinbase",
                ));
            }
            TransactionInput::Key(key) => {
                if key.output_indexes.is_empty() {
                    return Err(ValidationError::InvalidTransaction(
                        "key input references no outputs",
                    ));
                }
                if !key_images.insert(key.key_image) {
                    return Err(ValidationError::DuplicateInput);
                }
            }
            TransactionInput::Multisignature(multisig) => {
                if tx.version < TRANSACTION_VERSION_2 {
                    return Err(ValidationError::InvalidTransaction(
                        "multisignature input requires version 2",
                    ));
                }
                if !multisignature_refs.insert((multisig.amount, multisig.output_index)) {
                    return Err(ValidationError::DuplicateInput);
                }
            }
        }
        amount_in = amount_in
            .checked_add(input.amount())
            .ok_or(ValidationError::ValueOutOfRange)?;
    }
    if tx.outputs_amount().is_none() {
        return Err(ValidationError::ValueOutOfRange);
    }
    Ok(())
}

pub fn check_outputs(
    tx: &Transaction,
    crypto: &dyn CryptoVerifier,
    params: &ConsensusParams,
) -> Result<(), ValidationError> {
    for output in &tx.outputs {
        match &output.target {
            OutputTarget::Key(key) => {
                if output.amount == 0 {
                    return Err(ValidationError::InvalidTransaction("zero amount output"));
                }
                if !crypto.check_key(key) {
                    return Err(ValidationError::InvalidTransaction("output with invalid key"));
                }
            }
            OutputTarget::Multisignature(multisig) => {
                if tx.version < TRANSACTION_VERSION_2 {
                    return Err(ValidationError::InvalidTransaction(
                        "multisignature output requires version 2",
                    ));
                }
                if usize::from(multisig.required_signatures) > multisig.keys.len() {
                    return Err(ValidationError::InvalidTransaction(
                        "multisignature output requires more signatures than keys",
                    ));
                }
                if !multisig.keys.iter().all(|key| crypto.check_key(key)) {
                    return Err(ValidationError::InvalidTransaction(
                        "multisignature output with invalid key",
                    ));
                }
                if multisig.term != 0 {
                    if multisig.term < params.deposit_min_term
                        || multisig.term > params.deposit_max_term_v1
                    {
                        return Err(ValidationError::InvalidTransaction(
                            "deposit term out of range",
                        ));
                    }
                    if output.amount < params.deposit_min_amount {
                        return Err(ValidationError::InvalidTransaction(
                            "deposit amount below minimum",
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Shape of the coinbase before any reward is known.
pub fn prevalidate_miner_transaction(
    block: &Block,
    height: u32,
    params: &ConsensusParams,
) -> Result<(), ValidationError> {
    let coinbase = &block.base_transaction;
    match coinbase.inputs.as_slice() {
        [TransactionInput::Base { block_index }] if *block_index == height => {}
        [TransactionInput::Base { .. }] => {
            return Err(ValidationError::InvalidBlock("coinbase height mismatch"));
        }
        _ => return Err(ValidationError::InvalidBlock("coinbase must have one base input")),
    }
    if coinbase.unlock_time != u64::from(height) + u64::from(params.mined_money_unlock_window) {
        return Err(ValidationError::InvalidBlock("coinbase has wrong unlock time"));
    }
    if coinbase.outputs_amount().is_none() {
        return Err(ValidationError::ValueOutOfRange);
    }
    Ok(())
}

/// Compares the coinbase payout with the reward the block earns and returns
/// the emission change to add to the generated supply.
pub fn validate_miner_reward(
    block: &Block,
    height: u32,
    cumulative_size: usize,
    already_generated: Amount,
    fee: Amount,
    last_block_sizes: &[u64],
    params: &ConsensusParams,
) -> Result<i64, ValidationError> {
    let paid = block
        .base_transaction
        .outputs_amount()
        .ok_or(ValidationError::ValueOutOfRange)?;
    let median_size = median(last_block_sizes) as usize;
    let reward = block_reward(median_size, cumulative_size, already_generated, fee, height, params)
        .ok_or(ValidationError::InvalidBlock("block cumulative size is too big"))?;
    if paid != reward.reward {
        return Err(ValidationError::RewardMismatch {
            expected: reward.reward,
            found: paid,
        });
    }
    Ok(reward.emission_change)
}

/// `previous` holds the timestamps of the blocks before this one, oldest
/// first.
pub fn check_block_timestamp(
    timestamp: u64,
    previous: &[u64],
    now: u64,
    major_version: u8,
    params: &ConsensusParams,
) -> Result<(), ValidationError> {
    if timestamp > now.saturating_add(params.block_future_time_limit(major_version)) {
        return Err(ValidationError::InvalidHeader("timestamp too far in the future"));
    }
    let window = params.timestamp_check_window(major_version);
    if previous.len() < window {
        return Ok(());
    }
    let recent = &previous[previous.len() - window..];
    if timestamp < median(recent) {
        return Err(ValidationError::InvalidHeader("timestamp below median of recent blocks"));
    }
    Ok(())
}

pub fn check_block_minor_version(block: &Block) -> Result<(), ValidationError> {
    if block.header.minor_version > BLOCK_MINOR_VERSION_1 {
        return Err(ValidationError::InvalidHeader("unsupported minor version"));
    }
    Ok(())
}

/// Turns relative ring offsets into absolute global indexes.
pub fn relative_to_absolute_offsets(offsets: &[u32]) -> Option<Vec<u32>> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut current = 0u32;
    for (position, offset) in offsets.iter().enumerate() {
        current = if position == 0 {
            *offset
        } else {
            current.checked_add(*offset)?
        };
        absolute.push(current);
    }
    Some(absolute)
}

/// Unlock times below `max_block_number` are heights, the rest unix seconds.
pub fn is_unlocked(unlock_time: u64, chain_len: u32, now: u64, params: &ConsensusParams) -> bool {
    if unlock_time < params.max_block_number {
        u64::from(chain_len).saturating_sub(1) + params.locked_tx_allowed_delta_blocks >= unlock_time
    } else {
        now.saturating_add(params.locked_tx_allowed_delta_seconds) >= unlock_time
    }
}
