//! Transaction types and serialization.

use ccx_consensus::constants::TRANSACTION_VERSION_2;
use ccx_consensus::fees::InputValue;
use ccx_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::fast_hash;

pub type PublicKey = [u8; 32];
pub type KeyImage = [u8; 32];
pub type Signature = [u8; 64];

pub const TAG_BASE_INPUT: u8 = 0xff;
pub const TAG_KEY: u8 = 0x02;
pub const TAG_MULTISIGNATURE: u8 = 0x03;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInput {
    pub amount: u64,
    /// Relative offsets into the amount's global output list.
    pub output_indexes: Vec<u32>,
    pub key_image: KeyImage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultisignatureInput {
    pub amount: u64,
    pub signature_count: u8,
    pub output_index: u32,
    pub term: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionInput {
    Base { block_index: u32 },
    Key(KeyInput),
    Multisignature(MultisignatureInput),
}

impl TransactionInput {
    /// Number of signatures that follow the prefix for this input.
    pub fn signature_count(&self) -> usize {
        match self {
            TransactionInput::Base { .. } => 0,
            TransactionInput::Key(input) => input.output_indexes.len(),
            TransactionInput::Multisignature(input) => input.signature_count as usize,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            TransactionInput::Base { .. } => 0,
            TransactionInput::Key(input) => input.amount,
            TransactionInput::Multisignature(input) => input.amount,
        }
    }

    pub fn value(&self) -> InputValue {
        match self {
            TransactionInput::Base { .. } => InputValue::Base,
            TransactionInput::Key(input) => InputValue::Key {
                amount: input.amount,
            },
            TransactionInput::Multisignature(input) => InputValue::Multisignature {
                amount: input.amount,
                term: input.term,
            },
        }
    }
}

impl Encodable for TransactionInput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        match self {
            TransactionInput::Base { block_index } => {
                encoder.write_u8(TAG_BASE_INPUT);
                encoder.write_varint(u64::from(*block_index));
            }
            TransactionInput::Key(input) => {
                encoder.write_u8(TAG_KEY);
                encoder.write_varint(input.amount);
                encoder.write_varint(input.output_indexes.len() as u64);
                for index in &input.output_indexes {
                    encoder.write_varint(u64::from(*index));
                }
                encoder.write_hash(&input.key_image);
            }
            TransactionInput::Multisignature(input) => {
                encoder.write_u8(TAG_MULTISIGNATURE);
                encoder.write_varint(input.amount);
                encoder.write_varint(u64::from(input.signature_count));
                encoder.write_varint(u64::from(input.output_index));
                encoder.write_varint(u64::from(input.term));
            }
        }
    }
}

impl Decodable for TransactionInput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        match decoder.read_u8()? {
            TAG_BASE_INPUT => Ok(TransactionInput::Base {
                block_index: decoder.read_varint_u32()?,
            }),
            TAG_KEY => {
                let amount = decoder.read_varint()?;
                let count = decoder.read_count()?;
                let mut output_indexes = Vec::with_capacity(count);
                for _ in 0..count {
                    output_indexes.push(decoder.read_varint_u32()?);
                }
                let key_image = decoder.read_hash()?;
                Ok(TransactionInput::Key(KeyInput {
                    amount,
                    output_indexes,
                    key_image,
                }))
            }
            TAG_MULTISIGNATURE => Ok(TransactionInput::Multisignature(MultisignatureInput {
                amount: decoder.read_varint()?,
                signature_count: decoder.read_varint_u8()?,
                output_index: decoder.read_varint_u32()?,
                term: decoder.read_varint_u32()?,
            })),
            _ => Err(DecodeError::InvalidData("unknown input tag")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisignatureOutput {
    pub keys: Vec<PublicKey>,
    pub required_signatures: u8,
    /// Lock term in blocks; zero for a plain multisignature output.
    pub term: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputTarget {
    Key(PublicKey),
    Multisignature(MultisignatureOutput),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: OutputTarget,
}

impl Encodable for TransactionOutput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.amount);
        match &self.target {
            OutputTarget::Key(key) => {
                encoder.write_u8(TAG_KEY);
                encoder.write_hash(key);
            }
            OutputTarget::Multisignature(output) => {
                encoder.write_u8(TAG_MULTISIGNATURE);
                encoder.write_varint(output.keys.len() as u64);
                for key in &output.keys {
                    encoder.write_hash(key);
                }
                encoder.write_varint(u64::from(output.required_signatures));
                encoder.write_varint(u64::from(output.term));
            }
        }
    }
}

impl Decodable for TransactionOutput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_varint()?;
        let target = match decoder.read_u8()? {
            TAG_KEY => OutputTarget::Key(decoder.read_hash()?),
            TAG_MULTISIGNATURE => {
                let count = decoder.read_count()?;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(decoder.read_hash()?);
                }
                OutputTarget::Multisignature(MultisignatureOutput {
                    keys,
                    required_signatures: decoder.read_varint_u8()?,
                    term: decoder.read_varint_u32()?,
                })
            }
            _ => return Err(DecodeError::InvalidData("unknown output tag")),
        };
        Ok(Self { amount, target })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
    /// One group per input; group sizes follow `TransactionInput::signature_count`.
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.as_slice(), [TransactionInput::Base { .. }])
    }

    pub fn encode_prefix(&self, encoder: &mut Encoder) {
        encoder.write_varint(u64::from(self.version));
        encoder.write_varint(self.unlock_time);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(encoder);
        }
        encoder.write_var_bytes(&self.extra);
    }

    pub fn prefix_bytes(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_prefix(&mut encoder);
        encoder.into_inner()
    }

    /// Message signed by every input signature.
    pub fn prefix_hash(&self) -> Hash256 {
        fast_hash(&self.prefix_bytes())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    pub fn hash(&self) -> Hash256 {
        fast_hash(&self.consensus_encode())
    }

    pub fn blob_size(&self) -> usize {
        self.consensus_encode().len()
    }

    /// True when every signature group matches its input's expected count.
    pub fn signatures_match_inputs(&self) -> bool {
        self.signatures.len() == self.inputs.len()
            && self
                .inputs
                .iter()
                .zip(&self.signatures)
                .all(|(input, group)| input.signature_count() == group.len())
    }

    pub fn input_values(&self) -> impl Iterator<Item = InputValue> + '_ {
        self.inputs.iter().map(TransactionInput::value)
    }

    pub fn output_amounts(&self) -> Vec<u64> {
        self.outputs.iter().map(|output| output.amount).collect()
    }

    pub fn input_amounts(&self) -> Vec<u64> {
        self.inputs.iter().map(TransactionInput::amount).collect()
    }

    pub fn outputs_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.amount))
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> + '_ {
        self.inputs.iter().filter_map(|input| match input {
            TransactionInput::Key(key) => Some(&key.key_image),
            _ => None,
        })
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.encode_prefix(encoder);
        for group in &self.signatures {
            for signature in group {
                encoder.write_bytes(signature);
            }
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_varint_u8()?;
        if version > TRANSACTION_VERSION_2 {
            return Err(DecodeError::InvalidData("unsupported transaction version"));
        }
        let unlock_time = decoder.read_varint()?;

        let count = decoder.read_count()?;
        let mut inputs = Vec::with_capacity(count);
        for _ in 0..count {
            inputs.push(TransactionInput::consensus_decode(decoder)?);
        }
        let count = decoder.read_count()?;
        let mut outputs = Vec::with_capacity(count);
        for _ in 0..count {
            outputs.push(TransactionOutput::consensus_decode(decoder)?);
        }
        let extra = decoder.read_var_bytes()?;

        let mut signatures = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let expected = input.signature_count();
            if expected.saturating_mul(64) > decoder.remaining() {
                return Err(DecodeError::UnexpectedEof);
            }
            let mut group = Vec::with_capacity(expected);
            for _ in 0..expected {
                group.push(decoder.read_fixed::<64>()?);
            }
            signatures.push(group);
        }

        Ok(Self {
            version,
            unlock_time,
            inputs,
            outputs,
            extra,
            signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{bytes_to_hex, hex_to_bytes};
    use ccx_consensus::params::GENESIS_COINBASE_TX_HEX;

    #[test]
    fn genesis_coinbase_decodes() {
        let bytes = hex_to_bytes(GENESIS_COINBASE_TX_HEX).expect("hex");
        let tx = Transaction::consensus_decode(&bytes).expect("genesis coinbase");

        assert_eq!(tx.version, 1);
        assert_eq!(tx.unlock_time, 10);
        assert_eq!(tx.inputs, vec![TransactionInput::Base { block_index: 0 }]);
        assert!(tx.is_coinbase());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].amount, 5_000_000);
        match &tx.outputs[0].target {
            OutputTarget::Key(key) => assert_eq!(key[0], 0x9b),
            other => panic!("unexpected target {other:?}"),
        }
        assert_eq!(tx.extra.len(), 33);
        assert_eq!(tx.extra[0], 0x01);
        assert_eq!(tx.signatures, vec![Vec::<Signature>::new()]);
        assert_eq!(bytes_to_hex(&tx.consensus_encode()), GENESIS_COINBASE_TX_HEX);
    }

    #[test]
    fn signatures_follow_prefix_without_length() {
        let tx = Transaction {
            version: 2,
            unlock_time: 0,
            inputs: vec![
                TransactionInput::Key(KeyInput {
                    amount: 1_000,
                    output_indexes: vec![4, 1],
                    key_image: [7u8; 32],
                }),
                TransactionInput::Multisignature(MultisignatureInput {
                    amount: 2_000,
                    signature_count: 1,
                    output_index: 0,
                    term: 5_040,
                }),
            ],
            outputs: vec![TransactionOutput {
                amount: 2_990,
                target: OutputTarget::Multisignature(MultisignatureOutput {
                    keys: vec![[1u8; 32], [2u8; 32]],
                    required_signatures: 2,
                    term: 0,
                }),
            }],
            extra: vec![],
            signatures: vec![vec![[3u8; 64], [4u8; 64]], vec![[5u8; 64]]],
        };

        let bytes = tx.consensus_encode();
        assert_eq!(bytes.len(), tx.prefix_bytes().len() + 3 * 64);
        assert!(tx.signatures_match_inputs());
        assert_eq!(Transaction::consensus_decode(&bytes).expect("decode"), tx);
        assert_ne!(tx.hash(), tx.prefix_hash());
    }

    #[test]
    fn rejects_unknown_tags_and_versions() {
        let mut bytes = hex_to_bytes(GENESIS_COINBASE_TX_HEX).expect("hex");
        bytes[3] = 0x05;
        assert_eq!(
            Transaction::consensus_decode(&bytes),
            Err(DecodeError::InvalidData("unknown input tag"))
        );

        let mut bytes = hex_to_bytes(GENESIS_COINBASE_TX_HEX).expect("hex");
        bytes[0] = 0x03;
        assert_eq!(
            Transaction::consensus_decode(&bytes),
            Err(DecodeError::InvalidData("unsupported transaction version"))
        );
    }

    #[test]
    fn truncated_signatures_fail() {
        let tx = Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput {
                amount: 1,
                output_indexes: vec![0],
                key_image: [9u8; 32],
            })],
            outputs: vec![],
            extra: vec![],
            signatures: vec![vec![[1u8; 64]]],
        };
        let mut bytes = tx.consensus_encode();
        bytes.truncate(bytes.len() - 1);
        assert_eq!(
            Transaction::consensus_decode(&bytes),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn input_values_map_to_monetary_view() {
        let input = TransactionInput::Multisignature(MultisignatureInput {
            amount: 10,
            signature_count: 1,
            output_index: 0,
            term: 0,
        });
        assert_eq!(input.value(), InputValue::Multisignature { amount: 10, term: 0 });
        assert_eq!(TransactionInput::Base { block_index: 3 }.value(), InputValue::Base);
    }
}
