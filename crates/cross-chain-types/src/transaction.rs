//! Transaction model shared by the main chain and side chains

use crate::hash::{Hash256, ProgramHash};
use crate::opcode;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Reference to a transaction output
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct OutPoint {
    pub tx_id: Hash256,
    pub index: u16,
}

impl OutPoint {
    pub const fn new(tx_id: Hash256, index: u16) -> Self {
        Self { tx_id, index }
    }

    /// Fixed-width key: tx id followed by the big-endian index
    pub fn to_key(&self) -> [u8; 34] {
        let mut key = [0u8; 34];
        key[..32].copy_from_slice(self.tx_id.as_bytes());
        key[32..].copy_from_slice(&self.index.to_be_bytes());
        key
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TxInput {
    pub refer_tx_id: Hash256,
    pub refer_output_index: u16,
    pub sequence: u32,
}

impl TxInput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.refer_tx_id, self.refer_output_index)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TxOutput {
    pub program_hash: ProgramHash,
    pub value: u64,
    pub output_lock: u32,
}

impl TxOutput {
    pub fn new(program_hash: ProgramHash, value: u64) -> Self {
        Self {
            program_hash,
            value,
            output_lock: 0,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum AttributeUsage {
    Nonce,
    Script,
    Memo,
    Description,
    /// Main chain deposit: `public key (32) || output index (1)`
    TargetPublicKey,
    /// Side chain withdraw: `output index (1) || utf8 address`
    CrossChainAddress,
}

#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TxAttribute {
    pub usage: AttributeUsage,
    pub data: Vec<u8>,
}

impl TxAttribute {
    pub fn new(usage: AttributeUsage, data: Vec<u8>) -> Self {
        Self { usage, data }
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(tag = "type")]
pub enum Payload {
    CoinBase {
        #[serde(default)]
        data: Vec<u8>,
    },
    TransferAsset,
    /// User transfer that crosses chains (deposit on the main chain,
    /// withdraw on a side chain)
    TransferCrossChainAsset,
    /// Arbiter-built side chain deposit
    RechargeToSideChain {
        main_chain_transaction_hash: Hash256,
    },
    /// Arbiter-built main chain withdraw
    WithdrawFromSideChain {
        side_chain_transaction_hashes: Vec<Hash256>,
    },
}

/// Spending program: redeem script plus the signatures that satisfy it
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Program {
    pub code: Vec<u8>,
    pub parameter: Vec<u8>,
}

impl Program {
    /// Unsigned program carrying only the redeem script
    pub fn placeholder(redeem_script: Vec<u8>) -> Self {
        Self {
            code: redeem_script,
            parameter: Vec::new(),
        }
    }

    /// Number of signatures pushed in the parameter
    pub fn signature_count(&self) -> usize {
        self.parameter
            .chunks(65)
            .filter(|chunk| chunk.len() == 65 && chunk[0] == opcode::PUSH64)
            .count()
    }

    /// M of an M-of-N redeem script, if the code is one
    pub fn required_signatures(&self) -> Option<usize> {
        match self.code.last() {
            Some(&opcode::CHECKMULTISIG) => self.code.first().map(|m| *m as usize),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Transaction {
    pub payload: Payload,
    #[serde(default)]
    pub attributes: Vec<TxAttribute>,
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub lock_time: u32,
    #[serde(default)]
    pub programs: Vec<Program>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        matches!(self.payload, Payload::CoinBase { .. })
    }

    /// Encode every field except the programs
    fn write_unsigned<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.payload, writer)?;
        BorshSerialize::serialize(&self.attributes, writer)?;
        BorshSerialize::serialize(&self.inputs, writer)?;
        BorshSerialize::serialize(&self.outputs, writer)?;
        BorshSerialize::serialize(&self.lock_time, writer)
    }

    /// Hash of the unsigned content; signatures never change it
    pub fn hash(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        self.write_unsigned(&mut hasher)
            .expect("hashing into memory should not fail");
        Hash256(*hasher.finalize().as_bytes())
    }

    /// Copy with every program parameter cleared
    pub fn unsigned(&self) -> Self {
        let mut tx = self.clone();
        for program in &mut tx.programs {
            program.parameter.clear();
        }
        tx
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Full serialization for submission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Transaction serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::PublicKey;

    fn sample() -> Transaction {
        Transaction {
            payload: Payload::TransferAsset,
            attributes: vec![TxAttribute::new(AttributeUsage::Memo, b"hi".to_vec())],
            inputs: vec![TxInput {
                refer_tx_id: Hash256::digest(b"prev"),
                refer_output_index: 1,
                sequence: 0,
            }],
            outputs: vec![TxOutput::new(
                ProgramHash::standard(&PublicKey::new([1u8; 32])),
                42,
            )],
            lock_time: 0,
            programs: vec![Program::placeholder(vec![1, 2, 3])],
        }
    }

    #[test]
    fn test_hash_ignores_signatures() {
        let tx = sample();
        let mut signed = tx.clone();
        signed.programs[0].parameter = vec![opcode::PUSH64; 65];

        assert_eq!(tx.hash(), signed.hash());
        assert_eq!(signed.unsigned(), tx);
    }

    #[test]
    fn test_hash_covers_outputs() {
        let tx = sample();
        let mut other = tx.clone();
        other.outputs[0].value += 1;
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["payload"]["type"], "TransferAsset");
        assert_eq!(json["outputs"][0]["value"], 42);
    }
}
