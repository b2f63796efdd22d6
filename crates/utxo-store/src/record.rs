//! UTXO records and block deltas

use cross_chain_types::{Hash256, OutPoint, ProgramHash, TxInput};
use serde::{Deserialize, Serialize};

/// Unspent output controlled by a genesis address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub referenced_tx_id: Hash256,
    pub output_index: u16,
    /// Output lock, or coinbase maturity height
    pub sequence: u32,
    pub amount: u64,
    pub genesis_address: ProgramHash,
    pub destroy_address: ProgramHash,
}

impl UtxoRecord {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.referenced_tx_id, self.output_index)
    }

    /// Input spending this output
    pub fn to_input(&self) -> TxInput {
        TxInput {
            refer_tx_id: self.referenced_tx_id,
            refer_output_index: self.output_index,
            sequence: self.sequence,
        }
    }
}

/// One mutation derived from a block, applied in block order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoOp {
    Add(UtxoRecord),
    Delete(OutPoint),
}

/// Effect of applying one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockApplied {
    pub added: usize,
    pub removed: usize,
}
