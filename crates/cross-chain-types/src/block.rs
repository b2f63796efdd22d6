//! Chain RPC views of blocks and unspent outputs

use crate::hash::{Hash256, ProgramHash};
use crate::transaction::{OutPoint, Transaction};
use serde::{Deserialize, Serialize};

/// Block as returned by `getblockbyheight`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: Hash256,
    pub height: u32,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Unspent output as returned by `listunspent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoInfo {
    pub tx_id: Hash256,
    pub index: u16,
    pub address: ProgramHash,
    pub amount: u64,
    #[serde(default)]
    pub output_lock: u32,
}

impl UtxoInfo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_id, self.index)
    }
}
