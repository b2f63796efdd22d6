//! In-memory chain for tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cross_chain_types::{
    AttributeUsage, BlockInfo, Hash256, Payload, ProgramHash, PublicKey, Transaction,
    TxAttribute, TxInput, TxOutput, UtxoInfo,
};
use parking_lot::Mutex;
use utxo_store::{PersistentStore, UtxoStore};

use crate::error::RpcError;
use crate::rpc::ChainRpc;

static NONCE: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
pub struct MockChain {
    blocks: Mutex<Vec<BlockInfo>>,
    failing_heights: Mutex<HashSet<u32>>,
    unspent: Mutex<Vec<UtxoInfo>>,
    executed: Mutex<HashSet<Hash256>>,
    sent: Mutex<Vec<Vec<u8>>>,
    block_requests: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_block(&self, transactions: Vec<Transaction>) {
        let mut blocks = self.blocks.lock();
        let height = blocks.len() as u32;
        blocks.push(BlockInfo {
            hash: Hash256::digest(&height.to_le_bytes()),
            height,
            transactions,
        });
    }

    pub fn fail_block_at(&self, height: u32) {
        self.failing_heights.lock().insert(height);
    }

    pub fn clear_failures(&self) {
        self.failing_heights.lock().clear();
    }

    pub fn set_unspent(&self, utxos: Vec<UtxoInfo>) {
        *self.unspent.lock() = utxos;
    }

    pub fn mark_executed(&self, source_tx: Hash256) {
        self.executed.lock().insert(source_tx);
    }

    pub fn block_requests(&self) -> usize {
        self.block_requests.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_current_height(&self) -> Result<u32, RpcError> {
        let blocks = self.blocks.lock();
        Ok((blocks.len() as u32).saturating_sub(1))
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, RpcError> {
        self.block_requests.fetch_add(1, Ordering::SeqCst);
        if self.failing_heights.lock().contains(&height) {
            return Err(RpcError::Transport("connection refused".to_string()));
        }
        self.blocks
            .lock()
            .get(height as usize)
            .cloned()
            .ok_or_else(|| RpcError::Remote {
                code: -1,
                message: format!("unknown block {}", height),
            })
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash256, RpcError> {
        let tx = Transaction::from_bytes(raw).map_err(|e| RpcError::Decode(e.to_string()))?;
        self.sent.lock().push(raw.to_vec());
        Ok(tx.hash())
    }

    async fn get_unspent_utxos(&self, addresses: &[ProgramHash]) -> Result<Vec<UtxoInfo>, RpcError> {
        Ok(self
            .unspent
            .lock()
            .iter()
            .filter(|u| addresses.contains(&u.address))
            .cloned()
            .collect())
    }

    async fn get_exist_cross_chain_transactions(
        &self,
        source_txs: &[Hash256],
    ) -> Result<Vec<Hash256>, RpcError> {
        let executed = self.executed.lock();
        Ok(source_txs
            .iter()
            .filter(|h| executed.contains(h))
            .copied()
            .collect())
    }
}

pub fn temp_store(chain_id: &str) -> (tempfile::TempDir, Arc<UtxoStore>) {
    let dir = tempfile::tempdir().unwrap();
    let db = PersistentStore::open(dir.path()).unwrap();
    let store = db.chain_store(chain_id).unwrap();
    (dir, Arc::new(store))
}

pub fn genesis() -> ProgramHash {
    ProgramHash::genesis(&Hash256::digest(b"side chain one"))
}

pub fn destroy() -> ProgramHash {
    ProgramHash::new([0u8; 21])
}

pub fn key(seed: u8) -> PublicKey {
    PublicKey::new([seed; 32])
}

pub fn user() -> ProgramHash {
    ProgramHash::standard(&key(200))
}

/// Plain transfer with a unique nonce so equal contents hash apart
pub fn transfer(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Transaction {
    let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
    Transaction {
        payload: Payload::TransferAsset,
        attributes: vec![TxAttribute::new(AttributeUsage::Nonce, nonce.to_le_bytes().to_vec())],
        inputs,
        outputs,
        lock_time: 0,
        programs: vec![],
    }
}

pub fn coinbase(outputs: Vec<TxOutput>) -> Transaction {
    let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
    Transaction {
        payload: Payload::CoinBase {
            data: nonce.to_le_bytes().to_vec(),
        },
        attributes: vec![],
        inputs: vec![],
        outputs,
        lock_time: 0,
        programs: vec![],
    }
}

pub fn utxo_info(tx_id: Hash256, index: u16, amount: u64) -> UtxoInfo {
    UtxoInfo {
        tx_id,
        index,
        address: genesis(),
        amount,
        output_lock: 0,
    }
}
