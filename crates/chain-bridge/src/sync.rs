//! Chain Synchronizer - keeps a UTXO store in step with a chain
//!
//! Blocks are pulled one height at a time. Each block is turned into a list of
//! [`UtxoOp`]s and committed together with the next cursor, so a crash between
//! blocks resumes at the first unapplied height and a crash inside a block
//! replays the whole block.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cross_chain_types::{BlockInfo, ProgramHash, Transaction, COINBASE_MATURITY};
use parking_lot::RwLock;
use utxo_store::{UtxoOp, UtxoRecord, UtxoStore};

use crate::error::BridgeError;
use crate::rpc::ChainRpc;

/// Observer of confirmed transactions, called after the block is committed
pub trait AccountListener: Send + Sync {
    fn on_transaction_confirmed(&self, tx: &Transaction, height: u32);
}

/// Result of one sync trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to fetch; `height` is the local cursor
    Idle { height: u32 },
    /// Another sync was already running, this trigger was dropped
    InProgress,
    /// Blocks `from..to` were applied
    Synced { from: u32, to: u32 },
}

/// Result of comparing the store against the node's unspent set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReport {
    /// A sync held the store, or the cursor is behind the tip
    Skipped,
    Compared {
        /// Local records the node reports as spent
        stale: usize,
        /// Node outputs not present locally
        missing: usize,
    },
}

/// Resets the single-flight flag on every exit path
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ChainSynchronizer {
    name: String,
    rpc: Arc<dyn ChainRpc>,
    store: Arc<UtxoStore>,
    /// Genesis address -> destroy address of the side chain it custodies
    tracked: BTreeMap<ProgramHash, ProgramHash>,
    listeners: RwLock<Vec<Arc<dyn AccountListener>>>,
    syncing: AtomicBool,
}

impl ChainSynchronizer {
    pub fn new(name: impl Into<String>, rpc: Arc<dyn ChainRpc>, store: Arc<UtxoStore>) -> Self {
        Self {
            name: name.into(),
            rpc,
            store,
            tracked: BTreeMap::new(),
            listeners: RwLock::new(Vec::new()),
            syncing: AtomicBool::new(false),
        }
    }

    /// Track outputs paying `genesis_address`
    pub fn with_tracked_address(
        mut self,
        genesis_address: ProgramHash,
        destroy_address: ProgramHash,
    ) -> Self {
        self.tracked.insert(genesis_address, destroy_address);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn AccountListener>) {
        self.listeners.write().push(listener);
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn store(&self) -> &Arc<UtxoStore> {
        &self.store
    }

    pub fn tracked_addresses(&self) -> impl Iterator<Item = &ProgramHash> {
        self.tracked.keys()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Last applied height, `None` before the first block
    pub fn synced_height(&self) -> Option<u32> {
        self.store.current_height().checked_sub(1)
    }

    /// Pull and apply every block between the local cursor and the remote tip.
    ///
    /// Only one sync runs at a time; a trigger that arrives while one is
    /// running returns [`SyncOutcome::InProgress`] without doing anything.
    /// An RPC failure aborts the run; blocks committed before it stay.
    pub async fn sync(&self) -> Result<SyncOutcome, BridgeError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("[{}] Sync already running, skipping trigger", self.name);
            return Ok(SyncOutcome::InProgress);
        }
        let _guard = SyncGuard(&self.syncing);

        let remote_height = self.rpc.get_current_height().await?;
        let start = self.store.current_height();
        if start >= remote_height {
            return Ok(SyncOutcome::Idle { height: start });
        }

        for height in start..remote_height {
            let block = self.rpc.get_block_by_height(height).await.map_err(|e| {
                tracing::warn!("[{}] Fetching block {} failed: {}", self.name, height, e);
                e
            })?;

            let ops = self.block_ops(&block);
            let applied = self.store.apply_block(&ops, height + 1)?;
            tracing::debug!(
                "[{}] Applied block {} (+{} -{})",
                self.name,
                height,
                applied.added,
                applied.removed
            );

            self.notify(&block);
        }

        tracing::info!(
            "[{}] Synced blocks {}..{} ({} utxos tracked)",
            self.name,
            start,
            remote_height,
            self.store.len()
        );
        Ok(SyncOutcome::Synced {
            from: start,
            to: remote_height,
        })
    }

    /// UTXO mutations a block implies, in block order
    pub fn block_ops(&self, block: &BlockInfo) -> Vec<UtxoOp> {
        let mut ops = Vec::new();
        for tx in &block.transactions {
            let tx_id = tx.hash();
            for (index, output) in tx.outputs.iter().enumerate() {
                let Some(destroy_address) = self.tracked.get(&output.program_hash) else {
                    continue;
                };
                let Ok(output_index) = u16::try_from(index) else {
                    tracing::warn!("[{}] Output index {} of {} out of range", self.name, index, tx_id);
                    continue;
                };
                let sequence = if tx.is_coinbase() {
                    block.height + COINBASE_MATURITY
                } else {
                    output.output_lock
                };
                ops.push(UtxoOp::Add(UtxoRecord {
                    referenced_tx_id: tx_id,
                    output_index,
                    sequence,
                    amount: output.value,
                    genesis_address: output.program_hash,
                    destroy_address: *destroy_address,
                }));
            }
            for input in &tx.inputs {
                ops.push(UtxoOp::Delete(input.outpoint()));
            }
        }
        ops
    }

    fn notify(&self, block: &BlockInfo) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        for tx in &block.transactions {
            for listener in &listeners {
                listener.on_transaction_confirmed(tx, block.height);
            }
        }
    }

    /// Compare the store with the node's unspent set without touching it.
    ///
    /// Only [`sync`](Self::sync) writes the store. Runs only when the cursor
    /// is at the remote tip and no sync holds the store.
    pub async fn reconcile(&self) -> Result<ReconcileReport, BridgeError> {
        if self.tracked.is_empty() {
            return Ok(ReconcileReport::Compared { stale: 0, missing: 0 });
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(ReconcileReport::Skipped);
        }
        let _guard = SyncGuard(&self.syncing);

        let cursor = self.store.current_height();
        if cursor < self.rpc.get_current_height().await? {
            return Ok(ReconcileReport::Skipped);
        }

        let addresses: Vec<ProgramHash> = self.tracked.keys().copied().collect();
        let remote = self.rpc.get_unspent_utxos(&addresses).await?;
        let remote_set: HashSet<_> = remote.iter().map(|u| u.outpoint()).collect();

        let stale = self
            .store
            .all_utxos()
            .iter()
            .filter(|r| !remote_set.contains(&r.outpoint()))
            .count();
        let missing = remote
            .iter()
            .filter(|u| !self.store.contains(&u.outpoint()))
            .count();

        if stale > 0 || missing > 0 {
            tracing::warn!(
                "[{}] Store diverges from node at height {}: {} stale, {} missing",
                self.name,
                cursor,
                stale,
                missing
            );
        }
        Ok(ReconcileReport::Compared { stale, missing })
    }
}
