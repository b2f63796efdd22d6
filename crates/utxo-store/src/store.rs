//! Persistent UTXO store
//!
//! Uses a sled tree per tracked chain. Records are keyed by an insertion
//! counter so iteration order is the order outputs were first seen, which is
//! the spending order every arbiter agrees on.
//!
//! Readers take the shared lock and always see whole blocks; the synchronizer
//! is the only writer and holds the exclusive lock across the sled batch and
//! the in-memory update.

use crate::error::StoreError;
use crate::record::{BlockApplied, UtxoOp, UtxoRecord};
use cross_chain_types::{OutPoint, ProgramHash};
use parking_lot::RwLock;
use sled::{Batch, Db, Tree};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const RECORD_PREFIX: u8 = b'u';
const HEIGHT_KEY: &[u8] = b"m:height";
const NEXT_SEQ_KEY: &[u8] = b"m:next_seq";

fn record_key(seq: u64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = RECORD_PREFIX;
    key[1..].copy_from_slice(&seq.to_be_bytes());
    key
}

/// In-memory mirror of one chain's tree
#[derive(Default)]
struct ChainView {
    by_seq: BTreeMap<u64, UtxoRecord>,
    index: HashMap<OutPoint, u64>,
    next_seq: u64,
    height: u32,
}

impl ChainView {
    fn insert(&mut self, seq: u64, record: UtxoRecord) {
        self.index.insert(record.outpoint(), seq);
        self.by_seq.insert(seq, record);
    }

    fn remove(&mut self, seq: u64) {
        if let Some(record) = self.by_seq.remove(&seq) {
            self.index.remove(&record.outpoint());
        }
    }
}

/// UTXO view and sync cursor for one chain
pub struct UtxoStore {
    chain_id: String,
    tree: Tree,
    view: RwLock<ChainView>,
}

impl UtxoStore {
    /// Open the tree for `chain_id` and load it into memory
    pub fn open(db: &Db, chain_id: &str) -> Result<Self, StoreError> {
        let tree = db.open_tree(format!("utxo/{}", chain_id))?;
        let mut view = ChainView::default();

        for entry in tree.scan_prefix([RECORD_PREFIX]) {
            let (key, value) = entry?;
            let seq_bytes = <[u8; 8]>::try_from(&key[1..])
                .map_err(|_| StoreError::Corrupted(format!("record key of {} bytes", key.len())))?;
            let record: UtxoRecord = bincode::deserialize(&value)?;
            view.insert(u64::from_be_bytes(seq_bytes), record);
        }

        view.next_seq = match tree.get(NEXT_SEQ_KEY)? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupted("next sequence".to_string()))?,
            ),
            None => view.by_seq.keys().next_back().map(|s| s + 1).unwrap_or(0),
        };

        view.height = match tree.get(HEIGHT_KEY)? {
            Some(bytes) => u32::from_be_bytes(
                bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupted("sync height".to_string()))?,
            ),
            None => 0,
        };

        tracing::info!(
            "Opened UTXO store for chain {}: {} records, height {}",
            chain_id,
            view.by_seq.len(),
            view.height
        );

        Ok(Self {
            chain_id: chain_id.to_string(),
            tree,
            view: RwLock::new(view),
        })
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Insert a record; returns false if the outpoint is already live
    pub fn add_utxo(&self, record: UtxoRecord) -> Result<bool, StoreError> {
        let mut view = self.view.write();
        if view.index.contains_key(&record.outpoint()) {
            return Ok(false);
        }

        let seq = view.next_seq;
        let mut batch = Batch::default();
        batch.insert(&record_key(seq)[..], bincode::serialize(&record)?);
        batch.insert(NEXT_SEQ_KEY, &(seq + 1).to_be_bytes()[..]);
        self.tree.apply_batch(batch)?;

        view.next_seq = seq + 1;
        view.insert(seq, record);
        Ok(true)
    }

    /// Remove a record; returns false if it was not live
    pub fn delete_utxo(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        let mut view = self.view.write();
        let Some(seq) = view.index.get(outpoint).copied() else {
            return Ok(false);
        };

        self.tree.remove(record_key(seq))?;
        view.remove(seq);
        Ok(true)
    }

    /// Live records for a genesis address, oldest first
    pub fn get_utxos(&self, genesis_address: &ProgramHash) -> Vec<UtxoRecord> {
        self.view
            .read()
            .by_seq
            .values()
            .filter(|r| &r.genesis_address == genesis_address)
            .cloned()
            .collect()
    }

    /// Every live record, oldest first
    pub fn all_utxos(&self) -> Vec<UtxoRecord> {
        self.view.read().by_seq.values().cloned().collect()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.view.read().index.contains_key(outpoint)
    }

    /// Next height the synchronizer will fetch
    pub fn current_height(&self) -> u32 {
        self.view.read().height
    }

    pub fn set_height(&self, height: u32) -> Result<(), StoreError> {
        let mut view = self.view.write();
        if height < view.height {
            return Err(StoreError::HeightRegression {
                current: view.height,
                requested: height,
            });
        }
        self.tree.insert(HEIGHT_KEY, &height.to_be_bytes()[..])?;
        view.height = height;
        Ok(())
    }

    /// Apply one block's operations and move the cursor in a single batch
    ///
    /// Adds of live outpoints and deletes of unknown outpoints are no-ops, so
    /// a block may be applied more than once.
    pub fn apply_block(&self, ops: &[UtxoOp], next_height: u32) -> Result<BlockApplied, StoreError> {
        let mut view = self.view.write();
        if next_height < view.height {
            return Err(StoreError::HeightRegression {
                current: view.height,
                requested: next_height,
            });
        }

        // Outpoints touched by this block: Some(seq) live, None spent
        let mut overlay: HashMap<OutPoint, Option<u64>> = HashMap::new();
        let mut added: Vec<(u64, UtxoRecord)> = Vec::new();
        let mut removed: Vec<u64> = Vec::new();
        let mut next_seq = view.next_seq;

        for op in ops {
            match op {
                UtxoOp::Add(record) => {
                    let outpoint = record.outpoint();
                    let live = match overlay.get(&outpoint) {
                        Some(state) => *state,
                        None => view.index.get(&outpoint).copied(),
                    };
                    if live.is_none() {
                        overlay.insert(outpoint, Some(next_seq));
                        added.push((next_seq, record.clone()));
                        next_seq += 1;
                    }
                }
                UtxoOp::Delete(outpoint) => {
                    let live = match overlay.get(outpoint) {
                        Some(state) => *state,
                        None => view.index.get(outpoint).copied(),
                    };
                    if let Some(seq) = live {
                        overlay.insert(*outpoint, None);
                        removed.push(seq);
                    }
                }
            }
        }

        let mut batch = Batch::default();
        for (seq, record) in &added {
            if !removed.contains(seq) {
                batch.insert(&record_key(*seq)[..], bincode::serialize(record)?);
            }
        }
        for seq in &removed {
            batch.remove(&record_key(*seq)[..]);
        }
        batch.insert(NEXT_SEQ_KEY, &next_seq.to_be_bytes()[..]);
        batch.insert(HEIGHT_KEY, &next_height.to_be_bytes()[..]);
        self.tree.apply_batch(batch)?;

        let applied = BlockApplied {
            added: added.iter().filter(|(s, _)| !removed.contains(s)).count(),
            removed: removed.iter().filter(|s| view.by_seq.contains_key(s)).count(),
        };
        for (seq, record) in added {
            view.insert(seq, record);
        }
        for seq in removed {
            view.remove(seq);
        }
        view.next_seq = next_seq;
        view.height = next_height;

        Ok(applied)
    }

    /// Get record count
    pub fn len(&self) -> usize {
        self.view.read().by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.read().by_seq.is_empty()
    }

    /// Sum of live amounts for a genesis address
    pub fn balance(&self, genesis_address: &ProgramHash) -> u64 {
        self.view
            .read()
            .by_seq
            .values()
            .filter(|r| &r.genesis_address == genesis_address)
            .map(|r| r.amount)
            .sum()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Sled database holding one UTXO tree per chain
pub struct PersistentStore {
    db: Db,
}

impl PersistentStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(&path)?;
        tracing::info!("Opened persistent store at {:?}", path.as_ref());
        Ok(Self { db })
    }

    /// Open the store for one chain
    pub fn chain_store(&self, chain_id: &str) -> Result<UtxoStore, StoreError> {
        UtxoStore::open(&self.db, chain_id)
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
