//! UTXO Store - local view of custodial outputs
//!
//! Tracks the unspent outputs paying side chain genesis addresses together
//! with the sync cursor of the chain they live on:
//! - in-memory, insertion-ordered view for transaction building
//! - sled persistence so restarts resume without re-scanning
//! - block deltas and cursor advance committed as one batch

pub mod error;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use record::{BlockApplied, UtxoOp, UtxoRecord};
pub use store::{PersistentStore, UtxoStore};
