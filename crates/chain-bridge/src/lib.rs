//! Chain Bridge - chain state and cross-chain transactions
//!
//! Handles everything that talks to a chain node:
//! - polling blocks and keeping the UTXO store in step with the chain
//! - building withdraw (side -> main) and deposit (main -> side) transactions
//! - extracting deposit/withdraw requests from confirmed user transactions
//! - submitting finalized transactions

pub mod builder;
pub mod error;
pub mod node;
pub mod parser;
pub mod rpc;
pub mod sync;
pub mod watcher;

#[cfg(test)]
mod mock;

pub use builder::TransactionBuilder;
pub use error::{BridgeError, RpcError};
pub use node::{ChainNode, IntentSink, MainChainNode, SideChainNode};
pub use parser::{parse_deposit_info, parse_withdraw_info};
pub use rpc::{ChainRpc, JsonRpcChainClient, RpcEndpoint};
pub use sync::{AccountListener, ChainSynchronizer, ReconcileReport, SyncOutcome};
pub use watcher::{DepositWatcher, WithdrawWatcher};
