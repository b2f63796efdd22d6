//! Arbiter Consensus - threshold signing of cross-chain transactions
//!
//! Architecture:
//! - The arbitrator group rotates one on-duty arbitrator per main chain height
//! - The on-duty arbitrator builds a transaction, signs it and broadcasts a proposal
//! - Every other arbitrator rebuilds the transaction from the intent, and signs
//!   and answers with feedback only if the bytes match
//! - Once a quorum of signatures is merged the proposer submits the transaction

pub mod client;
pub mod error;
pub mod group;
pub mod listener;
pub mod network;
pub mod proposal;
pub mod router;
pub mod server;
pub mod types;
pub mod wallet;

#[cfg(test)]
mod tests;

pub use client::ProposalClient;
pub use error::{ConsensusError, GroupError, RouterError, WalletError};
pub use group::ArbitratorGroup;
pub use listener::{ComplainListener, ProposalListener};
pub use network::{Broadcaster, NetworkConfig, PeerAddress, PeerNetwork};
pub use proposal::{Proposal, ProposalState, ProposalSummary};
pub use router::{MessageRouter, PeerMessageListener};
pub use server::{FeedbackOutcome, IntentDispatcher, ProposalServer};
pub use types::*;
pub use wallet::{verify_signature, AccountSigner, LocalWallet, Wallet};
