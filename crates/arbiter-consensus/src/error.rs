//! Consensus errors

use chain_bridge::BridgeError;
use cross_chain_types::{Hash256, PublicKey};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("arbitrator set is empty")]
    EmptySet,

    #[error("arbitrator {0} listed twice")]
    DuplicateArbitrator(PublicKey),

    #[error("update at height {effective} is retroactive (current {current})")]
    RetroactiveUpdate { effective: u32, current: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("peer version {version} below minimum {minimum}")]
    VersionTooLow { version: u32, minimum: u32 },

    #[error("network magic {actual} does not match {expected}")]
    MagicMismatch { expected: u32, actual: u32 },
}

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("account {0} not found")]
    UnknownAccount(String),

    #[error("wrong password for account {0}")]
    WrongPassword(String),

    #[error("account {0} already exists")]
    DuplicateAccount(String),

    #[error("keystore is corrupted: {0}")]
    Corrupted(String),

    #[error("keystore io: {0}")]
    Io(#[from] std::io::Error),

    #[error("keystore format: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("not on duty at height {height}")]
    NotOnDuty { height: u32 },

    #[error("local key is not an arbitrator at height {height}")]
    NotArbitrator { height: u32 },

    #[error("proposer {proposer} is not on duty at height {height}")]
    ProposerNotOnDuty { proposer: PublicKey, height: u32 },

    #[error("{signer} is not an arbitrator at height {height}")]
    UnknownSigner { signer: PublicKey, height: u32 },

    #[error("invalid signature from {0}")]
    InvalidSignature(PublicKey),

    #[error("intent {0} has not been observed on chain")]
    UnobservedIntent(Hash256),

    #[error("intent {0} differs from the one observed on chain")]
    IntentMismatch(Hash256),

    #[error("proposal mismatch: proposed {proposed}, rebuilt {rebuilt}")]
    ProposalMismatch { proposed: Hash256, rebuilt: Hash256 },

    #[error("proposal {0} is already collecting")]
    AlreadyProposed(Hash256),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Router(#[from] RouterError),
}
