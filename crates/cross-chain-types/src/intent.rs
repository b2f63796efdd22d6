//! Deposit and withdraw intents
//!
//! `DepositInfo` and `WithdrawInfo` are parsed out of confirmed user
//! transactions. A `CrossChainIntent` bundles them with the source
//! transaction so any arbiter can rebuild the counterpart transaction.

use crate::hash::{Hash256, ProgramHash};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Main chain deposit destined for a side chain account
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct DepositInfo {
    pub main_chain_program_hash: ProgramHash,
    pub target_program_hash: ProgramHash,
    pub amount: u64,
}

/// Side chain withdraw destined for a main chain address
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct WithdrawInfo {
    pub target_address: ProgramHash,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IntentKind {
    Withdraw,
    Deposit,
}

#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
#[serde(tag = "kind")]
pub enum CrossChainIntent {
    /// Pay main chain targets out of a side chain's genesis address
    Withdraw {
        genesis_address: ProgramHash,
        side_chain_transaction: Hash256,
        targets: Vec<WithdrawInfo>,
    },
    /// Mint side chain outputs for a main chain deposit
    Deposit {
        genesis_address: ProgramHash,
        main_chain_transaction: Hash256,
        deposits: Vec<DepositInfo>,
    },
}

impl CrossChainIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Self::Withdraw { .. } => IntentKind::Withdraw,
            Self::Deposit { .. } => IntentKind::Deposit,
        }
    }

    /// Transaction on the other chain that caused this intent
    pub fn source_transaction(&self) -> Hash256 {
        match self {
            Self::Withdraw {
                side_chain_transaction,
                ..
            } => *side_chain_transaction,
            Self::Deposit {
                main_chain_transaction,
                ..
            } => *main_chain_transaction,
        }
    }

    /// Side chain this intent belongs to
    pub fn genesis_address(&self) -> ProgramHash {
        match self {
            Self::Withdraw {
                genesis_address, ..
            }
            | Self::Deposit {
                genesis_address, ..
            } => *genesis_address,
        }
    }

    pub fn total_amount(&self) -> u64 {
        match self {
            Self::Withdraw { targets, .. } => targets.iter().map(|t| t.amount).sum(),
            Self::Deposit { deposits, .. } => deposits.iter().map(|d| d.amount).sum(),
        }
    }
}
