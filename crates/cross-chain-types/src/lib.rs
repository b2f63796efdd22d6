//! Shared types for the cross-chain arbiter
//!
//! Everything that more than one arbiter crate needs to agree on lives here:
//! - hashes, arbitrator keys and program hashes (addresses)
//! - the transaction model shared by the main chain and side chains
//! - multi-signature redeem scripts and signature merging
//! - deposit/withdraw intents and the RPC views of blocks and UTXOs

pub mod block;
pub mod error;
pub mod hash;
pub mod intent;
pub mod multisig;
pub mod transaction;

pub use block::{BlockInfo, UtxoInfo};
pub use error::TypesError;
pub use hash::{Hash256, ProgramHash, PublicKey, Signature};
pub use intent::{CrossChainIntent, DepositInfo, IntentKind, WithdrawInfo};
pub use multisig::{CustodianPolicy, MultiSigPolicy};
pub use transaction::{
    AttributeUsage, OutPoint, Payload, Program, Transaction, TxAttribute, TxInput, TxOutput,
};

/// Blocks a coinbase output must wait before it can be spent
pub const COINBASE_MATURITY: u32 = 100;

/// Script opcodes used by standard, multisig and cross-chain programs
pub mod opcode {
    /// Push the next 32 bytes
    pub const PUSH32: u8 = 0x20;
    /// Push the next 64 bytes (one signature)
    pub const PUSH64: u8 = 0x40;
    pub const CHECKSIG: u8 = 0xac;
    pub const CHECKMULTISIG: u8 = 0xae;
    pub const CROSSCHAIN: u8 = 0xaf;
}

/// Program hash prefixes
pub mod prefix {
    /// Single-key account
    pub const STANDARD: u8 = 0x21;
    /// M-of-N custodian account
    pub const MULTISIG: u8 = 0x12;
    /// Side chain genesis (cross-chain) account
    pub const CROSSCHAIN: u8 = 0x4b;
}
