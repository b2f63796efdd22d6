//! Errors for parsing and building shared types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid base58 encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("address checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid multisig policy: {required} of {total}")]
    InvalidPolicy { required: usize, total: usize },
}
