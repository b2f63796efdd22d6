//! Bridge errors

use thiserror::Error;
use utxo_store::StoreError;

/// Chain node call failures; all of them are retried on the next schedule
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("node returned error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<jsonrpsee::core::ClientError> for RpcError {
    fn from(e: jsonrpsee::core::ClientError) -> Self {
        use jsonrpsee::core::ClientError;
        match e {
            ClientError::Call(err) => RpcError::Remote {
                code: err.code(),
                message: err.message().to_string(),
            },
            ClientError::ParseError(err) => RpcError::Decode(err.to_string()),
            other => RpcError::Transport(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("transient rpc failure: {0}")]
    TransientRpcFailure(#[from] RpcError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed attribute {index}: {reason}")]
    MalformedAttribute { index: usize, reason: String },

    #[error("invalid withdraw: {0}")]
    InvalidWithdraw(String),

    #[error("chain {chain} does not handle this intent")]
    UnsupportedIntent { chain: String },
}
