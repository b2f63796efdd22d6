//! Arbiter status RPC
//!
//! Read-only HTTP JSON-RPC 2.0 endpoint for operators:
//! - getarbiterinfo: identity, group height, duty and peers
//! - getsyncheight: per-chain synchronized height
//! - listunspent: UTXOs held by a genesis address
//! - getpendingproposals / getintents: proposal protocol state

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};
