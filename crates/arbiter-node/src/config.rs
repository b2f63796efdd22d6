//! Arbiter Configuration
//!
//! Loaded from a JSON file; every field has a default so a config only needs
//! the chains and the arbitrator set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arbiter_consensus::PeerAddress;
use chain_bridge::RpcEndpoint;
use cross_chain_types::{Hash256, ProgramHash};
use serde::{Deserialize, Serialize};

/// Arbiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Network magic; peers with another magic are refused
    pub magic: u32,
    /// Protocol version announced in the handshake, also the minimum accepted
    pub version: u32,
    /// Peer network listen port
    pub node_port: u16,
    /// Status RPC port
    pub http_json_port: u16,
    pub main_node: MainNodeConfig,
    pub side_node_list: Vec<SideNodeConfig>,
    /// Arbitrator set in duty rotation order
    pub arbitrators: Vec<PeerAddress>,
    /// Signatures required per transaction; majority when absent
    pub min_signers: Option<usize>,
    pub sync_interval_ms: u64,
    pub clear_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub proposal_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub rpc_timeout_ms: u64,
    /// Keystore file, relative to the data directory unless absolute
    pub keystore: PathBuf,
    /// Keystore account used for signing
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainNodeConfig {
    pub rpc: RpcEndpoint,
}

impl Default for MainNodeConfig {
    fn default() -> Self {
        Self {
            rpc: RpcEndpoint::new("http://127.0.0.1:20336"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideNodeConfig {
    pub rpc: RpcEndpoint,
    /// Genesis block hash; the custodial genesis address derives from it
    pub genesis_block: Hash256,
    /// Side chain address users burn to when withdrawing
    pub destroy_address: ProgramHash,
}

impl SideNodeConfig {
    pub fn genesis_address(&self) -> ProgramHash {
        ProgramHash::genesis(&self.genesis_block)
    }

    /// Stable chain id used for logs and the UTXO tree
    pub fn chain_name(&self) -> String {
        let mut hash = self.genesis_block.to_string();
        hash.truncate(8);
        format!("side-{}", hash)
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            magic: 0,
            version: 1,
            node_port: 20538,
            http_json_port: 20536,
            main_node: MainNodeConfig::default(),
            side_node_list: Vec::new(),
            arbitrators: Vec::new(),
            min_signers: None,
            sync_interval_ms: 1000,
            clear_interval_ms: 60_000,
            reconnect_interval_ms: 5000,
            proposal_timeout_ms: 60_000,
            handshake_timeout_ms: 5000,
            rpc_timeout_ms: 10_000,
            keystore: PathBuf::from("keystore.json"),
            account: "arbiter".to_string(),
        }
    }
}

impl ArbiterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Reject configurations the arbiter cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.side_node_list.is_empty() {
            bail!("no side chain configured");
        }
        if self.arbitrators.is_empty() {
            bail!("no arbitrators configured");
        }
        let mut names: Vec<String> = self.side_node_list.iter().map(|s| s.chain_name()).collect();
        names.sort();
        names.dedup();
        if names.len() != self.side_node_list.len() {
            bail!("side chain genesis blocks must be distinct");
        }
        Ok(())
    }

    pub fn keystore_path(&self, data_dir: &Path) -> PathBuf {
        if self.keystore.is_absolute() {
            self.keystore.clone()
        } else {
            data_dir.join(&self.keystore)
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn clear_interval(&self) -> Duration {
        Duration::from_millis(self.clear_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
