//! RPC Methods - status method handlers
//!
//! Every handler is a read-only view over the running arbiter.

use std::sync::Arc;

use arbiter_consensus::{ArbitratorGroup, PeerNetwork, ProposalServer, ProposalSummary};
use chain_bridge::ChainSynchronizer;
use cross_chain_types::{CrossChainIntent, ProgramHash, PublicKey};
use serde::Serialize;
use utxo_store::UtxoRecord;

/// RPC context shared across handlers
pub struct RpcContext {
    pub group: Arc<ArbitratorGroup>,
    pub synchronizers: Vec<Arc<ChainSynchronizer>>,
    pub servers: Vec<Arc<ProposalServer>>,
    pub network: Option<Arc<PeerNetwork>>,
}

impl RpcContext {
    pub fn new(group: Arc<ArbitratorGroup>) -> Self {
        Self {
            group,
            synchronizers: Vec::new(),
            servers: Vec::new(),
            network: None,
        }
    }

    pub fn with_synchronizer(mut self, synchronizer: Arc<ChainSynchronizer>) -> Self {
        self.synchronizers.push(synchronizer);
        self
    }

    pub fn with_server(mut self, server: Arc<ProposalServer>) -> Self {
        self.servers.push(server);
        self
    }

    pub fn with_network(mut self, network: Arc<PeerNetwork>) -> Self {
        self.network = Some(network);
        self
    }

    fn synchronizer(&self, chain: &str) -> Result<&Arc<ChainSynchronizer>, RpcError> {
        self.synchronizers
            .iter()
            .find(|s| s.name() == chain)
            .ok_or_else(|| RpcError::InvalidParams(format!("Unknown chain: {}", chain)))
    }
}

// ============ Response Types ============

#[derive(Debug, Serialize)]
pub struct ArbiterInfo {
    pub public_key: PublicKey,
    pub height: u32,
    pub on_duty: PublicKey,
    pub is_on_duty: bool,
    pub arbitrators: Vec<PublicKey>,
    pub required_signatures: usize,
    pub connected_peers: Vec<PublicKey>,
}

#[derive(Debug, Serialize)]
pub struct ChainHeight {
    pub chain: String,
    /// Last applied block, absent before the first one
    pub height: Option<u32>,
    pub syncing: bool,
    pub utxos: usize,
}

#[derive(Debug, Serialize)]
pub struct ChainProposals {
    pub chain: String,
    pub command: String,
    pub proposals: Vec<ProposalSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChainIntents {
    pub chain: String,
    pub command: String,
    pub intents: Vec<CrossChainIntent>,
}

// ============ RPC Handlers ============

/// Handle getarbiterinfo RPC method
pub fn handle_get_arbiter_info(ctx: &RpcContext) -> Result<ArbiterInfo, RpcError> {
    let height = ctx.group.current_height();
    Ok(ArbiterInfo {
        public_key: ctx.group.local_key(),
        height,
        on_duty: ctx.group.on_duty_arbitrator(height),
        is_on_duty: ctx.group.is_on_duty(height),
        arbitrators: ctx.group.arbitrators_at(height),
        required_signatures: ctx.group.required_quorum(height),
        connected_peers: ctx
            .network
            .as_ref()
            .map(|n| n.connected_peers())
            .unwrap_or_default(),
    })
}

/// Handle getsyncheight RPC method; every chain when `chain` is absent
pub fn handle_get_sync_height(
    ctx: &RpcContext,
    chain: Option<&str>,
) -> Result<Vec<ChainHeight>, RpcError> {
    let selected = match chain {
        Some(name) => vec![ctx.synchronizer(name)?],
        None => ctx.synchronizers.iter().collect(),
    };

    Ok(selected
        .into_iter()
        .map(|s| ChainHeight {
            chain: s.name().to_string(),
            height: s.synced_height(),
            syncing: s.is_syncing(),
            utxos: s.store().len(),
        })
        .collect())
}

/// Handle listunspent RPC method
pub fn handle_list_unspent(
    ctx: &RpcContext,
    chain: &str,
    address: Option<&str>,
) -> Result<Vec<UtxoRecord>, RpcError> {
    let store = ctx.synchronizer(chain)?.store();
    match address {
        Some(address) => {
            let genesis = ProgramHash::from_address(address)
                .map_err(|e| RpcError::InvalidParams(format!("Invalid address: {}", e)))?;
            Ok(store.get_utxos(&genesis))
        }
        None => Ok(store.all_utxos()),
    }
}

/// Handle getpendingproposals RPC method
pub fn handle_get_pending_proposals(ctx: &RpcContext) -> Result<Vec<ChainProposals>, RpcError> {
    Ok(ctx
        .servers
        .iter()
        .map(|s| ChainProposals {
            chain: s.node().name().to_string(),
            command: s.command().to_string(),
            proposals: s.pending_proposals(),
        })
        .collect())
}

/// Handle getintents RPC method
pub fn handle_get_intents(ctx: &RpcContext) -> Result<Vec<ChainIntents>, RpcError> {
    Ok(ctx
        .servers
        .iter()
        .map(|s| ChainIntents {
            chain: s.node().name().to_string(),
            command: s.command().to_string(),
            intents: s.intents(),
        })
        .collect())
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
}

impl RpcError {
    /// JSON-RPC 2.0 error code
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidParams(_) => -32602,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InternalError(_) => -32603,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chain_bridge::{ChainRpc, RpcError as ChainRpcError};
    use cross_chain_types::{BlockInfo, Hash256, UtxoInfo};
    use tempfile::TempDir;
    use utxo_store::PersistentStore;

    /// Chain that is never reached by status queries
    struct OfflineChain;

    #[async_trait]
    impl ChainRpc for OfflineChain {
        async fn get_current_height(&self) -> Result<u32, ChainRpcError> {
            Err(ChainRpcError::Transport("offline".to_string()))
        }

        async fn get_block_by_height(&self, _height: u32) -> Result<BlockInfo, ChainRpcError> {
            Err(ChainRpcError::Transport("offline".to_string()))
        }

        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<Hash256, ChainRpcError> {
            Err(ChainRpcError::Transport("offline".to_string()))
        }

        async fn get_unspent_utxos(
            &self,
            _addresses: &[ProgramHash],
        ) -> Result<Vec<UtxoInfo>, ChainRpcError> {
            Err(ChainRpcError::Transport("offline".to_string()))
        }

        async fn get_exist_cross_chain_transactions(
            &self,
            _hashes: &[Hash256],
        ) -> Result<Vec<Hash256>, ChainRpcError> {
            Err(ChainRpcError::Transport("offline".to_string()))
        }
    }

    fn key(b: u8) -> PublicKey {
        PublicKey::new([b; 32])
    }

    pub(crate) fn genesis() -> ProgramHash {
        ProgramHash::genesis(&Hash256::digest(b"side"))
    }

    pub(crate) fn test_context(dir: &TempDir) -> RpcContext {
        let db = PersistentStore::open(dir.path()).unwrap();
        let store = Arc::new(db.chain_store("main").unwrap());
        store
            .add_utxo(UtxoRecord {
                referenced_tx_id: Hash256::digest(b"deposit"),
                output_index: 0,
                sequence: 0,
                amount: 5,
                genesis_address: genesis(),
                destroy_address: ProgramHash::new([0; 21]),
            })
            .unwrap();
        store.set_height(11).unwrap();

        let group = Arc::new(ArbitratorGroup::new(key(2), vec![key(1), key(2), key(3)], None).unwrap());
        let synchronizer = Arc::new(ChainSynchronizer::new("main", Arc::new(OfflineChain), store));
        RpcContext::new(group).with_synchronizer(synchronizer)
    }

    #[test]
    fn test_arbiter_info() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        ctx.group.set_current_height(4);

        let info = handle_get_arbiter_info(&ctx).unwrap();
        assert_eq!(info.public_key, key(2));
        assert_eq!(info.height, 4);
        assert_eq!(info.on_duty, key(2));
        assert!(info.is_on_duty);
        assert_eq!(info.required_signatures, 2);
        assert!(info.connected_peers.is_empty());
    }

    #[test]
    fn test_sync_height() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);

        let heights = handle_get_sync_height(&ctx, None).unwrap();
        assert_eq!(heights.len(), 1);
        assert_eq!(heights[0].height, Some(10));
        assert_eq!(heights[0].utxos, 1);

        assert!(matches!(
            handle_get_sync_height(&ctx, Some("nowhere")),
            Err(RpcError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_list_unspent_by_address() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);

        let address = genesis().to_address();
        let utxos = handle_list_unspent(&ctx, "main", Some(&address)).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].amount, 5);

        let other = ProgramHash::standard(&key(9)).to_address();
        assert!(handle_list_unspent(&ctx, "main", Some(&other)).unwrap().is_empty());
        assert!(handle_list_unspent(&ctx, "main", Some("not-an-address")).is_err());
    }
}
