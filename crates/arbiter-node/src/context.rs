//! Service context - everything the arbiter runs, built once at startup
//!
//! Wiring:
//! - the main chain synchronizer tracks every side chain's genesis address and
//!   feeds deposits to the intent dispatcher
//! - each side chain synchronizer feeds burns to the dispatcher
//! - the dispatcher queues intents on the proposal server of the chain that
//!   realizes them
//! - proposal servers and clients talk to peers through the router and network

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arbiter_consensus::{
    AccountSigner, ArbitratorGroup, Command, ComplainListener, IntentDispatcher, LocalWallet,
    MessageRouter, NetworkConfig, PeerNetwork, ProposalClient, ProposalListener, ProposalServer,
};
use arbiter_rpc::RpcContext;
use chain_bridge::{
    ChainNode, ChainSynchronizer, DepositWatcher, IntentSink, JsonRpcChainClient, MainChainNode,
    SideChainNode, TransactionBuilder, WithdrawWatcher,
};
use cross_chain_types::{CustodianPolicy, PublicKey};
use utxo_store::PersistentStore;

use crate::config::ArbiterConfig;

pub struct ServiceContext {
    pub config: ArbiterConfig,
    pub group: Arc<ArbitratorGroup>,
    pub router: Arc<MessageRouter>,
    pub network: Arc<PeerNetwork>,
    pub store: PersistentStore,
    pub main_chain: Arc<ChainSynchronizer>,
    pub side_chains: Vec<Arc<ChainSynchronizer>>,
    /// Main chain server first, then one per side chain
    pub servers: Vec<Arc<ProposalServer>>,
}

impl ServiceContext {
    pub fn build(config: ArbiterConfig, data_dir: &Path, password: &str) -> Result<Self> {
        config.validate()?;

        let signer = Arc::new(open_signer(&config, data_dir, password)?);
        let local_key = signer.public_key();

        let keys: Vec<PublicKey> = config.arbitrators.iter().map(|a| a.public_key).collect();
        let group = Arc::new(
            ArbitratorGroup::new(local_key, keys, config.min_signers)
                .context("invalid arbitrator set")?,
        );
        if !group.is_arbitrator(&local_key, 0) {
            tracing::warn!("Account {} is not in the arbitrator set, running as observer", local_key);
        }
        let policy: Arc<dyn CustodianPolicy> = group.clone();

        let store = PersistentStore::open(data_dir.join("utxo"))?;

        let mut main_chain = ChainSynchronizer::new(
            "main",
            Arc::new(JsonRpcChainClient::new(&config.main_node.rpc, config.rpc_timeout())?),
            Arc::new(store.chain_store("main")?),
        );
        for side in &config.side_node_list {
            main_chain = main_chain.with_tracked_address(side.genesis_address(), side.destroy_address);
        }
        let main_chain = Arc::new(main_chain);

        let side_chains = config
            .side_node_list
            .iter()
            .map(|side| -> Result<Arc<ChainSynchronizer>> {
                let name = side.chain_name();
                let rpc = JsonRpcChainClient::new(&side.rpc, config.rpc_timeout())?;
                let chain_store = store.chain_store(&name)?;
                Ok(Arc::new(ChainSynchronizer::new(name, Arc::new(rpc), Arc::new(chain_store))))
            })
            .collect::<Result<Vec<_>>>()?;

        let router = Arc::new(MessageRouter::new(config.magic, config.version));
        let peers = config
            .arbitrators
            .iter()
            .filter(|a| a.public_key != local_key)
            .cloned()
            .collect();
        let network = Arc::new(PeerNetwork::new(
            NetworkConfig {
                listen_addr: format!("0.0.0.0:{}", config.node_port),
                version: config.version,
                handshake_timeout: config.handshake_timeout(),
                peers,
            },
            local_key,
            router.clone(),
        ));

        let main_node: Arc<dyn ChainNode> = Arc::new(MainChainNode::new(TransactionBuilder::new(
            main_chain.clone(),
            policy.clone(),
        )));
        let mut nodes = vec![(Command::Withdraw, main_node)];
        for (side, synchronizer) in config.side_node_list.iter().zip(&side_chains) {
            let builder = TransactionBuilder::new(synchronizer.clone(), policy.clone());
            let side_node: Arc<dyn ChainNode> = Arc::new(SideChainNode::new(builder, side.genesis_address()));
            nodes.push((Command::Deposit, side_node));
        }

        let mut servers = Vec::with_capacity(nodes.len());
        for (command, node) in nodes {
            let server = Arc::new(
                ProposalServer::new(command, group.clone(), node.clone(), signer.clone(), network.clone())
                    .with_timeout(config.proposal_timeout()),
            );
            let client = Arc::new(ProposalClient::new(
                command,
                group.clone(),
                node,
                signer.clone(),
                network.clone(),
                server.clone(),
            ));
            router.register(command, Arc::new(ProposalListener::new(server.clone(), client)));
            servers.push(server);
        }
        router.register(Command::Complain, Arc::new(ComplainListener));

        let dispatcher: Arc<dyn IntentSink> = Arc::new(IntentDispatcher::new(servers.clone()));
        main_chain.add_listener(Arc::new(DepositWatcher::new(
            config.side_node_list.iter().map(|s| s.genesis_address()),
            dispatcher.clone(),
        )));
        for (side, synchronizer) in config.side_node_list.iter().zip(&side_chains) {
            synchronizer.add_listener(Arc::new(WithdrawWatcher::new(
                side.genesis_address(),
                side.destroy_address,
                dispatcher.clone(),
            )));
        }

        tracing::info!(
            "Arbiter {} ready: {} side chains, {} arbitrators, quorum {}",
            local_key,
            side_chains.len(),
            config.arbitrators.len(),
            group.required_quorum(0)
        );

        Ok(Self {
            config,
            group,
            router,
            network,
            store,
            main_chain,
            side_chains,
            servers,
        })
    }

    pub fn synchronizers(&self) -> impl Iterator<Item = &Arc<ChainSynchronizer>> {
        std::iter::once(&self.main_chain).chain(self.side_chains.iter())
    }

    pub fn rpc_context(&self) -> RpcContext {
        let mut ctx = RpcContext::new(self.group.clone()).with_network(self.network.clone());
        for synchronizer in self.synchronizers() {
            ctx = ctx.with_synchronizer(synchronizer.clone());
        }
        for server in &self.servers {
            ctx = ctx.with_server(server.clone());
        }
        ctx
    }

    /// Detach listeners and flush the store.
    ///
    /// Synchronizers reach the servers through their watchers and the servers
    /// reach the synchronizers through their builders; the router and network
    /// point at each other the same way. Clearing the listeners breaks both
    /// cycles so the sled database closes once the context is dropped.
    pub fn shutdown(&self) -> Result<()> {
        for synchronizer in self.synchronizers() {
            synchronizer.clear_listeners();
        }
        self.router.clear();
        self.store.flush()?;
        Ok(())
    }

    /// Main chain height drives the duty rotation
    pub fn advance_group_height(&self) {
        if let Some(height) = self.main_chain.synced_height() {
            if self.group.set_current_height(height) {
                tracing::debug!(
                    "Group height {}, on duty {}",
                    height,
                    self.group.on_duty_arbitrator(height).short()
                );
            }
        }
    }
}

/// Unlock the signing account, creating the keystore on first start
fn open_signer(config: &ArbiterConfig, data_dir: &Path, password: &str) -> Result<AccountSigner> {
    let path = config.keystore_path(data_dir);
    let wallet = if path.exists() {
        LocalWallet::open(&path).with_context(|| format!("opening keystore {}", path.display()))?
    } else {
        let wallet = LocalWallet::create(&path, &config.account, password)
            .with_context(|| format!("creating keystore {}", path.display()))?;
        tracing::info!("Created keystore {} with account {}", path.display(), config.account);
        wallet
    };

    AccountSigner::new(Arc::new(wallet), &config.account, password)
        .with_context(|| format!("unlocking account {}", config.account))
}
