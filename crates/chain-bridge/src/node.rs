//! Chain nodes - where intents become transactions
//!
//! Withdraw intents are realized on the main chain and deposit intents on
//! the side chain that owns the genesis address. The consensus layer only
//! sees [`ChainNode`] and never needs to know which chain it talks to.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use cross_chain_types::{CrossChainIntent, Hash256, IntentKind, ProgramHash, Transaction};

use crate::builder::TransactionBuilder;
use crate::error::BridgeError;
use crate::rpc::ChainRpc;

/// Receiver of intents discovered by the chain watchers
pub trait IntentSink: Send + Sync {
    fn submit_intent(&self, intent: CrossChainIntent);
}

#[async_trait]
pub trait ChainNode: Send + Sync {
    fn name(&self) -> &str;

    /// Intent kind this node realizes
    fn kind(&self) -> IntentKind;

    /// Whether this node is the one that realizes `intent`
    fn accepts(&self, intent: &CrossChainIntent) -> bool;

    /// Unsigned transaction realizing `intent`
    async fn build_transaction(&self, intent: &CrossChainIntent) -> Result<Transaction, BridgeError>;

    /// Submit a fully signed transaction
    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash256, BridgeError>;

    /// Subset of `source_txs` already realized on this chain
    async fn processed_intents(&self, source_txs: &[Hash256]) -> Result<Vec<Hash256>, BridgeError>;
}

/// Main chain: pays out side chain withdraws from genesis addresses
pub struct MainChainNode {
    builder: TransactionBuilder,
    genesis_addresses: BTreeSet<ProgramHash>,
}

impl MainChainNode {
    pub fn new(builder: TransactionBuilder) -> Self {
        let genesis_addresses = builder.synchronizer().tracked_addresses().copied().collect();
        Self {
            builder,
            genesis_addresses,
        }
    }

    fn rpc(&self) -> &Arc<dyn ChainRpc> {
        self.builder.synchronizer().rpc()
    }
}

#[async_trait]
impl ChainNode for MainChainNode {
    fn name(&self) -> &str {
        self.builder.synchronizer().name()
    }

    fn kind(&self) -> IntentKind {
        IntentKind::Withdraw
    }

    fn accepts(&self, intent: &CrossChainIntent) -> bool {
        intent.kind() == IntentKind::Withdraw
            && self.genesis_addresses.contains(&intent.genesis_address())
    }

    async fn build_transaction(&self, intent: &CrossChainIntent) -> Result<Transaction, BridgeError> {
        match intent {
            CrossChainIntent::Withdraw {
                genesis_address,
                side_chain_transaction,
                targets,
            } if self.accepts(intent) => {
                self.builder
                    .build_withdraw_from_side_chain(genesis_address, *side_chain_transaction, targets)
                    .await
            }
            _ => Err(BridgeError::UnsupportedIntent {
                chain: self.name().to_string(),
            }),
        }
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash256, BridgeError> {
        let tx_id = self.rpc().send_raw_transaction(&tx.to_bytes()).await?;
        tracing::info!("[{}] Sent withdraw transaction {}", self.name(), tx_id);
        Ok(tx_id)
    }

    async fn processed_intents(&self, source_txs: &[Hash256]) -> Result<Vec<Hash256>, BridgeError> {
        Ok(self.rpc().get_exist_cross_chain_transactions(source_txs).await?)
    }
}

/// Side chain: mints main chain deposits
pub struct SideChainNode {
    builder: TransactionBuilder,
    genesis_address: ProgramHash,
}

impl SideChainNode {
    pub fn new(builder: TransactionBuilder, genesis_address: ProgramHash) -> Self {
        Self {
            builder,
            genesis_address,
        }
    }

    pub fn genesis_address(&self) -> &ProgramHash {
        &self.genesis_address
    }

    fn rpc(&self) -> &Arc<dyn ChainRpc> {
        self.builder.synchronizer().rpc()
    }
}

#[async_trait]
impl ChainNode for SideChainNode {
    fn name(&self) -> &str {
        self.builder.synchronizer().name()
    }

    fn kind(&self) -> IntentKind {
        IntentKind::Deposit
    }

    fn accepts(&self, intent: &CrossChainIntent) -> bool {
        intent.kind() == IntentKind::Deposit && intent.genesis_address() == self.genesis_address
    }

    async fn build_transaction(&self, intent: &CrossChainIntent) -> Result<Transaction, BridgeError> {
        match intent {
            CrossChainIntent::Deposit {
                main_chain_transaction,
                deposits,
                ..
            } if self.accepts(intent) => self
                .builder
                .build_deposit_transaction(*main_chain_transaction, deposits),
            _ => Err(BridgeError::UnsupportedIntent {
                chain: self.name().to_string(),
            }),
        }
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash256, BridgeError> {
        let tx_id = self.rpc().send_raw_transaction(&tx.to_bytes()).await?;
        tracing::info!("[{}] Sent deposit transaction {}", self.name(), tx_id);
        Ok(tx_id)
    }

    async fn processed_intents(&self, source_txs: &[Hash256]) -> Result<Vec<Hash256>, BridgeError> {
        Ok(self.rpc().get_exist_cross_chain_transactions(source_txs).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockChain};
    use crate::sync::ChainSynchronizer;
    use cross_chain_types::{
        AttributeUsage, CustodianPolicy, DepositInfo, MultiSigPolicy, Payload, TxAttribute,
        TxOutput, WithdrawInfo,
    };

    fn policy() -> Arc<dyn CustodianPolicy> {
        Arc::new(MultiSigPolicy::new(&[mock::key(1), mock::key(2)], 2).unwrap())
    }

    fn main_node() -> (tempfile::TempDir, Arc<MockChain>, MainChainNode) {
        let chain = Arc::new(MockChain::new());
        chain.push_block(vec![mock::transfer(vec![], vec![TxOutput::new(mock::genesis(), 20)])]);
        chain.push_block(vec![]);
        let (dir, store) = mock::temp_store("main");
        let sync = ChainSynchronizer::new("main", chain.clone(), store)
            .with_tracked_address(mock::genesis(), mock::destroy());
        let node = MainChainNode::new(TransactionBuilder::new(Arc::new(sync), policy()));
        (dir, chain, node)
    }

    fn side_node() -> (tempfile::TempDir, Arc<MockChain>, SideChainNode) {
        let chain = Arc::new(MockChain::new());
        let (dir, store) = mock::temp_store("side");
        let sync = ChainSynchronizer::new("side", chain.clone(), store);
        let builder = TransactionBuilder::new(Arc::new(sync), policy());
        (dir, chain, SideChainNode::new(builder, mock::genesis()))
    }

    fn withdraw_intent() -> CrossChainIntent {
        CrossChainIntent::Withdraw {
            genesis_address: mock::genesis(),
            side_chain_transaction: Hash256::digest(b"burn"),
            targets: vec![WithdrawInfo { target_address: mock::user(), amount: 7 }],
        }
    }

    fn deposit_intent() -> CrossChainIntent {
        CrossChainIntent::Deposit {
            genesis_address: mock::genesis(),
            main_chain_transaction: Hash256::digest(b"lock"),
            deposits: vec![DepositInfo {
                main_chain_program_hash: mock::genesis(),
                target_program_hash: mock::user(),
                amount: 7,
            }],
        }
    }

    #[tokio::test]
    async fn test_main_node_builds_withdraw_only() {
        let (_dir, _chain, node) = main_node();
        assert!(node.accepts(&withdraw_intent()));
        assert!(!node.accepts(&deposit_intent()));

        let tx = node.build_transaction(&withdraw_intent()).await.unwrap();
        assert_eq!(tx.total_output(), 20);
        assert!(matches!(
            node.build_transaction(&deposit_intent()).await,
            Err(BridgeError::UnsupportedIntent { .. })
        ));
    }

    #[tokio::test]
    async fn test_side_node_builds_and_sends_deposit() {
        let (_dir, chain, node) = side_node();
        assert!(node.accepts(&deposit_intent()));
        assert!(!node.accepts(&withdraw_intent()));

        let tx = node.build_transaction(&deposit_intent()).await.unwrap();
        let tx_id = node.send_transaction(&tx).await.unwrap();
        assert_eq!(tx_id, tx.hash());
        assert_eq!(chain.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_processed_intents_filters_sources() {
        let (_dir, chain, node) = main_node();
        let done = Hash256::digest(b"done");
        let pending = Hash256::digest(b"pending");
        chain.mark_executed(done);

        let processed = node.processed_intents(&[done, pending]).await.unwrap();
        assert_eq!(processed, vec![done]);
    }

    #[derive(Default)]
    struct Collect(parking_lot::Mutex<Vec<CrossChainIntent>>);

    impl IntentSink for Collect {
        fn submit_intent(&self, intent: CrossChainIntent) {
            self.0.lock().push(intent);
        }
    }

    /// Observe the side chain with private stores, then build the payout
    async fn observe_and_build(
        side_chain: &Arc<MockChain>,
        main_chain: &Arc<MockChain>,
    ) -> (CrossChainIntent, Transaction) {
        let (_side_dir, side_store) = mock::temp_store("side");
        let side = ChainSynchronizer::new("side", side_chain.clone(), side_store);
        let sink = Arc::new(Collect::default());
        side.add_listener(Arc::new(crate::watcher::WithdrawWatcher::new(
            mock::genesis(),
            mock::destroy(),
            sink.clone(),
        )));
        side.sync().await.unwrap();
        let intent = sink.0.lock().pop().unwrap();

        let (_main_dir, main_store) = mock::temp_store("main");
        let sync = ChainSynchronizer::new("main", main_chain.clone(), main_store)
            .with_tracked_address(mock::genesis(), mock::destroy());
        let node = MainChainNode::new(TransactionBuilder::new(Arc::new(sync), policy()));
        let tx = node.build_transaction(&intent).await.unwrap();
        (intent, tx)
    }

    #[tokio::test]
    async fn test_arbiters_build_identical_payouts_from_same_chains() {
        let main_chain = Arc::new(MockChain::new());
        main_chain.push_block(vec![mock::transfer(vec![], vec![TxOutput::new(mock::genesis(), 5)])]);
        main_chain.push_block(vec![mock::transfer(vec![], vec![TxOutput::new(mock::genesis(), 3)])]);
        main_chain.push_block(vec![]);

        let mut data = vec![0u8];
        data.extend_from_slice(mock::user().to_address().as_bytes());
        let burn = Transaction {
            payload: Payload::TransferCrossChainAsset,
            attributes: vec![TxAttribute::new(AttributeUsage::CrossChainAddress, data)],
            inputs: vec![],
            outputs: vec![TxOutput::new(mock::destroy(), 6)],
            lock_time: 0,
            programs: vec![],
        };
        let burn_id = burn.hash();
        let side_chain = Arc::new(MockChain::new());
        side_chain.push_block(vec![burn]);
        side_chain.push_block(vec![]);

        let (intent_a, tx_a) = observe_and_build(&side_chain, &main_chain).await;
        let (intent_b, tx_b) = observe_and_build(&side_chain, &main_chain).await;

        assert_eq!(intent_a, intent_b);
        assert_eq!(intent_a.source_transaction(), burn_id);
        assert_eq!(tx_a.to_bytes(), tx_b.to_bytes());
        // 5 then 3 selected for 6, change 2 back to the genesis address
        assert_eq!(tx_a.inputs.len(), 2);
        assert_eq!(tx_a.outputs[0], TxOutput::new(mock::user(), 6));
        assert_eq!(tx_a.outputs[1], TxOutput::new(mock::genesis(), 2));
    }
}
