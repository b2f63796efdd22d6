//! Multi-arbiter scenarios driven without a network
//!
//! Each arbiter gets its own group, wallet, chain node and recording
//! broadcaster; tests move messages between them by hand.


use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chain_bridge::{BridgeError, ChainNode};
use cross_chain_types::{
    CrossChainIntent, Hash256, IntentKind, MultiSigPolicy, Payload, ProgramHash, PublicKey,
    Transaction, TxOutput, WithdrawInfo,
};
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;

use crate::client::ProposalClient;
use crate::group::ArbitratorGroup;
use crate::network::Broadcaster;
use crate::server::ProposalServer;
use crate::types::{
    Command, ComplainMessage, FeedbackMessage, PeerMessage, ProposalMessage, ProposalPayload,
};
use crate::wallet::{AccountSigner, LocalWallet};

pub(crate) const ACCOUNT: &str = "arbiter";
pub(crate) const PASSWORD: &str = "password";

#[derive(Default)]
pub(crate) struct RecordingBroadcaster {
    messages: Mutex<Vec<PeerMessage>>,
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, message: PeerMessage) {
        self.messages.lock().push(message);
    }
}

impl RecordingBroadcaster {
    fn payloads(&self) -> Vec<ProposalPayload> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.command != Command::Complain)
            .map(|m| ProposalPayload::from_bytes(&m.payload).unwrap())
            .collect()
    }

    pub(crate) fn proposals(&self) -> Vec<ProposalMessage> {
        self.payloads()
            .into_iter()
            .filter_map(|p| match p {
                ProposalPayload::Proposal(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn feedbacks(&self) -> Vec<FeedbackMessage> {
        self.payloads()
            .into_iter()
            .filter_map(|p| match p {
                ProposalPayload::Feedback(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn complaints(&self) -> Vec<ComplainMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.command == Command::Complain)
            .map(|m| ComplainMessage::from_bytes(&m.payload).unwrap())
            .collect()
    }
}

/// Main chain stand-in building withdraws straight from the intent
pub(crate) struct MockNode {
    genesis: ProgramHash,
    policy: MultiSigPolicy,
    /// Added to the first output, to make this arbiter build different bytes
    skew: AtomicU64,
    sent: Mutex<Vec<Transaction>>,
    executed: Mutex<HashSet<Hash256>>,
}

impl MockNode {
    fn new(policy: MultiSigPolicy) -> Self {
        Self {
            genesis: genesis(),
            policy,
            skew: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
            executed: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn set_skew(&self, skew: u64) {
        self.skew.store(skew, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    pub(crate) fn mark_executed(&self, source: Hash256) {
        self.executed.lock().insert(source);
    }
}

#[async_trait]
impl ChainNode for MockNode {
    fn name(&self) -> &str {
        "main"
    }

    fn kind(&self) -> IntentKind {
        IntentKind::Withdraw
    }

    fn accepts(&self, intent: &CrossChainIntent) -> bool {
        intent.kind() == IntentKind::Withdraw && intent.genesis_address() == self.genesis
    }

    async fn build_transaction(&self, intent: &CrossChainIntent) -> Result<Transaction, BridgeError> {
        let CrossChainIntent::Withdraw {
            side_chain_transaction,
            targets,
            ..
        } = intent
        else {
            return Err(BridgeError::UnsupportedIntent {
                chain: "main".to_string(),
            });
        };

        let skew = self.skew.load(Ordering::SeqCst);
        let outputs = targets
            .iter()
            .enumerate()
            .map(|(i, t)| TxOutput::new(t.target_address, t.amount + if i == 0 { skew } else { 0 }))
            .collect();
        Ok(Transaction {
            payload: Payload::WithdrawFromSideChain {
                side_chain_transaction_hashes: vec![*side_chain_transaction],
            },
            attributes: vec![],
            inputs: vec![],
            outputs,
            lock_time: 0,
            programs: vec![self.policy.placeholder_program()],
        })
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash256, BridgeError> {
        self.sent.lock().push(tx.clone());
        Ok(tx.hash())
    }

    async fn processed_intents(&self, source_txs: &[Hash256]) -> Result<Vec<Hash256>, BridgeError> {
        let executed = self.executed.lock();
        Ok(source_txs.iter().filter(|h| executed.contains(h)).copied().collect())
    }
}

pub(crate) struct Arbiter {
    pub key: PublicKey,
    pub signer: Arc<AccountSigner>,
    pub group: Arc<ArbitratorGroup>,
    pub node: Arc<MockNode>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub server: Arc<ProposalServer>,
    pub client: ProposalClient,
}

pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub(crate) fn public_key(seed: u8) -> PublicKey {
    PublicKey::new(signing_key(seed).verifying_key().to_bytes())
}

pub(crate) fn genesis() -> ProgramHash {
    ProgramHash::genesis(&Hash256::digest(b"side chain"))
}

pub(crate) fn withdraw_intent(tag: &[u8], amount: u64) -> CrossChainIntent {
    CrossChainIntent::Withdraw {
        genesis_address: genesis(),
        side_chain_transaction: Hash256::digest(tag),
        targets: vec![WithdrawInfo {
            target_address: ProgramHash::standard(&public_key(99)),
            amount,
        }],
    }
}

/// `n` arbitrators rotating in seed order 1..=n, all at group height 0
pub(crate) fn cluster(n: u8, min_signers: Option<usize>, timeout: Duration) -> Vec<Arbiter> {
    let keys: Vec<PublicKey> = (1..=n).map(public_key).collect();

    (1..=n)
        .map(|seed| {
            let wallet = LocalWallet::in_memory().with_scrypt_cost(4);
            wallet
                .import_account(ACCOUNT, PASSWORD, &signing_key(seed))
                .unwrap();
            let signer = Arc::new(AccountSigner::new(Arc::new(wallet), ACCOUNT, PASSWORD).unwrap());

            let group = Arc::new(ArbitratorGroup::new(public_key(seed), keys.clone(), min_signers).unwrap());
            let node = Arc::new(MockNode::new(group.policy_at(0)));
            let broadcaster = Arc::new(RecordingBroadcaster::default());

            let server = Arc::new(
                ProposalServer::new(
                    Command::Withdraw,
                    group.clone(),
                    node.clone(),
                    signer.clone(),
                    broadcaster.clone(),
                )
                .with_timeout(timeout),
            );
            let client = ProposalClient::new(
                Command::Withdraw,
                group.clone(),
                node.clone(),
                signer.clone(),
                broadcaster.clone(),
                server.clone(),
            );

            Arbiter {
                key: public_key(seed),
                signer,
                group,
                node,
                broadcaster,
                server,
                client,
            }
        })
        .collect()
}

/// Every arbiter's synchronizer reports the same confirmed intent
pub(crate) fn observe(arbiters: &[Arbiter], intent: &CrossChainIntent) {
    for arbiter in arbiters {
        arbiter.server.enqueue_intent(intent.clone());
    }
}
