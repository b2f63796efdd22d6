//! Proposal server - originates proposals and collects feedback
//!
//! One server runs per chain node. Intents observed on chain are queued on
//! every arbiter; only the arbitrator on duty at the current group height
//! turns them into proposals. A proposal that expires leaves its intent
//! queued so whoever is on duty next proposes it again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chain_bridge::{BridgeError, ChainNode, IntentSink};
use cross_chain_types::{CrossChainIntent, Hash256};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::ConsensusError;
use crate::group::ArbitratorGroup;
use crate::network::Broadcaster;
use crate::proposal::{Proposal, ProposalSummary};
use crate::types::{Command, FeedbackMessage, PeerMessage, ProposalMessage, ProposalPayload};
use crate::wallet::{verify_signature, AccountSigner};

/// Default collection window
pub const DEFAULT_PROPOSAL_TIMEOUT: Duration = Duration::from_secs(60);

/// What a feedback message did to its proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// Not a proposal of this server
    Ignored,
    /// Signer already counted, or the proposal was finalized meanwhile
    Duplicate,
    /// Counted, quorum not reached yet
    Accepted { signatures: usize, required: usize },
    /// Quorum reached and the transaction was submitted
    Completed { tx_id: Hash256 },
    /// Quorum reached but submission failed; the intent stays queued
    SubmitFailed,
}

pub struct ProposalServer {
    command: Command,
    group: Arc<ArbitratorGroup>,
    node: Arc<dyn ChainNode>,
    signer: Arc<AccountSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    proposals: DashMap<Hash256, Arc<Mutex<Proposal>>>,
    /// Queued intents in arrival order
    intents: Mutex<Vec<CrossChainIntent>>,
    timeout: Duration,
}

impl ProposalServer {
    pub fn new(
        command: Command,
        group: Arc<ArbitratorGroup>,
        node: Arc<dyn ChainNode>,
        signer: Arc<AccountSigner>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            command,
            group,
            node,
            signer,
            broadcaster,
            proposals: DashMap::new(),
            intents: Mutex::new(Vec::new()),
            timeout: DEFAULT_PROPOSAL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn node(&self) -> &Arc<dyn ChainNode> {
        &self.node
    }

    /// Queue an intent this server's chain realizes; duplicates are dropped
    pub fn enqueue_intent(&self, intent: CrossChainIntent) -> bool {
        if !self.node.accepts(&intent) {
            return false;
        }
        let source = intent.source_transaction();
        let mut intents = self.intents.lock();
        if intents.iter().any(|i| i.source_transaction() == source) {
            return false;
        }
        tracing::info!(
            "[{}] Queued {} intent {} ({})",
            self.node.name(),
            self.command,
            source,
            intent.total_amount()
        );
        intents.push(intent);
        true
    }

    pub fn intents(&self) -> Vec<CrossChainIntent> {
        self.intents.lock().clone()
    }

    /// The queued intent with source transaction `source`, as this arbiter saw it
    pub fn observed_intent(&self, source: &Hash256) -> Option<CrossChainIntent> {
        self.intents
            .lock()
            .iter()
            .find(|i| &i.source_transaction() == source)
            .cloned()
    }

    fn remove_intent(&self, source: &Hash256) {
        self.intents.lock().retain(|i| &i.source_transaction() != source);
    }

    pub fn pending_proposals(&self) -> Vec<ProposalSummary> {
        self.proposals.iter().map(|p| p.value().lock().summary()).collect()
    }

    fn collecting_sources(&self) -> HashSet<Hash256> {
        self.proposals
            .iter()
            .map(|p| p.value().lock().intent().source_transaction())
            .collect()
    }

    /// Build, sign and broadcast a proposal for `intent`
    pub async fn propose(&self, intent: &CrossChainIntent) -> Result<Hash256, ConsensusError> {
        let height = self.group.current_height();
        if !self.group.is_on_duty(height) {
            return Err(ConsensusError::NotOnDuty { height });
        }

        let tx = self.node.build_transaction(intent).await?;
        let tx_hash = tx.hash();
        if self.proposals.contains_key(&tx_hash) {
            return Err(ConsensusError::AlreadyProposed(tx_hash));
        }

        let signature = self.signer.sign(&tx)?;
        let mut proposal = Proposal::new(tx, intent.clone(), height, self.group.required_quorum(height));
        proposal.add_signature(self.signer.public_key(), signature);

        let message = ProposalMessage {
            tx_hash,
            transaction: proposal.transaction().clone(),
            intent: intent.clone(),
            height,
            proposer: self.signer.public_key(),
            signature,
        };
        proposal.mark_collecting();
        let proposal = Arc::new(Mutex::new(proposal));
        self.proposals.insert(tx_hash, proposal.clone());

        self.broadcaster.broadcast(PeerMessage::new(
            self.command,
            ProposalPayload::Proposal(message).to_bytes(),
        ));
        tracing::info!(
            "[{}] Proposed {} at height {} for intent {}",
            self.node.name(),
            tx_hash,
            height,
            intent.source_transaction()
        );

        // a single-signer quorum completes on the proposer's own signature
        self.try_complete(tx_hash, &proposal).await;
        Ok(tx_hash)
    }

    /// Verify and merge a counter-signature
    pub async fn receive_feedback(
        &self,
        feedback: &FeedbackMessage,
    ) -> Result<FeedbackOutcome, ConsensusError> {
        let Some(proposal) = self.proposals.get(&feedback.tx_hash).map(|p| p.value().clone()) else {
            tracing::trace!("[{}] Feedback for unknown proposal {}", self.node.name(), feedback.tx_hash);
            return Ok(FeedbackOutcome::Ignored);
        };

        {
            let mut guard = proposal.lock();
            let height = guard.height();
            if !self.group.is_arbitrator(&feedback.signer, height) {
                return Err(ConsensusError::UnknownSigner {
                    signer: feedback.signer,
                    height,
                });
            }
            if !verify_signature(&feedback.signer, feedback.tx_hash.as_bytes(), &feedback.signature) {
                return Err(ConsensusError::InvalidSignature(feedback.signer));
            }
            if !guard.add_signature(feedback.signer, feedback.signature) {
                return Ok(FeedbackOutcome::Duplicate);
            }
            tracing::debug!(
                "[{}] Signature {}/{} on {} from {}",
                self.node.name(),
                guard.signature_count(),
                guard.required(),
                feedback.tx_hash,
                feedback.signer.short()
            );
            if !guard.has_quorum() {
                return Ok(FeedbackOutcome::Accepted {
                    signatures: guard.signature_count(),
                    required: guard.required(),
                });
            }
        }

        Ok(self
            .try_complete(feedback.tx_hash, &proposal)
            .await
            .unwrap_or(FeedbackOutcome::Duplicate))
    }

    /// Finalize and submit if the proposal has quorum; at most once per proposal
    async fn try_complete(&self, tx_hash: Hash256, proposal: &Arc<Mutex<Proposal>>) -> Option<FeedbackOutcome> {
        let (signed, source) = {
            let mut guard = proposal.lock();
            let signed = guard.complete()?;
            (signed, guard.intent().source_transaction())
        };
        self.proposals.remove(&tx_hash);

        let (have, need) = signed
            .programs
            .first()
            .map(|p| self.signer.sign_status(p))
            .unwrap_or_default();
        tracing::info!(
            "[{}] Proposal {} complete with {}/{} signatures",
            self.node.name(),
            tx_hash,
            have,
            need
        );

        match self.node.send_transaction(&signed).await {
            Ok(tx_id) => {
                self.remove_intent(&source);
                Some(FeedbackOutcome::Completed { tx_id })
            }
            Err(e) => {
                tracing::error!("[{}] Submitting {} failed: {}", self.node.name(), tx_hash, e);
                Some(FeedbackOutcome::SubmitFailed)
            }
        }
    }

    /// Discard proposals past the collection window
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.proposals.retain(|hash, proposal| {
            let mut guard = proposal.lock();
            if guard.is_expired(now, self.timeout) {
                guard.expire();
                expired.push((*hash, guard.signature_count(), guard.required()));
                false
            } else {
                true
            }
        });

        for (hash, have, need) in &expired {
            tracing::warn!(
                "[{}] Proposal {} expired with {}/{} signatures",
                self.node.name(),
                hash,
                have,
                need
            );
        }
        expired.len()
    }

    /// Propose queued intents that have no proposal collecting.
    ///
    /// Intents the target chain already executed are dropped first.
    pub async fn propose_pending(&self) -> Result<usize, ConsensusError> {
        let height = self.group.current_height();
        if !self.group.is_on_duty(height) {
            return Ok(0);
        }

        let collecting = self.collecting_sources();
        let pending: Vec<CrossChainIntent> = self
            .intents()
            .into_iter()
            .filter(|i| !collecting.contains(&i.source_transaction()))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let sources: Vec<Hash256> = pending.iter().map(|i| i.source_transaction()).collect();
        let processed: HashSet<Hash256> = self.node.processed_intents(&sources).await?.into_iter().collect();
        for source in &processed {
            tracing::info!("[{}] Intent {} already executed, dropping", self.node.name(), source);
            self.remove_intent(source);
        }

        let mut proposed = 0;
        for intent in pending.iter().filter(|i| !processed.contains(&i.source_transaction())) {
            match self.propose(intent).await {
                Ok(_) => proposed += 1,
                Err(ConsensusError::Bridge(BridgeError::InsufficientFunds { requested, available })) => {
                    tracing::warn!(
                        "[{}] Cannot fund intent {}: need {}, have {}",
                        self.node.name(),
                        intent.source_transaction(),
                        requested,
                        available
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] Proposing intent {} failed: {}",
                        self.node.name(),
                        intent.source_transaction(),
                        e
                    );
                }
            }
        }
        Ok(proposed)
    }
}

impl IntentSink for ProposalServer {
    fn submit_intent(&self, intent: CrossChainIntent) {
        self.enqueue_intent(intent);
    }
}

/// Fans discovered intents out to the servers whose chain realizes them
pub struct IntentDispatcher {
    servers: Vec<Arc<ProposalServer>>,
}

impl IntentDispatcher {
    pub fn new(servers: Vec<Arc<ProposalServer>>) -> Self {
        Self { servers }
    }
}

impl IntentSink for IntentDispatcher {
    fn submit_intent(&self, intent: CrossChainIntent) {
        let accepted = self
            .servers
            .iter()
            .filter(|s| s.enqueue_intent(intent.clone()))
            .count();
        if accepted == 0 {
            tracing::debug!(
                "No server took intent {} (already queued or unknown chain)",
                intent.source_transaction()
            );
        }
    }
}
