//! Proposal client - verifies proposals by rebuilding them and counter-signs
//!
//! A proposal is only signed for an intent this arbiter queued itself from
//! its own synchronizer; the proposer's copy of the intent is never trusted.

use std::sync::Arc;

use chain_bridge::ChainNode;
use cross_chain_types::Transaction;

use crate::error::ConsensusError;
use crate::group::ArbitratorGroup;
use crate::network::Broadcaster;
use crate::server::ProposalServer;
use crate::types::{
    Command, ComplainMessage, FeedbackMessage, PeerMessage, ProposalMessage, ProposalPayload,
};
use crate::wallet::{verify_signature, AccountSigner};

pub struct ProposalClient {
    command: Command,
    group: Arc<ArbitratorGroup>,
    node: Arc<dyn ChainNode>,
    signer: Arc<AccountSigner>,
    broadcaster: Arc<dyn Broadcaster>,
    /// Server of the same chain; its queue holds the intents seen locally
    observed: Arc<ProposalServer>,
}

impl ProposalClient {
    pub fn new(
        command: Command,
        group: Arc<ArbitratorGroup>,
        node: Arc<dyn ChainNode>,
        signer: Arc<AccountSigner>,
        broadcaster: Arc<dyn Broadcaster>,
        observed: Arc<ProposalServer>,
    ) -> Self {
        Self {
            command,
            group,
            node,
            signer,
            broadcaster,
            observed,
        }
    }

    /// Check a proposal and answer with feedback if it matches our own build.
    ///
    /// Returns `Ok(None)` for proposals of another chain or our own.
    pub async fn on_received_proposal(
        &self,
        proposal: &ProposalMessage,
    ) -> Result<Option<FeedbackMessage>, ConsensusError> {
        if !self.node.accepts(&proposal.intent) {
            tracing::trace!(
                "[{}] Proposal {} is for another chain",
                self.node.name(),
                proposal.tx_hash
            );
            return Ok(None);
        }
        let local_key = self.signer.public_key();
        if proposal.proposer == local_key {
            return Ok(None);
        }

        let height = proposal.height;
        if self.group.on_duty_arbitrator(height) != proposal.proposer {
            return Err(ConsensusError::ProposerNotOnDuty {
                proposer: proposal.proposer,
                height,
            });
        }
        if !verify_signature(&proposal.proposer, proposal.tx_hash.as_bytes(), &proposal.signature) {
            return Err(ConsensusError::InvalidSignature(proposal.proposer));
        }
        if !self.group.is_arbitrator(&local_key, height) {
            return Err(ConsensusError::NotArbitrator { height });
        }

        let source = proposal.intent.source_transaction();
        match self.observed.observed_intent(&source) {
            None => return Err(ConsensusError::UnobservedIntent(source)),
            Some(observed) if observed != proposal.intent => {
                tracing::warn!(
                    "[{}] Proposal {} from {} alters intent {}",
                    self.node.name(),
                    proposal.tx_hash,
                    proposal.proposer.short(),
                    source
                );
                self.complain(proposal, "intent differs from chain");
                return Err(ConsensusError::IntentMismatch(source));
            }
            Some(_) => {}
        }

        let rebuilt = self.node.build_transaction(&proposal.intent).await?;
        if !matches_proposal(&rebuilt, proposal) {
            let rebuilt_hash = rebuilt.hash();
            tracing::warn!(
                "[{}] Proposal {} from {} does not match local build {}",
                self.node.name(),
                proposal.tx_hash,
                proposal.proposer.short(),
                rebuilt_hash
            );
            self.complain(proposal, "rebuilt transaction differs");
            return Err(ConsensusError::ProposalMismatch {
                proposed: proposal.tx_hash,
                rebuilt: rebuilt_hash,
            });
        }

        let feedback = FeedbackMessage {
            tx_hash: proposal.tx_hash,
            signer: local_key,
            signature: self.signer.sign(&rebuilt)?,
        };
        self.broadcaster.broadcast(PeerMessage::new(
            self.command,
            ProposalPayload::Feedback(feedback.clone()).to_bytes(),
        ));
        tracing::info!(
            "[{}] Signed proposal {} from {}",
            self.node.name(),
            proposal.tx_hash,
            proposal.proposer.short()
        );
        Ok(Some(feedback))
    }

    fn complain(&self, proposal: &ProposalMessage, reason: &str) {
        let complaint = ComplainMessage {
            tx_hash: proposal.tx_hash,
            proposer: proposal.proposer,
            complainer: self.signer.public_key(),
            reason: reason.to_string(),
        };
        self.broadcaster
            .broadcast(PeerMessage::new(Command::Complain, complaint.to_bytes()));
    }
}

/// The claimed hash, the carried transaction and our rebuild must all agree
fn matches_proposal(rebuilt: &Transaction, proposal: &ProposalMessage) -> bool {
    rebuilt.hash() == proposal.tx_hash
        && proposal.transaction.hash() == proposal.tx_hash
        && rebuilt.unsigned() == proposal.transaction.unsigned()
}
