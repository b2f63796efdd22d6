//! Router listeners for proposal traffic
//!
//! Listeners run on the connection task, so they only decode and spawn.

use std::sync::Arc;

use crate::client::ProposalClient;
use crate::error::ConsensusError;
use crate::router::PeerMessageListener;
use crate::server::ProposalServer;
use crate::types::{ComplainMessage, PeerId, PeerMessage, ProposalPayload};

/// Feeds proposals to a chain's client and feedback to its server
pub struct ProposalListener {
    server: Arc<ProposalServer>,
    client: Arc<ProposalClient>,
}

impl ProposalListener {
    pub fn new(server: Arc<ProposalServer>, client: Arc<ProposalClient>) -> Self {
        Self { server, client }
    }
}

impl PeerMessageListener for ProposalListener {
    fn on_message(&self, peer: &PeerId, message: &PeerMessage) -> Result<(), ConsensusError> {
        let payload = ProposalPayload::from_bytes(&message.payload)
            .map_err(|e| ConsensusError::Decode(e.to_string()))?;
        let peer = *peer;

        match payload {
            ProposalPayload::Proposal(proposal) => {
                let client = self.client.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.on_received_proposal(&proposal).await {
                        tracing::warn!(
                            "Rejected proposal {} relayed by {}: {}",
                            proposal.tx_hash,
                            peer.short(),
                            e
                        );
                    }
                });
            }
            ProposalPayload::Feedback(feedback) => {
                let server = self.server.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.receive_feedback(&feedback).await {
                        tracing::warn!(
                            "Rejected feedback on {} from {}: {}",
                            feedback.tx_hash,
                            feedback.signer.short(),
                            e
                        );
                    }
                });
            }
        }
        Ok(())
    }
}

/// Logs complaints about rejected proposals
pub struct ComplainListener;

impl PeerMessageListener for ComplainListener {
    fn on_message(&self, peer: &PeerId, message: &PeerMessage) -> Result<(), ConsensusError> {
        let complaint = ComplainMessage::from_bytes(&message.payload)
            .map_err(|e| ConsensusError::Decode(e.to_string()))?;
        tracing::warn!(
            "Arbitrator {} (via {}) rejected proposal {} from {}: {}",
            complaint.complainer.short(),
            peer.short(),
            complaint.tx_hash,
            complaint.proposer.short(),
            complaint.reason
        );
        Ok(())
    }
}
