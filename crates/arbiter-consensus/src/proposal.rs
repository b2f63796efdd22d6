//! Proposal - one transaction collecting signatures

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cross_chain_types::{
    multisig::merge_signatures, CrossChainIntent, Hash256, PublicKey, Signature, Transaction,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProposalState {
    /// Built and signed by the proposer, not yet broadcast
    Created,
    /// Broadcast, waiting for feedback
    Collecting,
    /// Quorum reached; finalized and handed to the chain
    Complete,
    /// Collection window passed without quorum
    Expired,
}

#[derive(Debug, Clone)]
pub struct Proposal {
    tx_hash: Hash256,
    transaction: Transaction,
    intent: CrossChainIntent,
    height: u32,
    required: usize,
    /// Ordered by signer key, which is the merge order
    signatures: BTreeMap<PublicKey, Signature>,
    state: ProposalState,
    created_at: Instant,
    proposed_at: DateTime<Utc>,
}

/// Read-only view for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ProposalSummary {
    pub tx_hash: Hash256,
    pub source_transaction: Hash256,
    pub height: u32,
    pub signatures: usize,
    pub required: usize,
    pub signers: Vec<PublicKey>,
    pub state: ProposalState,
    pub proposed_at: DateTime<Utc>,
    pub age_ms: u64,
}

impl Proposal {
    pub fn new(transaction: Transaction, intent: CrossChainIntent, height: u32, required: usize) -> Self {
        let transaction = transaction.unsigned();
        Self {
            tx_hash: transaction.hash(),
            transaction,
            intent,
            height,
            required,
            signatures: BTreeMap::new(),
            state: ProposalState::Created,
            created_at: Instant::now(),
            proposed_at: Utc::now(),
        }
    }

    pub fn tx_hash(&self) -> Hash256 {
        self.tx_hash
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn intent(&self) -> &CrossChainIntent {
        &self.intent
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn state(&self) -> ProposalState {
        self.state
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn has_signed(&self, signer: &PublicKey) -> bool {
        self.signatures.contains_key(signer)
    }

    pub fn mark_collecting(&mut self) {
        if self.state == ProposalState::Created {
            self.state = ProposalState::Collecting;
        }
    }

    /// Record a verified signature; false if the signer already signed
    pub fn add_signature(&mut self, signer: PublicKey, signature: Signature) -> bool {
        if self.signatures.contains_key(&signer) {
            return false;
        }
        self.signatures.insert(signer, signature);
        true
    }

    pub fn has_quorum(&self) -> bool {
        self.signatures.len() >= self.required
    }

    /// Signed transaction, once; later calls return `None`
    pub fn complete(&mut self) -> Option<Transaction> {
        if !self.has_quorum() || matches!(self.state, ProposalState::Complete | ProposalState::Expired) {
            return None;
        }
        self.state = ProposalState::Complete;

        let mut tx = self.transaction.clone();
        let parameter = merge_signatures(&self.signatures);
        if let Some(program) = tx.programs.first_mut() {
            program.parameter = parameter;
        }
        Some(tx)
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= timeout
    }

    pub fn expire(&mut self) {
        if self.state != ProposalState::Complete {
            self.state = ProposalState::Expired;
        }
    }

    pub fn summary(&self) -> ProposalSummary {
        ProposalSummary {
            tx_hash: self.tx_hash,
            source_transaction: self.intent.source_transaction(),
            height: self.height,
            signatures: self.signatures.len(),
            required: self.required,
            signers: self.signatures.keys().copied().collect(),
            state: self.state,
            proposed_at: self.proposed_at,
            age_ms: self.created_at.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cross_chain_types::{MultiSigPolicy, Payload, ProgramHash, TxOutput, WithdrawInfo};

    fn key(b: u8) -> PublicKey {
        PublicKey::new([b; 32])
    }

    fn proposal(required: usize) -> Proposal {
        let policy = MultiSigPolicy::new(&[key(1), key(2), key(3)], required).unwrap();
        let target = ProgramHash::standard(&key(9));
        let source = Hash256::digest(b"burn");
        let tx = Transaction {
            payload: Payload::WithdrawFromSideChain {
                side_chain_transaction_hashes: vec![source],
            },
            attributes: vec![],
            inputs: vec![],
            outputs: vec![TxOutput::new(target, 5)],
            lock_time: 0,
            programs: vec![policy.placeholder_program()],
        };
        let intent = CrossChainIntent::Withdraw {
            genesis_address: ProgramHash::genesis(&Hash256::digest(b"side")),
            side_chain_transaction: source,
            targets: vec![WithdrawInfo { target_address: target, amount: 5 }],
        };
        Proposal::new(tx, intent, 4, required)
    }

    #[test]
    fn test_duplicate_signer_not_counted() {
        let mut p = proposal(2);
        assert!(p.add_signature(key(2), Signature::new([2; 64])));
        assert!(!p.add_signature(key(2), Signature::new([7; 64])));
        assert_eq!(p.signature_count(), 1);
        assert!(!p.has_quorum());
    }

    #[test]
    fn test_complete_merges_in_key_order() {
        let mut p = proposal(2);
        p.mark_collecting();
        p.add_signature(key(3), Signature::new([3; 64]));
        p.add_signature(key(1), Signature::new([1; 64]));

        let tx = p.complete().unwrap();
        let parameter = &tx.programs[0].parameter;
        assert_eq!(parameter.len(), 130);
        assert_eq!(parameter[1], 1);
        assert_eq!(parameter[66], 3);
        assert_eq!(tx.hash(), p.tx_hash());
        assert_eq!(p.state(), ProposalState::Complete);

        // finalized once
        assert!(p.complete().is_none());
    }

    #[test]
    fn test_expiry() {
        let mut p = proposal(2);
        let later = Instant::now() + Duration::from_secs(61);
        assert!(p.is_expired(later, Duration::from_secs(60)));
        assert!(!p.is_expired(Instant::now(), Duration::from_secs(60)));
        p.expire();
        assert_eq!(p.state(), ProposalState::Expired);
        p.add_signature(key(1), Signature::new([1; 64]));
        p.add_signature(key(2), Signature::new([2; 64]));
        assert!(p.complete().is_none());
    }
}
