//! Core types for peer messaging and proposals

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use cross_chain_types::{CrossChainIntent, Hash256, PublicKey, Signature, Transaction};
use serde::Serialize;

use crate::error::RouterError;

/// Identity of a connected peer: its arbitrator key
pub type PeerId = PublicKey;

/// Application commands carried over the peer network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Main chain withdraw proposals and their feedback
    Withdraw,
    /// Side chain deposit proposals and their feedback
    Deposit,
    /// Complaints about rejected proposals
    Complain,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Withdraw => "withdraw",
            Command::Deposit => "deposit",
            Command::Complain => "complain",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdraw" => Ok(Command::Withdraw),
            "deposit" => Ok(Command::Deposit),
            "complain" => Ok(Command::Complain),
            other => Err(RouterError::UnsupportedCommand(other.to_string())),
        }
    }
}

/// A routed application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl PeerMessage {
    pub fn new(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }
}

/// Handshake sent by both ends before anything else
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub magic: u32,
    pub public_key: PublicKey,
    /// Listening port of the sender
    pub port: u16,
}

/// Frame on the websocket transport
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum WireMessage {
    Version(VersionMessage),
    /// Application message; the command stays a string so unknown commands
    /// reach the router and are rejected there
    Message { command: String, payload: Vec<u8> },
}

impl WireMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("WireMessage serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// On-duty arbitrator's request for signatures
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalMessage {
    pub tx_hash: Hash256,
    /// Transaction with empty program parameters
    pub transaction: Transaction,
    pub intent: CrossChainIntent,
    /// Main chain height the proposer was on duty at
    pub height: u32,
    pub proposer: PublicKey,
    /// Proposer's signature over `tx_hash`
    pub signature: Signature,
}

/// Counter-signature returned for a matching proposal
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeedbackMessage {
    pub tx_hash: Hash256,
    pub signer: PublicKey,
    pub signature: Signature,
}

/// Payload of withdraw/deposit commands
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ProposalPayload {
    Proposal(ProposalMessage),
    Feedback(FeedbackMessage),
}

impl ProposalPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ProposalPayload serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Payload of the complain command
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ComplainMessage {
    pub tx_hash: Hash256,
    pub proposer: PublicKey,
    pub complainer: PublicKey,
    pub reason: String,
}

impl ComplainMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("ComplainMessage serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        for command in [Command::Withdraw, Command::Deposit, Command::Complain] {
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
        assert_eq!(
            "inv".parse::<Command>(),
            Err(RouterError::UnsupportedCommand("inv".to_string()))
        );
    }

    #[test]
    fn test_unknown_command_survives_wire_decoding() {
        let frame = WireMessage::Message {
            command: "getblocks".to_string(),
            payload: vec![1, 2, 3],
        };
        let decoded = WireMessage::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded, frame);
    }
}
