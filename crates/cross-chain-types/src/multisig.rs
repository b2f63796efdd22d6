//! M-of-N custodian programs

use crate::error::TypesError;
use crate::hash::{ProgramHash, PublicKey, Signature};
use crate::opcode;
use crate::transaction::Program;
use std::collections::BTreeMap;

/// Keys and threshold that control custodial funds
///
/// Keys are kept sorted so every arbiter derives the same redeem script no
/// matter how the arbitrator list is ordered for rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiSigPolicy {
    keys: Vec<PublicKey>,
    required: usize,
}

impl MultiSigPolicy {
    pub fn new(keys: &[PublicKey], required: usize) -> Result<Self, TypesError> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        if required == 0 || required > keys.len() || keys.len() > u8::MAX as usize {
            return Err(TypesError::InvalidPolicy {
                required,
                total: keys.len(),
            });
        }

        Ok(Self { keys, required })
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// `[m] || ([32] || key)* || [n] || CHECKMULTISIG`
    pub fn redeem_script(&self) -> Vec<u8> {
        let mut script = Vec::with_capacity(3 + self.keys.len() * 33);
        script.push(self.required as u8);
        for key in &self.keys {
            script.push(opcode::PUSH32);
            script.extend_from_slice(key.as_bytes());
        }
        script.push(self.keys.len() as u8);
        script.push(opcode::CHECKMULTISIG);
        script
    }

    pub fn program_hash(&self) -> ProgramHash {
        ProgramHash::multisig(&self.redeem_script())
    }

    pub fn placeholder_program(&self) -> Program {
        Program::placeholder(self.redeem_script())
    }
}

/// Signature parameter in ascending signer order
///
/// The map's ordering makes the result independent of arrival order.
pub fn merge_signatures(signatures: &BTreeMap<PublicKey, Signature>) -> Vec<u8> {
    let mut parameter = Vec::with_capacity(signatures.len() * 65);
    for signature in signatures.values() {
        parameter.push(opcode::PUSH64);
        parameter.extend_from_slice(signature.as_bytes());
    }
    parameter
}

/// Source of the custodian policy transactions are built against
pub trait CustodianPolicy: Send + Sync {
    fn multisig_policy(&self) -> MultiSigPolicy;
}

impl CustodianPolicy for MultiSigPolicy {
    fn multisig_policy(&self) -> MultiSigPolicy {
        self.clone()
    }
}
