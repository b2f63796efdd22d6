//! Arbitrator group - membership epochs and on-duty rotation
//!
//! The on-duty arbitrator for a main chain height is
//! `set_at(height)[height % len]`. It is never stored: every arbiter derives
//! it from the height and the membership epoch in effect at that height.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use cross_chain_types::{CustodianPolicy, MultiSigPolicy, PublicKey};
use parking_lot::RwLock;

use crate::error::GroupError;

/// One membership epoch
#[derive(Debug, Clone)]
struct Epoch {
    /// Rotation order
    arbitrators: Vec<PublicKey>,
    policy: MultiSigPolicy,
}

pub struct ArbitratorGroup {
    local_key: PublicKey,
    /// Effective height -> epoch
    epochs: RwLock<BTreeMap<u32, Epoch>>,
    current_height: AtomicU32,
    min_signers: Option<usize>,
}

impl ArbitratorGroup {
    /// Group with one epoch starting at height 0
    pub fn new(
        local_key: PublicKey,
        arbitrators: Vec<PublicKey>,
        min_signers: Option<usize>,
    ) -> Result<Self, GroupError> {
        let epoch = Self::make_epoch(arbitrators, min_signers)?;
        let mut epochs = BTreeMap::new();
        epochs.insert(0, epoch);
        Ok(Self {
            local_key,
            epochs: RwLock::new(epochs),
            current_height: AtomicU32::new(0),
            min_signers,
        })
    }

    fn make_epoch(arbitrators: Vec<PublicKey>, min_signers: Option<usize>) -> Result<Epoch, GroupError> {
        if arbitrators.is_empty() {
            return Err(GroupError::EmptySet);
        }
        let mut seen = HashSet::new();
        for key in &arbitrators {
            if !seen.insert(*key) {
                return Err(GroupError::DuplicateArbitrator(*key));
            }
        }

        let quorum = match min_signers {
            Some(n) => n.clamp(1, arbitrators.len()),
            None => arbitrators.len() / 2 + 1,
        };
        let policy = MultiSigPolicy::new(&arbitrators, quorum)
            .map_err(|_| GroupError::EmptySet)?;
        Ok(Epoch {
            arbitrators,
            policy,
        })
    }

    pub fn local_key(&self) -> PublicKey {
        self.local_key
    }

    /// Arbitrator set in effect at `height`
    pub fn arbitrators_at(&self, height: u32) -> Vec<PublicKey> {
        self.with_epoch(height, |e| e.arbitrators.clone())
    }

    fn with_epoch<T>(&self, height: u32, f: impl FnOnce(&Epoch) -> T) -> T {
        let epochs = self.epochs.read();
        // updates are never retroactive, so epoch 0 is never replaced
        let (_, epoch) = epochs
            .range(..=height)
            .next_back()
            .expect("arbitrator group always has an epoch at height 0");
        f(epoch)
    }

    pub fn on_duty_arbitrator(&self, height: u32) -> PublicKey {
        self.with_epoch(height, |e| {
            e.arbitrators[height as usize % e.arbitrators.len()]
        })
    }

    pub fn is_on_duty(&self, height: u32) -> bool {
        self.on_duty_arbitrator(height) == self.local_key
    }

    pub fn is_arbitrator(&self, key: &PublicKey, height: u32) -> bool {
        self.with_epoch(height, |e| e.arbitrators.contains(key))
    }

    /// Signatures needed for a proposal made at `height`
    pub fn required_quorum(&self, height: u32) -> usize {
        self.with_epoch(height, |e| e.policy.required())
    }

    pub fn policy_at(&self, height: u32) -> MultiSigPolicy {
        self.with_epoch(height, |e| e.policy.clone())
    }

    /// Schedule a new arbitrator set from `effective_height` on
    pub fn update_arbitrators(
        &self,
        effective_height: u32,
        arbitrators: Vec<PublicKey>,
    ) -> Result<(), GroupError> {
        let epoch = Self::make_epoch(arbitrators, self.min_signers)?;

        let mut epochs = self.epochs.write();
        let latest = epochs.keys().next_back().copied().unwrap_or(0);
        let current = self.current_height().max(latest);
        if effective_height <= current {
            return Err(GroupError::RetroactiveUpdate {
                effective: effective_height,
                current,
            });
        }

        tracing::info!(
            "Arbitrator set of {} scheduled at height {}",
            epoch.arbitrators.len(),
            effective_height
        );
        epochs.insert(effective_height, epoch);
        Ok(())
    }

    pub fn current_height(&self) -> u32 {
        self.current_height.load(Ordering::Acquire)
    }

    /// Advance the main chain height; lower heights are ignored
    pub fn set_current_height(&self, height: u32) -> bool {
        let previous = self.current_height.fetch_max(height, Ordering::AcqRel);
        if height > previous {
            tracing::debug!(
                "Group height {} (on duty: {})",
                height,
                self.on_duty_arbitrator(height).short()
            );
            true
        } else {
            false
        }
    }
}

impl CustodianPolicy for ArbitratorGroup {
    fn multisig_policy(&self) -> MultiSigPolicy {
        self.policy_at(self.current_height())
    }
}
