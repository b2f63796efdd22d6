//! Watchers turning confirmed user transactions into intents

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cross_chain_types::{CrossChainIntent, DepositInfo, Payload, ProgramHash, Transaction};

use crate::node::IntentSink;
use crate::parser::{parse_deposit_info, parse_withdraw_info};
use crate::sync::AccountListener;

/// Main chain listener: deposits into known genesis addresses
pub struct DepositWatcher {
    genesis_addresses: BTreeSet<ProgramHash>,
    sink: Arc<dyn IntentSink>,
}

impl DepositWatcher {
    pub fn new(genesis_addresses: impl IntoIterator<Item = ProgramHash>, sink: Arc<dyn IntentSink>) -> Self {
        Self {
            genesis_addresses: genesis_addresses.into_iter().collect(),
            sink,
        }
    }
}

impl AccountListener for DepositWatcher {
    fn on_transaction_confirmed(&self, tx: &Transaction, height: u32) {
        if tx.payload != Payload::TransferCrossChainAsset {
            return;
        }

        // one intent per side chain the transaction deposits into
        let mut by_chain: BTreeMap<ProgramHash, Vec<DepositInfo>> = BTreeMap::new();
        for deposit in parse_deposit_info(tx) {
            if self.genesis_addresses.contains(&deposit.main_chain_program_hash) {
                by_chain
                    .entry(deposit.main_chain_program_hash)
                    .or_default()
                    .push(deposit);
            }
        }

        let tx_id = tx.hash();
        for (genesis_address, deposits) in by_chain {
            tracing::info!(
                "Deposit {} at height {} into {} ({} outputs)",
                tx_id,
                height,
                genesis_address,
                deposits.len()
            );
            self.sink.submit_intent(CrossChainIntent::Deposit {
                genesis_address,
                main_chain_transaction: tx_id,
                deposits,
            });
        }
    }
}

/// Side chain listener: burns to the destroy address
pub struct WithdrawWatcher {
    genesis_address: ProgramHash,
    destroy_address: ProgramHash,
    sink: Arc<dyn IntentSink>,
}

impl WithdrawWatcher {
    pub fn new(
        genesis_address: ProgramHash,
        destroy_address: ProgramHash,
        sink: Arc<dyn IntentSink>,
    ) -> Self {
        Self {
            genesis_address,
            destroy_address,
            sink,
        }
    }
}

impl AccountListener for WithdrawWatcher {
    fn on_transaction_confirmed(&self, tx: &Transaction, height: u32) {
        if tx.payload != Payload::TransferCrossChainAsset
            || !tx.outputs.iter().any(|o| o.program_hash == self.destroy_address)
        {
            return;
        }

        let targets = parse_withdraw_info(tx, &self.destroy_address);
        if targets.is_empty() {
            tracing::warn!("Burn {} at height {} carries no withdraw target", tx.hash(), height);
            return;
        }

        let tx_id = tx.hash();
        tracing::info!("Withdraw {} at height {} ({} targets)", tx_id, height, targets.len());
        self.sink.submit_intent(CrossChainIntent::Withdraw {
            genesis_address: self.genesis_address,
            side_chain_transaction: tx_id,
            targets,
        });
    }
}
