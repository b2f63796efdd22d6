//! Transaction Builder - unsigned cross-chain transactions
//!
//! Every arbiter must build the same bytes for the same intent, otherwise
//! proposals are rejected. Output order, input selection and change placement
//! are therefore fixed:
//! - inputs are taken from the store in insertion order until they cover the amount
//! - target outputs come first in request order, change (if any) last
//! - the program list holds the custodian redeem script with an empty parameter

use std::sync::Arc;

use cross_chain_types::{
    CustodianPolicy, DepositInfo, Hash256, Payload, ProgramHash, Transaction, TxInput, TxOutput,
    WithdrawInfo,
};

use crate::error::BridgeError;
use crate::sync::ChainSynchronizer;

pub struct TransactionBuilder {
    synchronizer: Arc<ChainSynchronizer>,
    policy: Arc<dyn CustodianPolicy>,
}

impl TransactionBuilder {
    pub fn new(synchronizer: Arc<ChainSynchronizer>, policy: Arc<dyn CustodianPolicy>) -> Self {
        Self {
            synchronizer,
            policy,
        }
    }

    pub fn synchronizer(&self) -> &Arc<ChainSynchronizer> {
        &self.synchronizer
    }

    /// Pay `amount` from `genesis_address` to `target`.
    ///
    /// Syncs first so already-spent records are not reused.
    pub async fn build_withdraw_transaction(
        &self,
        genesis_address: &ProgramHash,
        target: &ProgramHash,
        amount: u64,
    ) -> Result<Transaction, BridgeError> {
        self.synchronizer.sync().await?;
        let targets = [WithdrawInfo {
            target_address: *target,
            amount,
        }];
        self.assemble_withdraw(
            genesis_address,
            &targets,
            Payload::WithdrawFromSideChain {
                side_chain_transaction_hashes: Vec::new(),
            },
        )
    }

    /// Main chain withdraw realizing a side chain transaction
    pub async fn build_withdraw_from_side_chain(
        &self,
        genesis_address: &ProgramHash,
        side_chain_transaction: Hash256,
        targets: &[WithdrawInfo],
    ) -> Result<Transaction, BridgeError> {
        self.synchronizer.sync().await?;
        self.assemble_withdraw(
            genesis_address,
            targets,
            Payload::WithdrawFromSideChain {
                side_chain_transaction_hashes: vec![side_chain_transaction],
            },
        )
    }

    /// Withdraw assembled from the current store contents, no sync
    pub fn assemble_withdraw(
        &self,
        genesis_address: &ProgramHash,
        targets: &[WithdrawInfo],
        payload: Payload,
    ) -> Result<Transaction, BridgeError> {
        if targets.is_empty() {
            return Err(BridgeError::InvalidWithdraw("no targets".to_string()));
        }
        let mut required: u64 = 0;
        for target in targets {
            if target.amount == 0 {
                return Err(BridgeError::InvalidWithdraw(format!(
                    "zero amount to {}",
                    target.target_address
                )));
            }
            required = required
                .checked_add(target.amount)
                .ok_or_else(|| BridgeError::InvalidWithdraw("amount overflow".to_string()))?;
        }

        let mut inputs: Vec<TxInput> = Vec::new();
        let mut selected: u64 = 0;
        for utxo in self.synchronizer.store().get_utxos(genesis_address) {
            if selected >= required {
                break;
            }
            inputs.push(utxo.to_input());
            selected = selected.saturating_add(utxo.amount);
        }

        if selected < required {
            return Err(BridgeError::InsufficientFunds {
                requested: required,
                available: selected,
            });
        }

        let mut outputs: Vec<TxOutput> = targets
            .iter()
            .map(|t| TxOutput::new(t.target_address, t.amount))
            .collect();
        if selected > required {
            outputs.push(TxOutput::new(*genesis_address, selected - required));
        }

        tracing::debug!(
            "Built withdraw of {} from {} ({} inputs, change {})",
            required,
            genesis_address,
            inputs.len(),
            selected - required
        );

        Ok(Transaction {
            payload,
            attributes: Vec::new(),
            inputs,
            outputs,
            lock_time: 0,
            programs: vec![self.policy.multisig_policy().placeholder_program()],
        })
    }

    /// Side chain deposit minting `deposits` for a main chain transaction
    pub fn build_deposit_transaction(
        &self,
        main_chain_transaction: Hash256,
        deposits: &[DepositInfo],
    ) -> Result<Transaction, BridgeError> {
        if deposits.is_empty() {
            return Err(BridgeError::InvalidWithdraw("no deposits".to_string()));
        }
        let outputs = deposits
            .iter()
            .map(|d| TxOutput::new(d.target_program_hash, d.amount))
            .collect();

        Ok(Transaction {
            payload: Payload::RechargeToSideChain {
                main_chain_transaction_hash: main_chain_transaction,
            },
            attributes: Vec::new(),
            inputs: Vec::new(),
            outputs,
            lock_time: 0,
            programs: vec![self.policy.multisig_policy().placeholder_program()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockChain};
    use cross_chain_types::{MultiSigPolicy, ProgramHash};

    fn policy() -> Arc<dyn CustodianPolicy> {
        Arc::new(MultiSigPolicy::new(&[mock::key(1), mock::key(2), mock::key(3)], 2).unwrap())
    }

    /// Chain whose genesis address holds outputs of 5 then 3
    fn funded() -> (tempfile::TempDir, Arc<MockChain>, TransactionBuilder) {
        let chain = Arc::new(MockChain::new());
        chain.push_block(vec![mock::transfer(vec![], vec![TxOutput::new(mock::genesis(), 5)])]);
        chain.push_block(vec![mock::transfer(vec![], vec![TxOutput::new(mock::genesis(), 3)])]);
        chain.push_block(vec![]);

        let (dir, store) = mock::temp_store("main");
        let sync = ChainSynchronizer::new("main", chain.clone(), store)
            .with_tracked_address(mock::genesis(), mock::destroy());
        (dir, chain, TransactionBuilder::new(Arc::new(sync), policy()))
    }

    #[tokio::test]
    async fn test_withdraw_selects_in_order_with_change() {
        let (_dir, _chain, builder) = funded();
        let target = mock::user();

        let tx = builder
            .build_withdraw_transaction(&mock::genesis(), &target, 6)
            .await
            .unwrap();

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(
            tx.outputs,
            vec![TxOutput::new(target, 6), TxOutput::new(mock::genesis(), 2)]
        );
        assert_eq!(tx.programs.len(), 1);
        assert!(tx.programs[0].parameter.is_empty());
        assert_eq!(tx.programs[0].required_signatures(), Some(2));
    }

    #[tokio::test]
    async fn test_withdraw_exact_amount_has_no_change() {
        let (_dir, _chain, builder) = funded();
        let tx = builder
            .build_withdraw_transaction(&mock::genesis(), &mock::user(), 5)
            .await
            .unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs, vec![TxOutput::new(mock::user(), 5)]);
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_funds() {
        let (_dir, _chain, builder) = funded();
        let err = builder
            .build_withdraw_transaction(&mock::genesis(), &mock::user(), 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InsufficientFunds { requested: 10, available: 8 }
        ));
    }

    #[tokio::test]
    async fn test_withdraw_is_deterministic() {
        let (_dir, _chain, builder) = funded();
        let side_tx = Hash256::digest(b"side tx");
        let targets = vec![
            WithdrawInfo { target_address: mock::user(), amount: 2 },
            WithdrawInfo { target_address: ProgramHash::standard(&mock::key(9)), amount: 4 },
        ];

        let first = builder
            .build_withdraw_from_side_chain(&mock::genesis(), side_tx, &targets)
            .await
            .unwrap();
        let second = builder
            .build_withdraw_from_side_chain(&mock::genesis(), side_tx, &targets)
            .await
            .unwrap();

        assert_eq!(first.to_bytes(), second.to_bytes());
        assert_eq!(first.outputs[0].program_hash, mock::user());
        assert_eq!(
            first.payload,
            Payload::WithdrawFromSideChain { side_chain_transaction_hashes: vec![side_tx] }
        );
    }

    #[tokio::test]
    async fn test_withdraw_fails_when_sync_fails() {
        let (_dir, chain, builder) = funded();
        chain.fail_block_at(0);
        let err = builder
            .build_withdraw_transaction(&mock::genesis(), &mock::user(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::TransientRpcFailure(_)));
    }

    #[tokio::test]
    async fn test_withdraw_rejects_zero_amount() {
        let (_dir, _chain, builder) = funded();
        let err = builder
            .build_withdraw_transaction(&mock::genesis(), &mock::user(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidWithdraw(_)));
    }

    #[test]
    fn test_deposit_outputs_follow_request_order() {
        let (_dir, store) = mock::temp_store("side");
        let sync = ChainSynchronizer::new("side", Arc::new(MockChain::new()), store);
        let builder = TransactionBuilder::new(Arc::new(sync), policy());

        let main_tx = Hash256::digest(b"main tx");
        let deposits = vec![
            DepositInfo {
                main_chain_program_hash: mock::genesis(),
                target_program_hash: ProgramHash::standard(&mock::key(7)),
                amount: 11,
            },
            DepositInfo {
                main_chain_program_hash: mock::genesis(),
                target_program_hash: ProgramHash::standard(&mock::key(8)),
                amount: 4,
            },
        ];

        let tx = builder.build_deposit_transaction(main_tx, &deposits).unwrap();
        assert!(tx.inputs.is_empty());
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 11);
        assert_eq!(tx.outputs[1].value, 4);
        assert_eq!(
            tx.payload,
            Payload::RechargeToSideChain { main_chain_transaction_hash: main_tx }
        );
    }
}
