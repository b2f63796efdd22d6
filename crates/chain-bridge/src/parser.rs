//! Deposit and withdraw extraction from confirmed user transactions
//!
//! A main chain deposit tags each cross-chain output with a `TargetPublicKey`
//! attribute (`public key || output index`); a side chain withdraw tags each
//! output burned to the destroy address with a `CrossChainAddress` attribute
//! (`output index || main chain address`). Malformed attributes are logged
//! and skipped so one bad attribute never hides the valid ones. A withdraw
//! attribute pointing at an output that does not pay the destroy address is
//! malformed too: only burned value can be withdrawn.

use cross_chain_types::{
    AttributeUsage, DepositInfo, ProgramHash, PublicKey, Transaction, WithdrawInfo,
};

use crate::error::BridgeError;

const PUBLIC_KEY_LEN: usize = 32;

/// Deposits requested by a main chain transaction
pub fn parse_deposit_info(tx: &Transaction) -> Vec<DepositInfo> {
    let mut deposits = Vec::new();
    for (index, attribute) in tx.attributes.iter().enumerate() {
        if attribute.usage != AttributeUsage::TargetPublicKey {
            continue;
        }
        match decode_target_public_key(index, &attribute.data, tx) {
            Ok(info) => deposits.push(info),
            Err(e) => tracing::warn!("Skipping deposit attribute of {}: {}", tx.hash(), e),
        }
    }
    deposits
}

fn decode_target_public_key(
    index: usize,
    data: &[u8],
    tx: &Transaction,
) -> Result<DepositInfo, BridgeError> {
    let malformed = |reason: String| BridgeError::MalformedAttribute { index, reason };

    if data.len() != PUBLIC_KEY_LEN + 1 {
        return Err(malformed(format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_LEN + 1,
            data.len()
        )));
    }
    let key = PublicKey::from_slice(&data[..PUBLIC_KEY_LEN]).map_err(|e| malformed(e.to_string()))?;
    let output_index = data[PUBLIC_KEY_LEN] as usize;
    let output = tx
        .outputs
        .get(output_index)
        .ok_or_else(|| malformed(format!("output {} does not exist", output_index)))?;

    Ok(DepositInfo {
        main_chain_program_hash: output.program_hash,
        target_program_hash: ProgramHash::standard(&key),
        amount: output.value,
    })
}

/// Withdraws requested by a side chain transaction burning to `destroy_address`
pub fn parse_withdraw_info(tx: &Transaction, destroy_address: &ProgramHash) -> Vec<WithdrawInfo> {
    let mut withdraws = Vec::new();
    for (index, attribute) in tx.attributes.iter().enumerate() {
        if attribute.usage != AttributeUsage::CrossChainAddress {
            continue;
        }
        match decode_cross_chain_address(index, &attribute.data, tx, destroy_address) {
            Ok(info) => withdraws.push(info),
            Err(e) => tracing::warn!("Skipping withdraw attribute of {}: {}", tx.hash(), e),
        }
    }
    withdraws
}

fn decode_cross_chain_address(
    index: usize,
    data: &[u8],
    tx: &Transaction,
    destroy_address: &ProgramHash,
) -> Result<WithdrawInfo, BridgeError> {
    let malformed = |reason: String| BridgeError::MalformedAttribute { index, reason };

    let (&output_index, address) = data
        .split_first()
        .ok_or_else(|| malformed("empty attribute".to_string()))?;
    let address = std::str::from_utf8(address).map_err(|e| malformed(e.to_string()))?;
    let target_address = ProgramHash::from_address(address).map_err(|e| malformed(e.to_string()))?;
    let output = tx
        .outputs
        .get(output_index as usize)
        .ok_or_else(|| malformed(format!("output {} does not exist", output_index)))?;
    if &output.program_hash != destroy_address {
        return Err(malformed(format!("output {} is not burned", output_index)));
    }

    Ok(WithdrawInfo {
        target_address,
        amount: output.value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;
    use cross_chain_types::{Payload, TxAttribute, TxOutput};

    fn cross_chain_tx(attributes: Vec<TxAttribute>, outputs: Vec<TxOutput>) -> Transaction {
        Transaction {
            payload: Payload::TransferCrossChainAsset,
            attributes,
            inputs: vec![],
            outputs,
            lock_time: 0,
            programs: vec![],
        }
    }

    fn target_key_attr(key: &PublicKey, output: u8) -> TxAttribute {
        let mut data = key.as_bytes().to_vec();
        data.push(output);
        TxAttribute::new(AttributeUsage::TargetPublicKey, data)
    }

    fn address_attr(output: u8, address: &ProgramHash) -> TxAttribute {
        let mut data = vec![output];
        data.extend_from_slice(address.to_address().as_bytes());
        TxAttribute::new(AttributeUsage::CrossChainAddress, data)
    }

    #[test]
    fn test_parse_deposit_info() {
        let key = mock::key(5);
        let tx = cross_chain_tx(
            vec![target_key_attr(&key, 1)],
            vec![TxOutput::new(mock::user(), 1), TxOutput::new(mock::genesis(), 40)],
        );

        let deposits = parse_deposit_info(&tx);
        assert_eq!(
            deposits,
            vec![DepositInfo {
                main_chain_program_hash: mock::genesis(),
                target_program_hash: ProgramHash::standard(&key),
                amount: 40,
            }]
        );
    }

    #[test]
    fn test_parse_deposit_skips_malformed_attributes() {
        let key = mock::key(5);
        let tx = cross_chain_tx(
            vec![
                TxAttribute::new(AttributeUsage::TargetPublicKey, vec![1, 2, 3]),
                target_key_attr(&key, 9),
                TxAttribute::new(AttributeUsage::Memo, b"hello".to_vec()),
                target_key_attr(&key, 0),
            ],
            vec![TxOutput::new(mock::genesis(), 12)],
        );

        let deposits = parse_deposit_info(&tx);
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].amount, 12);
    }

    #[test]
    fn test_parse_withdraw_info() {
        let target = ProgramHash::standard(&mock::key(3));
        let tx = cross_chain_tx(
            vec![address_attr(0, &target)],
            vec![TxOutput::new(mock::destroy(), 25)],
        );

        assert_eq!(
            parse_withdraw_info(&tx, &mock::destroy()),
            vec![WithdrawInfo { target_address: target, amount: 25 }]
        );
    }

    #[test]
    fn test_parse_withdraw_only_counts_burned_outputs() {
        let target = ProgramHash::standard(&mock::key(3));
        // burns 1, then points a second attribute at the sender's own change
        let tx = cross_chain_tx(
            vec![address_attr(1, &target), address_attr(0, &target)],
            vec![TxOutput::new(mock::destroy(), 1), TxOutput::new(mock::user(), 1000)],
        );

        assert_eq!(
            parse_withdraw_info(&tx, &mock::destroy()),
            vec![WithdrawInfo { target_address: target, amount: 1 }]
        );
    }

    #[test]
    fn test_parse_withdraw_rejects_bad_address() {
        let mut corrupt = vec![0u8];
        corrupt.extend_from_slice(b"not-an-address");
        let tx = cross_chain_tx(
            vec![
                TxAttribute::new(AttributeUsage::CrossChainAddress, corrupt),
                TxAttribute::new(AttributeUsage::CrossChainAddress, vec![]),
            ],
            vec![TxOutput::new(mock::destroy(), 25)],
        );
        assert!(parse_withdraw_info(&tx, &mock::destroy()).is_empty());
    }
}
