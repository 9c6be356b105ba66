//! Transfer extraction from receipts.

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::config::ChainConfig;
use crate::rpc::Receipt;
use crate::submit::collaborators::TransferEvent;

sol! {
    /// ERC-20 transfer.
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Native transfer (from the transaction itself) followed by every ERC-20
/// `Transfer` log in the receipt. ERC-721 transfers (value indexed) are
/// skipped.
pub fn collect_transfers(
    receipt: &Receipt,
    native_value: U256,
    chain: &ChainConfig,
) -> Vec<TransferEvent> {
    let mut transfers = Vec::new();

    if !native_value.is_zero() {
        if let Some(to) = receipt.to {
            transfers.push(TransferEvent {
                token: None,
                symbol: chain.native_currency.clone(),
                from: receipt.from,
                to,
                amount: native_value,
            });
        }
    }

    for log in &receipt.logs {
        let topics = log.data.topics();
        if topics.len() != 3 || topics[0] != Transfer::SIGNATURE_HASH || log.data.data.len() != 32 {
            continue;
        }
        transfers.push(TransferEvent {
            token: Some(log.address),
            symbol: chain
                .token_symbol(&log.address)
                .map(str::to_string)
                .unwrap_or_else(|| log.address.to_string()),
            from: Address::from_word(topics[1]),
            to: Address::from_word(topics[2]),
            amount: U256::from_be_slice(&log.data.data),
        });
    }

    transfers
}
