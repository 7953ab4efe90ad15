use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Which block state a transaction count is read against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
    /// Includes transactions still sitting in the mempool
    Pending,
    /// Mined transactions only
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Fully resolved parameters for a single submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionParams {
    pub from: Address,
    pub to: Address,
    pub chain_id: u64,
    pub nonce: u64,
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    /// `true` when execution succeeded
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Read-only ledger queries.
pub trait LedgerReader: Send + Sync {
    fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> impl Future<Output = Result<u64, RelayError>> + Send;

    fn estimate_fees_per_gas(&self) -> impl Future<Output = Result<FeeEstimate, RelayError>> + Send;
}

/// Signing client bound to one chain and one or more local accounts.
pub trait LedgerWriter: Send + Sync {
    fn get_chain_id(&self) -> impl Future<Output = Result<u64, RelayError>> + Send;

    fn get_addresses(&self) -> impl Future<Output = Result<Vec<Address>, RelayError>> + Send;

    fn send_transaction(
        &self,
        params: SendTransactionParams,
    ) -> impl Future<Output = Result<B256, RelayError>> + Send;

    fn wait_for_transaction_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> impl Future<Output = Result<TransactionReceipt, RelayError>> + Send;
}
