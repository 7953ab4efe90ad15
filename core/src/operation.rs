use std::fmt::Display;

use alloy::primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{bigint, error::RelayError, ledger::TransactionReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Queued,
    Processing,
    Submitted,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Processing => "processing",
            OperationStatus::Submitted => "submitted",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ### TransactionRequest
/// The caller-supplied transaction as it sits in the queue. Nonce and sender
/// are resolved at submission time; fee fields are escalated on retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: Address,

    #[serde(default)]
    pub data: Bytes,

    #[serde(with = "bigint")]
    pub value: U256,

    #[serde(default, with = "bigint::option", skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,

    #[serde(default, with = "bigint::option", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u128>,

    #[serde(default, with = "bigint::option", skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<u128>,

    /// Legacy pricing, used only when no EIP-1559 fields are set
    #[serde(default, with = "bigint::option", skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
}

impl TransactionRequest {
    pub fn new(to: Address, value: U256) -> Self {
        Self {
            to,
            data: Bytes::new(),
            value,
            gas_limit: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_price: None,
        }
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_max_fee_per_gas(mut self, fee: u128) -> Self {
        self.max_fee_per_gas = Some(fee);
        self
    }

    pub fn with_max_priority_fee_per_gas(mut self, fee: u128) -> Self {
        self.max_priority_fee_per_gas = Some(fee);
        self
    }

    pub fn with_gas_price(mut self, price: u128) -> Self {
        self.gas_price = Some(price);
        self
    }

    pub fn encode_payload(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode_payload(payload: &str) -> Result<Self, RelayError> {
        serde_json::from_str(payload).map_err(|e| RelayError::payload(e.to_string()))
    }
}

/// Optional fields recorded alongside a status transition. Only the fields
/// that are set overwrite the stored operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TransactionReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusMetadata {
    pub fn retry(retry_count: u32, error: impl Into<String>) -> Self {
        Self {
            retry_count: Some(retry_count),
            last_error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn submitted(hash: B256, nonce: u64) -> Self {
        Self {
            transaction_hash: Some(hash),
            nonce: Some(nonce),
            ..Default::default()
        }
    }

    pub fn completed(receipt: TransactionReceipt) -> Self {
        Self {
            transaction_hash: Some(receipt.transaction_hash),
            receipt: Some(receipt),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    pub status: OperationStatus,
    /// JSON encoded [`TransactionRequest`]
    pub payload: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub transaction_hash: Option<B256>,
    pub nonce: Option<u64>,
    pub receipt: Option<TransactionReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueuedOperation {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: OperationStatus::Queued,
            payload: payload.into(),
            retry_count: 0,
            last_error: None,
            transaction_hash: None,
            nonce: None,
            receipt: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn from_request(
        id: impl Into<String>,
        request: &TransactionRequest,
    ) -> Result<Self, RelayError> {
        Ok(Self::new(id, request.encode_payload()?))
    }

    /// Applies a status transition in place and bumps `updated_at`.
    pub fn apply(&mut self, status: OperationStatus, metadata: Option<&StatusMetadata>) {
        self.status = status;
        self.updated_at = Utc::now();

        let Some(meta) = metadata else {
            return;
        };
        if let Some(retry_count) = meta.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(err) = &meta.last_error {
            self.last_error = Some(err.clone());
        }
        if let Some(hash) = meta.transaction_hash {
            self.transaction_hash = Some(hash);
        }
        if let Some(nonce) = meta.nonce {
            self.nonce = Some(nonce);
        }
        if let Some(receipt) = &meta.receipt {
            self.receipt = Some(receipt.clone());
        }
        if let Some(completed_at) = meta.completed_at {
            self.completed_at = Some(completed_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn payload_survives_text_storage() {
        let request = TransactionRequest::new(
            address!("0x1111111111111111111111111111111111111111"),
            U256::from(10u64).pow(U256::from(24u64)),
        )
        .with_gas_limit(21_000)
        .with_max_fee_per_gas(20_000_000_000)
        .with_max_priority_fee_per_gas(1_000_000_000);

        let payload = request.encode_payload().unwrap();
        assert!(payload.contains("\"value\":\"__bigint__1000000000000000000000000\""));
        assert!(payload.contains("\"maxFeePerGas\":\"__bigint__20000000000\""));
        assert!(!payload.contains("gasPrice"));

        assert_eq!(TransactionRequest::decode_payload(&payload).unwrap(), request);
    }

    #[test]
    fn malformed_payload_is_a_payload_error() {
        let err = TransactionRequest::decode_payload(
            r#"{"to":"0x1111111111111111111111111111111111111111","value":"7"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::Payload { .. }));
    }

    #[test]
    fn apply_only_overwrites_present_fields() {
        let mut op = QueuedOperation::new("op-1", "{}");
        op.apply(
            OperationStatus::Queued,
            Some(&StatusMetadata::retry(1, "boom")),
        );
        op.apply(OperationStatus::Processing, None);

        assert_eq!(op.status, OperationStatus::Processing);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.last_error.as_deref(), Some("boom"));
        assert!(op.completed_at.is_none());
    }
}
