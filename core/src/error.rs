use std::fmt::Display;

use alloy::transports::{RpcError as AlloyRpcError, TransportErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a transaction is still unresolved from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    TimedOut,
    Cancelled,
}

impl Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingReason::TimedOut => write!(f, "timed out"),
            PendingReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Raised when status resolution stops before the operation reached a final
/// state. Carries everything needed to resume polling later, including from
/// a different process.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("operation {operation_id} is still pending ({reason}), last known status: {}", .last_status.as_deref().unwrap_or("unknown"))]
pub struct TransactionPendingError {
    pub operation_id: String,
    pub last_status: Option<String>,
    pub reason: PendingReason,
}

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayError {
    /// Lock or assignment failure in the nonce manager
    #[error("nonce error: {message}")]
    Nonce { message: String },

    /// Ledger RPC or contract failure
    #[error("blockchain error: {message}")]
    Blockchain {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
    },

    /// Off-chain submission failure reported by the relayer service
    #[error("relayer error: {message}")]
    Relayer {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("signature error: {message}")]
    Signature { message: String },

    /// The account holder explicitly declined to sign
    #[error("user rejected request: {message}")]
    UserRejectedRequest { message: String },

    #[error(transparent)]
    TransactionPending(TransactionPendingError),

    #[error("store error: {message}")]
    Store { message: String },

    #[error("invalid payload: {message}")]
    Payload { message: String },
}

impl RelayError {
    pub fn blockchain(message: impl Into<String>) -> Self {
        RelayError::Blockchain {
            message: message.into(),
            code: None,
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        RelayError::Payload {
            message: message.into(),
        }
    }

    /// Transport failures and server-side relayer failures can succeed on a
    /// later attempt; everything else is final for the current call.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Network { .. } => true,
            RelayError::Relayer {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Payload {
            message: err.to_string(),
        }
    }
}

/// Maps alloy transport errors into the relay taxonomy
pub trait AlloyRpcErrorToRelayError {
    fn to_relay_error(&self) -> RelayError;
}

impl AlloyRpcErrorToRelayError for AlloyRpcError<TransportErrorKind> {
    fn to_relay_error(&self) -> RelayError {
        match self {
            // EIP-1193 user rejection, surfaced by wallet-backed signers
            AlloyRpcError::ErrorResp(payload) if payload.code == 4001 => {
                RelayError::UserRejectedRequest {
                    message: payload.message.to_string(),
                }
            }
            AlloyRpcError::ErrorResp(payload) => RelayError::Blockchain {
                message: payload.message.to_string(),
                code: Some(payload.code),
            },
            AlloyRpcError::Transport(TransportErrorKind::HttpError(http)) => {
                if http.status >= 500 || http.status == 429 {
                    RelayError::Network {
                        message: format!("HTTP error {}: {}", http.status, http.body),
                    }
                } else {
                    RelayError::Blockchain {
                        message: format!("HTTP error {}: {}", http.status, http.body),
                        code: None,
                    }
                }
            }
            AlloyRpcError::Transport(kind) => RelayError::Network {
                message: kind.to_string(),
            },
            AlloyRpcError::NullResp => RelayError::blockchain(
                "server returned a null response when a non-null response was expected",
            ),
            other => RelayError::blockchain(other.to_string()),
        }
    }
}
