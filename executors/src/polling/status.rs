use alloy::primitives::B256;
use relay_core::error::RelayError;
use serde::{Deserialize, Serialize};

/// Request sent to the relayer to ask where an operation stands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusCheckRequest {
    StatusCheck {
        #[serde(rename = "operationId")]
        operation_id: String,
    },
}

impl StatusCheckRequest {
    pub fn new(operation_id: impl Into<String>) -> Self {
        StatusCheckRequest::StatusCheck {
            operation_id: operation_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PendingStage {
    Queued,
    Processing,
}

/// Relayer responses, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayerResponse {
    #[serde(rename_all = "camelCase")]
    Pending {
        #[serde(default)]
        stage: Option<PendingStage>,
        #[serde(default)]
        queue_position: Option<u32>,
    },
    Submitted {
        hash: B256,
    },
    Confirmed {
        hash: B256,
        #[serde(default)]
        receipt: Option<serde_json::Value>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    /// Returned by signing requests, never meaningful for a status check
    Signed {
        #[serde(default)]
        signature: Option<String>,
    },
    /// Returned when the caller should submit directly
    Direct {
        #[serde(default)]
        hash: Option<B256>,
    },
}

impl RelayerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayerResponse::Pending { .. } => "pending",
            RelayerResponse::Submitted { .. } => "submitted",
            RelayerResponse::Confirmed { .. } => "confirmed",
            RelayerResponse::Error { .. } => "error",
            RelayerResponse::Signed { .. } => "signed",
            RelayerResponse::Direct { .. } => "direct",
        }
    }
}

/// Source of status answers for the polling manager
pub trait StatusChecker: Send + Sync {
    fn check_status(
        &self,
        operation_id: &str,
    ) -> impl Future<Output = Result<RelayerResponse, RelayError>> + Send;
}

/// Where an operation stands, as seen by a poller
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Queued { position: Option<u32> },
    Processing,
    Submitted { hash: B256 },
    Confirmed {
        hash: B256,
        receipt: Option<serde_json::Value>,
    },
    Failed { reason: String },
}

impl PollStatus {
    pub fn kind(&self) -> &'static str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::Queued { .. } => "queued",
            PollStatus::Processing => "processing",
            PollStatus::Submitted { .. } => "submitted",
            PollStatus::Confirmed { .. } => "confirmed",
            PollStatus::Failed { .. } => "failed",
        }
    }

    /// A change is a different kind of state, or a moved queue position
    /// while queued. Repeated identical observations are not changes.
    pub fn is_change_from(&self, previous: Option<&PollStatus>) -> bool {
        match (previous, self) {
            (None, _) => true,
            (
                Some(PollStatus::Queued { position: before }),
                PollStatus::Queued { position: after },
            ) => before != after,
            (Some(before), after) => before.kind() != after.kind(),
        }
    }
}

impl TryFrom<RelayerResponse> for PollStatus {
    type Error = RelayError;

    fn try_from(response: RelayerResponse) -> Result<Self, Self::Error> {
        match response {
            RelayerResponse::Pending {
                stage,
                queue_position,
            } => Ok(match stage {
                Some(PendingStage::Queued) => PollStatus::Queued {
                    position: queue_position,
                },
                Some(PendingStage::Processing) => PollStatus::Processing,
                None if queue_position.is_some() => PollStatus::Queued {
                    position: queue_position,
                },
                None => PollStatus::Pending,
            }),
            RelayerResponse::Submitted { hash } => Ok(PollStatus::Submitted { hash }),
            RelayerResponse::Confirmed { hash, receipt } => {
                Ok(PollStatus::Confirmed { hash, receipt })
            }
            RelayerResponse::Error { error } => Ok(PollStatus::Failed {
                reason: error.unwrap_or_else(|| "unknown relayer error".to_string()),
            }),
            other @ (RelayerResponse::Signed { .. } | RelayerResponse::Direct { .. }) => {
                Err(RelayError::Relayer {
                    message: format!("unexpected `{}` response to status check", other.kind()),
                    status: None,
                    body: None,
                })
            }
        }
    }
}
