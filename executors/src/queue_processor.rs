use std::{fmt, sync::Arc, time::Duration};

use relay_core::{
    error::RelayError,
    ledger::{LedgerReader, LedgerWriter, SendTransactionParams, TransactionReceipt},
    operation::{OperationStatus, QueuedOperation, StatusMetadata, TransactionRequest},
};
use relay_store::{CoordinationStore, OperationStore};
use serde::{Deserialize, Serialize};

use crate::{
    fees::{gas_multiplier, scale_fee},
    nonce_manager::NonceManager,
};

pub type CompletionHook = Arc<dyn Fn(&str, bool) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&str, &RelayError) + Send + Sync>;

/// Per-operation callbacks fired while a batch drains
#[derive(Clone, Default)]
pub struct ProcessHooks {
    pub on_operation_complete: Option<CompletionHook>,
    pub on_operation_error: Option<ErrorHook>,
}

impl ProcessHooks {
    pub fn with_on_complete(mut self, hook: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.on_operation_complete = Some(Arc::new(hook));
        self
    }

    pub fn with_on_error(
        mut self,
        hook: impl Fn(&str, &RelayError) + Send + Sync + 'static,
    ) -> Self {
        self.on_operation_error = Some(Arc::new(hook));
        self
    }

    fn completed(&self, id: &str, success: bool) {
        if let Some(hook) = &self.on_operation_complete {
            hook(id, success);
        }
    }

    fn errored(&self, id: &str, error: &RelayError) {
        if let Some(hook) = &self.on_operation_error {
            hook(id, error);
        }
    }
}

impl fmt::Debug for ProcessHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHooks")
            .field("on_operation_complete", &self.on_operation_complete.is_some())
            .field("on_operation_error", &self.on_operation_error.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueProcessorConfig {
    /// Batch size
    pub max_operations: usize,
    pub max_retries: u32,
    pub gas_escalation_factor: f64,
    pub max_gas_multiplier: f64,
    pub receipt_timeout_ms: u64,
    #[serde(skip)]
    pub hooks: ProcessHooks,
}

impl Default for QueueProcessorConfig {
    fn default() -> Self {
        Self {
            max_operations: 10,
            max_retries: 3,
            gas_escalation_factor: 1.2,
            max_gas_multiplier: 3.0,
            receipt_timeout_ms: 60_000,
            hooks: ProcessHooks::default(),
        }
    }
}

impl QueueProcessorConfig {
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    pub fn with_hooks(mut self, hooks: ProcessHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of one `process_queue` call. Always complete, even when every
/// operation failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQueueSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub errors: Vec<OperationFailure>,
}

/// Drains queued operations one at a time: nonce, fee escalation, submit,
/// confirm, record.
pub struct QueueProcessor<O, S, L, W> {
    operations: Arc<O>,
    nonce_manager: Arc<NonceManager<S, L>>,
    writer: Arc<W>,
}

impl<O, S, L, W> QueueProcessor<O, S, L, W>
where
    O: OperationStore,
    S: CoordinationStore,
    L: LedgerReader,
    W: LedgerWriter,
{
    pub fn new(
        operations: Arc<O>,
        nonce_manager: Arc<NonceManager<S, L>>,
        writer: Arc<W>,
    ) -> Self {
        Self {
            operations,
            nonce_manager,
            writer,
        }
    }

    pub fn nonce_manager(&self) -> &NonceManager<S, L> {
        &self.nonce_manager
    }

    /// Encodes `request` and stores it as a new queued operation.
    pub async fn enqueue(
        &self,
        id: impl Into<String>,
        request: &TransactionRequest,
    ) -> Result<QueuedOperation, RelayError> {
        let operation = QueuedOperation::from_request(id, request)?;
        self.operations.store_operation(&operation).await?;
        tracing::debug!(operation_id = %operation.id, "Enqueued operation");
        Ok(operation)
    }

    #[tracing::instrument(skip_all, fields(max_operations = config.max_operations))]
    pub async fn process_queue(&self, config: &QueueProcessorConfig) -> ProcessQueueSummary {
        let mut summary = ProcessQueueSummary::default();

        let batch = match self
            .operations
            .get_queued_operations(config.max_operations)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch queued operations");
                summary.errors.push(OperationFailure {
                    id: "*".to_string(),
                    error: e.to_string(),
                });
                return summary;
            }
        };

        if batch.is_empty() {
            return summary;
        }
        tracing::debug!(batch_size = batch.len(), "Processing queued operations");

        // Sequential on purpose: nonce order follows fetch order
        for operation in batch {
            summary.processed += 1;

            match self.process_operation(&operation, config).await {
                Ok(receipt) => {
                    summary.succeeded += 1;
                    tracing::info!(
                        operation_id = %operation.id,
                        transaction_hash = %receipt.transaction_hash,
                        "Operation completed"
                    );
                    config.hooks.completed(&operation.id, true);
                }
                Err(error) => {
                    summary.failed += 1;
                    self.record_failure(&operation, &error, config).await;
                    config.hooks.completed(&operation.id, false);
                    config.hooks.errored(&operation.id, &error);
                    summary.errors.push(OperationFailure {
                        id: operation.id.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Finished processing batch"
        );
        summary
    }

    async fn process_operation(
        &self,
        operation: &QueuedOperation,
        config: &QueueProcessorConfig,
    ) -> Result<TransactionReceipt, RelayError> {
        self.operations
            .update_status(&operation.id, OperationStatus::Processing, None)
            .await?;

        let request = TransactionRequest::decode_payload(&operation.payload)?;

        let chain_id = self.writer.get_chain_id().await?;
        let from = self
            .writer
            .get_addresses()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Signature {
                message: "Signing client has no accounts".to_string(),
            })?;

        let nonce = self
            .nonce_manager
            .assign_nonce(from, chain_id)
            .await?
            .ok_or_else(|| RelayError::Nonce {
                message: "Failed to acquire nonce".to_string(),
            })?;

        let multiplier = gas_multiplier(
            operation.retry_count,
            config.gas_escalation_factor,
            config.max_gas_multiplier,
        );
        let params = SendTransactionParams {
            from,
            to: request.to,
            chain_id,
            nonce,
            value: request.value,
            data: request.data,
            gas_limit: request.gas_limit,
            max_fee_per_gas: request.max_fee_per_gas.map(|fee| scale_fee(fee, multiplier)),
            max_priority_fee_per_gas: request
                .max_priority_fee_per_gas
                .map(|fee| scale_fee(fee, multiplier)),
            gas_price: request.gas_price.map(|price| scale_fee(price, multiplier)),
        };

        tracing::debug!(
            operation_id = %operation.id,
            nonce,
            retry_count = operation.retry_count,
            gas_multiplier = multiplier,
            "Submitting transaction"
        );
        let hash = self.writer.send_transaction(params).await?;

        self.operations
            .update_status(
                &operation.id,
                OperationStatus::Submitted,
                Some(&StatusMetadata::submitted(hash, nonce)),
            )
            .await?;

        let receipt = self
            .writer
            .wait_for_transaction_receipt(hash, config.receipt_timeout())
            .await?;
        if !receipt.status {
            return Err(RelayError::blockchain(format!(
                "Transaction reverted: {hash}"
            )));
        }

        self.operations
            .update_status(
                &operation.id,
                OperationStatus::Completed,
                Some(&StatusMetadata::completed(receipt.clone())),
            )
            .await?;

        Ok(receipt)
    }

    async fn record_failure(
        &self,
        operation: &QueuedOperation,
        error: &RelayError,
        config: &QueueProcessorConfig,
    ) {
        let retry_count = operation.retry_count + 1;
        let status = if retry_count >= config.max_retries {
            OperationStatus::Failed
        } else {
            OperationStatus::Queued
        };

        if status == OperationStatus::Failed {
            tracing::error!(
                operation_id = %operation.id,
                retry_count,
                error = %error,
                "Operation failed permanently"
            );
        } else {
            tracing::warn!(
                operation_id = %operation.id,
                retry_count,
                error = %error,
                "Operation failed, requeued for retry"
            );
        }

        let metadata = StatusMetadata::retry(retry_count, error.to_string());
        if let Err(e) = self
            .operations
            .update_status(&operation.id, status, Some(&metadata))
            .await
        {
            tracing::error!(
                operation_id = %operation.id,
                error = %e,
                "Failed to record operation failure"
            );
        }
    }
}
