use relay_core::operation::{OperationStatus, QueuedOperation, StatusMetadata};

use crate::error::StoreError;

/// Durable queue of transaction requests.
///
/// `update_status` carries no cross-worker lock. Two workers whose batches
/// overlap can both pick the same operation; backends that need true
/// multi-worker safety must make `get_queued_operations` a fetch-and-lock.
pub trait OperationStore: Send + Sync {
    /// Rejects ids that already exist.
    fn store_operation(
        &self,
        operation: &QueuedOperation,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_operation(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<QueuedOperation>, StoreError>> + Send;

    /// Oldest first, at most `limit` entries, all with status `queued`.
    fn get_queued_operations(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueuedOperation>, StoreError>> + Send;

    fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        metadata: Option<&StatusMetadata>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
