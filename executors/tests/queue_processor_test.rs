
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::U256;
use fixtures::*;
use relay_core::error::RelayError;
use relay_core::operation::{OperationStatus, QueuedOperation, TransactionRequest};
use relay_executors::nonce_manager::{NonceManager, NonceManagerOptions};
use relay_executors::queue_processor::{ProcessHooks, QueueProcessor, QueueProcessorConfig};
use relay_store::{CoordinationStore, MemoryCoordinationStore, MemoryOperationStore, OperationStore};

type TestProcessor =
    QueueProcessor<MemoryOperationStore, MemoryCoordinationStore, MockLedger, MockLedger>;

struct Harness {
    operations: Arc<MemoryOperationStore>,
    coordination: Arc<MemoryCoordinationStore>,
    ledger: Arc<MockLedger>,
    processor: TestProcessor,
}

fn harness_with(options: NonceManagerOptions) -> Harness {
    let operations = Arc::new(MemoryOperationStore::new());
    let coordination = Arc::new(MemoryCoordinationStore::new());
    let ledger = Arc::new(MockLedger::new());
    let nonce_manager = Arc::new(NonceManager::new(
        coordination.clone(),
        ledger.clone(),
        options,
    ));
    let processor = QueueProcessor::new(operations.clone(), nonce_manager, ledger.clone());

    Harness {
        operations,
        coordination,
        ledger,
        processor,
    }
}

fn harness() -> Harness {
    harness_with(NonceManagerOptions {
        lock_retry_base: Duration::from_millis(1),
        ..Default::default()
    })
}

fn transfer() -> TransactionRequest {
    TransactionRequest::new(recipient(), U256::from(1_000u64))
        .with_gas_limit(21_000)
        .with_max_fee_per_gas(20_000_000_000)
        .with_max_priority_fee_per_gas(1_000_000_000)
}

async fn store_with_retries(harness: &Harness, id: &str, request: &TransactionRequest, retries: u32) {
    let mut operation = QueuedOperation::from_request(id, request).unwrap();
    operation.retry_count = retries;
    harness.operations.store_operation(&operation).await.unwrap();
}

async fn operation(harness: &Harness, id: &str) -> QueuedOperation {
    harness
        .operations
        .get_operation(id)
        .await
        .unwrap()
        .expect("operation exists")
}

#[tokio::test]
async fn completes_queued_operation() {
    setup_tracing();
    let harness = harness();
    harness.processor.enqueue("op-1", &transfer()).await.unwrap();

    let summary = harness
        .processor
        .process_queue(&QueueProcessorConfig::default())
        .await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.errors.is_empty());

    let op = operation(&harness, "op-1").await;
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.nonce, Some(0));
    assert!(op.transaction_hash.is_some());
    assert!(op.completed_at.is_some());
    assert!(op.receipt.is_some_and(|r| r.status));

    let sent = harness.ledger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, sender());
    assert_eq!(sent[0].to, recipient());
    assert_eq!(sent[0].chain_id, CHAIN_ID);
    assert_eq!(sent[0].value, U256::from(1_000u64));
    assert_eq!(sent[0].max_fee_per_gas, Some(20_000_000_000));
}

#[tokio::test]
async fn empty_queue_yields_zero_summary() {
    let harness = harness();
    let summary = harness
        .processor
        .process_queue(&QueueProcessorConfig::default())
        .await;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 0);
    assert!(harness.ledger.sent().is_empty());
}

#[tokio::test]
async fn respects_batch_size_and_fetch_order() {
    let harness = harness();
    for id in ["a", "b", "c"] {
        harness.processor.enqueue(id, &transfer()).await.unwrap();
    }

    let config = QueueProcessorConfig {
        max_operations: 2,
        ..Default::default()
    };
    let summary = harness.processor.process_queue(&config).await;
    assert_eq!(summary.processed, 2);

    assert_eq!(operation(&harness, "a").await.nonce, Some(0));
    assert_eq!(operation(&harness, "b").await.nonce, Some(1));
    assert_eq!(operation(&harness, "c").await.status, OperationStatus::Queued);
}

#[tokio::test]
async fn escalates_fees_by_retry_count() {
    let harness = harness();
    store_with_retries(&harness, "retried", &transfer(), 2).await;

    let config = QueueProcessorConfig {
        max_retries: 5,
        ..Default::default()
    };
    let summary = harness.processor.process_queue(&config).await;
    assert_eq!(summary.succeeded, 1);

    // 20 gwei × 1.2²
    let sent = harness.ledger.sent();
    assert_eq!(sent[0].max_fee_per_gas, Some(28_800_000_000));
}

#[tokio::test]
async fn escalation_is_capped() {
    let harness = harness();
    store_with_retries(&harness, "retried", &transfer(), 3).await;

    let config = QueueProcessorConfig {
        max_retries: 10,
        gas_escalation_factor: 2.0,
        max_gas_multiplier: 2.0,
        ..Default::default()
    };
    harness.processor.process_queue(&config).await;

    let sent = harness.ledger.sent();
    assert_eq!(sent[0].max_fee_per_gas, Some(40_000_000_000));
    assert_eq!(sent[0].max_priority_fee_per_gas, Some(2_000_000_000));
}

#[tokio::test]
async fn legacy_gas_price_is_escalated_too() {
    let harness = harness();
    let request = TransactionRequest::new(recipient(), U256::ZERO).with_gas_price(10_000_000_000);
    store_with_retries(&harness, "legacy", &request, 1).await;

    let config = QueueProcessorConfig {
        max_retries: 5,
        gas_escalation_factor: 1.5,
        ..Default::default()
    };
    harness.processor.process_queue(&config).await;

    let sent = harness.ledger.sent();
    assert_eq!(sent[0].gas_price, Some(15_000_000_000));
    assert_eq!(sent[0].max_fee_per_gas, None);
}

#[tokio::test]
async fn reverted_receipt_requeues_with_error() {
    let harness = harness();
    harness.processor.enqueue("reverts", &transfer()).await.unwrap();
    harness.ledger.push_receipt_status(false);

    let summary = harness
        .processor
        .process_queue(&QueueProcessorConfig::default())
        .await;

    assert_eq!(summary.failed, 1);
    assert!(summary.errors[0].error.contains("Transaction reverted"));

    let op = operation(&harness, "reverts").await;
    assert_eq!(op.status, OperationStatus::Queued);
    assert_eq!(op.retry_count, 1);
    assert!(op.last_error.unwrap().contains("Transaction reverted"));
    // Submission metadata survives the failure
    assert!(op.transaction_hash.is_some());
}

#[tokio::test]
async fn fails_permanently_after_max_retries() {
    let harness = harness();
    harness.processor.enqueue("doomed", &transfer()).await.unwrap();

    let config = QueueProcessorConfig {
        max_retries: 3,
        ..Default::default()
    };

    for expected_retries in 1..=3 {
        harness.ledger.push_send_result(Err(RelayError::blockchain("execution reverted")));
        let summary = harness.processor.process_queue(&config).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(operation(&harness, "doomed").await.retry_count, expected_retries);
    }

    let op = operation(&harness, "doomed").await;
    assert_eq!(op.status, OperationStatus::Failed);

    // Terminal operations are no longer picked up
    let summary = harness.processor.process_queue(&config).await;
    assert_eq!(summary.processed, 0);
    assert_eq!(operation(&harness, "doomed").await.retry_count, 3);
}

#[tokio::test]
async fn malformed_payload_consumes_a_retry() {
    let harness = harness();
    harness
        .operations
        .store_operation(&QueuedOperation::new("garbage", "{not json"))
        .await
        .unwrap();

    let summary = harness
        .processor
        .process_queue(&QueueProcessorConfig::default())
        .await;

    assert_eq!(summary.failed, 1);
    assert!(summary.errors[0].error.contains("invalid payload"));
    assert!(harness.ledger.sent().is_empty());

    let op = operation(&harness, "garbage").await;
    assert_eq!(op.status, OperationStatus::Queued);
    assert_eq!(op.retry_count, 1);
}

#[tokio::test]
async fn busy_nonce_lock_fails_the_operation() {
    let harness = harness_with(NonceManagerOptions {
        lock_retry_base: Duration::from_millis(1),
        max_lock_retries: 2,
        ..Default::default()
    });
    harness.processor.enqueue("blocked", &transfer()).await.unwrap();

    let lock_key = harness.processor.nonce_manager().lock_key(CHAIN_ID, sender());
    harness
        .coordination
        .acquire_lock(&lock_key, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let summary = harness
        .processor
        .process_queue(&QueueProcessorConfig::default())
        .await;

    assert_eq!(summary.failed, 1);
    assert!(summary.errors[0].error.contains("Failed to acquire nonce"));
    assert!(harness.ledger.sent().is_empty());
    assert_eq!(operation(&harness, "blocked").await.retry_count, 1);
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let harness = harness();
    harness.processor.enqueue("first", &transfer()).await.unwrap();
    harness
        .operations
        .store_operation(&QueuedOperation::new("broken", "42"))
        .await
        .unwrap();
    harness.processor.enqueue("last", &transfer()).await.unwrap();

    let summary = harness
        .processor
        .process_queue(&QueueProcessorConfig::default())
        .await;

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].id, "broken");

    assert_eq!(operation(&harness, "first").await.status, OperationStatus::Completed);
    assert_eq!(operation(&harness, "last").await.status, OperationStatus::Completed);
}

#[tokio::test]
async fn hooks_fire_per_operation() {
    let harness = harness();
    harness.processor.enqueue("good", &transfer()).await.unwrap();
    harness.processor.enqueue("bad", &transfer()).await.unwrap();
    // First send succeeds via the default path, second is rejected
    harness.ledger.push_send_result(Ok(alloy::primitives::B256::repeat_byte(1)));
    harness
        .ledger
        .push_send_result(Err(RelayError::blockchain("insufficient funds")));

    let completions = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let hooks = {
        let completions = completions.clone();
        let errors = errors.clone();
        ProcessHooks::default()
            .with_on_complete(move |id, success| {
                completions.lock().unwrap().push((id.to_string(), success))
            })
            .with_on_error(move |id, err| {
                errors.lock().unwrap().push((id.to_string(), err.to_string()))
            })
    };

    let config = QueueProcessorConfig::default().with_hooks(hooks);
    harness.processor.process_queue(&config).await;

    assert_eq!(
        *completions.lock().unwrap(),
        vec![("good".to_string(), true), ("bad".to_string(), false)]
    );
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "bad");
    assert!(errors[0].1.contains("insufficient funds"));
}

#[tokio::test]
async fn atomic_store_drains_without_locking() {
    let operations = Arc::new(MemoryOperationStore::new());
    let coordination = Arc::new(MemoryCoordinationStore::with_atomic_assign());
    let ledger = Arc::new(MockLedger::new());
    ledger.set_pending_count(9);
    let nonce_manager = Arc::new(NonceManager::new(
        coordination.clone(),
        ledger.clone(),
        NonceManagerOptions::default(),
    ));
    let processor = QueueProcessor::new(operations.clone(), nonce_manager, ledger.clone());

    processor.enqueue("x", &transfer()).await.unwrap();
    processor.enqueue("y", &transfer()).await.unwrap();
    let summary = processor.process_queue(&QueueProcessorConfig::default()).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(coordination.lock_attempts(), 0);
    let nonces: Vec<_> = ledger.sent().iter().map(|tx| tx.nonce).collect();
    assert_eq!(nonces, vec![9, 10]);
}
