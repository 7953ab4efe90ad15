//! Single-process backends. Locks and counters here only exclude tasks that
//! share the same instance; use the Redis backends across processes.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use nanoid::nanoid;
use relay_core::operation::{OperationStatus, QueuedOperation, StatusMetadata};

use crate::{
    coordination::{AtomicNonceAssign, CoordinationStore},
    error::StoreError,
    operations::OperationStore,
};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct CoordinationState {
    values: HashMap<String, Entry>,
    locks: HashMap<String, Entry>,
}

#[derive(Default)]
pub struct MemoryCoordinationStore {
    state: Mutex<CoordinationState>,
    atomic: bool,
    lock_attempts: AtomicU32,
    writes: AtomicU32,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also advertises the atomic assign-if-greater capability.
    pub fn with_atomic_assign() -> Self {
        Self {
            atomic: true,
            ..Self::default()
        }
    }

    /// Number of `acquire_lock` calls served so far.
    pub fn lock_attempts(&self) -> u32 {
        self.lock_attempts.load(Ordering::SeqCst)
    }

    /// Number of value mutations (`set`, `incr`, `set_with_ttl`, atomic assign).
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, CoordinationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_int(values: &HashMap<String, Entry>, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        match values.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => entry
                .value
                .parse()
                .map(Some)
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value: entry.value.clone(),
                }),
            None => Ok(None),
        }
    }

    fn put(&self, state: &mut CoordinationState, key: &str, value: String, ttl: Option<Duration>) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        state.values.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }
}

impl CoordinationStore for MemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .state()
            .values
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        self.put(&mut state, key, value.to_string(), None);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut state = self.state();
        let next = Self::read_int(&state.values, key)?.unwrap_or(0) + 1;
        self.put(&mut state, key, next.to_string(), None);
        Ok(next)
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Option<String>, StoreError> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut state = self.state();

        if state.locks.get(key).is_some_and(|held| held.is_live(now)) {
            return Ok(None);
        }

        let token = nanoid!();
        state.locks.insert(
            key.to_string(),
            Entry {
                value: token.clone(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(Some(token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut state = self.state();
        let owned = state
            .locks
            .get(key)
            .is_some_and(|held| held.value == token && held.is_live(Instant::now()));
        if owned {
            state.locks.remove(key);
        }
        Ok(owned)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut state = self.state();
        self.put(&mut state, key, value.to_string(), Some(ttl));
        Ok(true)
    }

    fn atomic_assign(&self) -> Option<&dyn AtomicNonceAssign> {
        if self.atomic { Some(self) } else { None }
    }
}

impl AtomicNonceAssign for MemoryCoordinationStore {
    fn atomic_assign_nonce<'a>(
        &'a self,
        key: &'a str,
        pending_count: u64,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut state = self.state();
            let last_used = Self::read_int(&state.values, key)?.unwrap_or(-1);
            let next = (last_used + 1).max(pending_count as i64);
            self.put(&mut state, key, next.to_string(), None);
            Ok(next as u64)
        })
    }
}

#[derive(Default)]
struct OperationState {
    operations: HashMap<String, QueuedOperation>,
    order: Vec<String>,
}

#[derive(Default)]
pub struct MemoryOperationStore {
    state: Mutex<OperationState>,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OperationStore for MemoryOperationStore {
    async fn store_operation(&self, operation: &QueuedOperation) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.operations.contains_key(&operation.id) {
            return Err(StoreError::DuplicateOperation {
                id: operation.id.clone(),
            });
        }
        state.order.push(operation.id.clone());
        state
            .operations
            .insert(operation.id.clone(), operation.clone());
        Ok(())
    }

    async fn get_operation(&self, id: &str) -> Result<Option<QueuedOperation>, StoreError> {
        Ok(self.state().operations.get(id).cloned())
    }

    async fn get_queued_operations(&self, limit: usize) -> Result<Vec<QueuedOperation>, StoreError> {
        let state = self.state();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.operations.get(id))
            .filter(|op| op.status == OperationStatus::Queued)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        metadata: Option<&StatusMetadata>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let operation = state
            .operations
            .get_mut(id)
            .ok_or_else(|| StoreError::OperationNotFound { id: id.to_string() })?;
        operation.apply(status, metadata);
        Ok(())
    }
}
