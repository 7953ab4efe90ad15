use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::StoreError;

/// Narrow key/value + lock interface the nonce manager coordinates through.
///
/// Any backend that can offer these primitives with cross-process semantics
/// (a Redis instance, a SQL row locked with `SELECT ... FOR UPDATE`, a
/// dedicated counter service) can stand in without touching the manager.
pub trait CoordinationStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Increments the integer at `key` by one and returns the new value.
    /// A missing key counts as zero.
    fn incr(&self, key: &str) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Returns an opaque holder token, or `None` if someone else holds the lock.
    fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Releases the lock only if `token` still owns it. Returns whether a lock
    /// was actually released.
    fn release_lock(
        &self,
        key: &str,
        token: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Writes a value that expires after `ttl`. Returns `false` when the
    /// backend has no expiry support and nothing was written.
    fn set_with_ttl(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        std::future::ready(Ok(false))
    }

    /// Capability check for a native assign-if-greater primitive.
    fn atomic_assign(&self) -> Option<&dyn AtomicNonceAssign> {
        None
    }
}

/// Optional extension for stores that can assign a nonce atomically.
///
/// Implementations must, in one indivisible step, compute
/// `next = max(last_used + 1, pending_count)` (treating a missing `last_used`
/// as `-1`), persist `next` at `key`, and return it.
pub trait AtomicNonceAssign: Send + Sync {
    fn atomic_assign_nonce<'a>(
        &'a self,
        key: &'a str,
        pending_count: u64,
    ) -> BoxFuture<'a, Result<u64, StoreError>>;
}
