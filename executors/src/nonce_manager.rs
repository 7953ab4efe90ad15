use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, B256, Bytes, U256};
use chrono::Utc;
use relay_core::{
    error::RelayError,
    ledger::{BlockTag, LedgerReader, LedgerWriter, SendTransactionParams},
};
use relay_store::{CoordinationStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{error_classifier::SendErrorClassifier, fees::scale_fee};

pub const DEFAULT_BURN_GAS_MULTIPLIER: f64 = 1.5;

const MAX_LOCK_RETRY_DELAY: Duration = Duration::from_secs(5);
const LOCK_RETRY_BACKOFF: f64 = 1.5;
const BURN_GAS_LIMIT: u64 = 21_000;

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] RelayError),

    #[error("Nonce assignment failed: {reason}")]
    NonceAssignmentFailed { reason: String },
}

impl From<NonceError> for RelayError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Ledger(inner) => inner,
            other => RelayError::Nonce {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct NonceManagerOptions {
    /// Prefix for every key, `None` keeps the bare `nonce:...` layout
    pub namespace: Option<String>,
    pub lock_ttl: Duration,
    pub lock_retry_base: Duration,
    pub max_lock_retries: u32,
    pub assignment_ttl: Duration,
}

impl Default for NonceManagerOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            lock_ttl: Duration::from_secs(30),
            lock_retry_base: Duration::from_millis(100),
            max_lock_retries: 10,
            assignment_ttl: Duration::from_secs(3600),
        }
    }
}

/// Diagnostic record written for every assigned nonce
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NonceAssignment {
    pub nonce: u64,
    pub address: Address,
    pub chain_id: u64,
    pub pending_count: u64,
    pub assigned_at: i64,
}

/// Live view of an account's nonce state
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NonceRecord {
    pub chain_id: u64,
    pub address: Address,
    /// `None` until the first assignment
    pub last_used: Option<i64>,
    /// Highest nonce the ledger knows about including the mempool, `-1` if none
    pub blockchain_pending: i64,
    /// Highest mined nonce, `-1` if none
    pub blockchain_confirmed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurnOutcome {
    /// The replacement self-transfer was accepted
    Submitted(B256),
    /// Something already occupies the nonce, so it is no longer stuck
    AlreadyConsumed,
}

/// Hands out collision-free nonces per (chain, address) across processes.
///
/// Every process sharing an account must use the same assignment path: either
/// all of them run against a store that advertises the atomic capability, or
/// none do.
pub struct NonceManager<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    options: NonceManagerOptions,
}

impl<S, L> NonceManager<S, L>
where
    S: CoordinationStore,
    L: LedgerReader,
{
    pub fn new(store: Arc<S>, ledger: Arc<L>, options: NonceManagerOptions) -> Self {
        Self {
            store,
            ledger,
            options,
        }
    }

    fn nonce_key(&self, chain_id: u64, address: Address, suffix: &str) -> String {
        match &self.options.namespace {
            Some(ns) => format!("{}:nonce:{}:{}:{}", ns, chain_id, address, suffix),
            None => format!("nonce:{}:{}:{}", chain_id, address, suffix),
        }
    }

    pub fn last_used_key(&self, chain_id: u64, address: Address) -> String {
        self.nonce_key(chain_id, address, "lastUsed")
    }

    pub fn lock_key(&self, chain_id: u64, address: Address) -> String {
        self.nonce_key(chain_id, address, "lock")
    }

    pub fn assignment_key(&self, chain_id: u64, address: Address, nonce: u64) -> String {
        self.nonce_key(chain_id, address, &format!("assignment:{}", nonce))
    }

    /// Returns the next nonce for `address` on `chain_id`, or `None` when the
    /// coordination lock stayed busy for every retry.
    #[tracing::instrument(skip_all, fields(address = ?address, chain_id = chain_id))]
    pub async fn assign_nonce(
        &self,
        address: Address,
        chain_id: u64,
    ) -> Result<Option<u64>, NonceError> {
        if let Some(atomic) = self.store.atomic_assign() {
            let pending = self
                .ledger
                .get_transaction_count(address, BlockTag::Pending)
                .await?;
            let key = self.last_used_key(chain_id, address);
            let nonce = atomic.atomic_assign_nonce(&key, pending).await?;

            tracing::debug!(nonce, pending, "Assigned nonce via atomic store primitive");
            self.record_assignment(address, chain_id, nonce, pending).await;
            return Ok(Some(nonce));
        }

        self.with_lock(address, chain_id, || self.assign_locked(address, chain_id))
            .await
    }

    async fn assign_locked(&self, address: Address, chain_id: u64) -> Result<u64, NonceError> {
        let pending = self
            .ledger
            .get_transaction_count(address, BlockTag::Pending)
            .await?;
        let blockchain_pending = pending as i64 - 1;

        let key = self.last_used_key(chain_id, address);
        let stored = self.read_counter(&key).await?;
        let last_used = stored.unwrap_or(-1);

        // Only ever move up: going back would forget nonces already handed out
        if stored.is_none() || blockchain_pending > last_used {
            if blockchain_pending > last_used {
                tracing::info!(
                    last_used,
                    blockchain_pending,
                    "Ledger is ahead of stored nonce, syncing up"
                );
            }
            self.store
                .set(&key, &blockchain_pending.max(last_used).to_string())
                .await?;
        }

        let next = self.store.incr(&key).await?;
        let nonce = u64::try_from(next).map_err(|_| NonceError::NonceAssignmentFailed {
            reason: format!("counter at {} produced negative nonce {}", key, next),
        })?;

        tracing::debug!(nonce, pending, "Assigned nonce under lock");
        self.record_assignment(address, chain_id, nonce, pending).await;
        Ok(nonce)
    }

    /// Operator recovery: rewinds `lastUsed` to the highest mined nonce,
    /// discarding everything still in the mempool. Returns the new value, or
    /// `None` if the lock could not be taken.
    #[tracing::instrument(skip_all, fields(address = ?address, chain_id = chain_id))]
    pub async fn reset_nonce(
        &self,
        address: Address,
        chain_id: u64,
    ) -> Result<Option<i64>, NonceError> {
        self.with_lock(address, chain_id, || async move {
            let confirmed = self
                .ledger
                .get_transaction_count(address, BlockTag::Latest)
                .await?;
            let last_used = confirmed as i64 - 1;

            let key = self.last_used_key(chain_id, address);
            let previous = self.read_counter(&key).await?;
            self.store.set(&key, &last_used.to_string()).await?;

            tracing::warn!(?previous, last_used, "Nonce reset to confirmed ledger state");
            Ok(last_used)
        })
        .await
    }

    /// Unblocks a stuck nonce with a zero-value self transfer, priced at the
    /// current estimate scaled by `gas_multiplier`.
    #[tracing::instrument(skip_all, fields(address = ?address, chain_id = chain_id, nonce = nonce_to_burn))]
    pub async fn burn_nonce<W: LedgerWriter>(
        &self,
        writer: &W,
        nonce_to_burn: u64,
        address: Address,
        chain_id: u64,
        gas_multiplier: f64,
    ) -> Result<BurnOutcome, NonceError> {
        let fees = self.ledger.estimate_fees_per_gas().await?;

        let params = SendTransactionParams {
            from: address,
            to: address,
            chain_id,
            nonce: nonce_to_burn,
            value: U256::ZERO,
            data: Bytes::new(),
            gas_limit: Some(BURN_GAS_LIMIT),
            max_fee_per_gas: Some(scale_fee(fees.max_fee_per_gas, gas_multiplier)),
            max_priority_fee_per_gas: Some(scale_fee(fees.max_priority_fee_per_gas, gas_multiplier)),
            gas_price: None,
        };

        match writer.send_transaction(params).await {
            Ok(hash) => {
                tracing::info!(%hash, "Submitted nonce burn transaction");
                Ok(BurnOutcome::Submitted(hash))
            }
            Err(e) if SendErrorClassifier::classify(&e).nonce_consumed() => {
                tracing::info!(error = %e, "Nonce already consumed, nothing to burn");
                Ok(BurnOutcome::AlreadyConsumed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read-only snapshot of stored and ledger nonce state
    pub async fn get_nonce_record(
        &self,
        address: Address,
        chain_id: u64,
    ) -> Result<NonceRecord, NonceError> {
        let last_used = self
            .read_counter(&self.last_used_key(chain_id, address))
            .await?;
        let pending = self
            .ledger
            .get_transaction_count(address, BlockTag::Pending)
            .await?;
        let confirmed = self
            .ledger
            .get_transaction_count(address, BlockTag::Latest)
            .await?;

        Ok(NonceRecord {
            chain_id,
            address,
            last_used,
            blockchain_pending: pending as i64 - 1,
            blockchain_confirmed: confirmed as i64 - 1,
        })
    }

    /// Runs `critical` while holding the account's coordination lock. The lock
    /// is released whether or not `critical` succeeds; a release failure is
    /// only logged since the lock expires on its own.
    async fn with_lock<T, F, Fut>(
        &self,
        address: Address,
        chain_id: u64,
        critical: F,
    ) -> Result<Option<T>, NonceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, NonceError>>,
    {
        let lock_key = self.lock_key(chain_id, address);
        let Some(token) = self.acquire_lock(&lock_key).await? else {
            tracing::warn!(
                attempts = self.options.max_lock_retries,
                "Could not acquire nonce lock"
            );
            return Ok(None);
        };

        let result = critical().await;

        match self.store.release_lock(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                lock_key = %lock_key,
                "Nonce lock expired before release, consider raising the lock ttl"
            ),
            Err(e) => tracing::warn!(lock_key = %lock_key, error = %e, "Failed to release nonce lock"),
        }

        result.map(Some)
    }

    async fn acquire_lock(&self, lock_key: &str) -> Result<Option<String>, NonceError> {
        let attempts = self.options.max_lock_retries;
        for attempt in 0..attempts {
            if let Some(token) = self
                .store
                .acquire_lock(lock_key, self.options.lock_ttl)
                .await?
            {
                return Ok(Some(token));
            }

            if attempt + 1 < attempts {
                let delay = self.lock_retry_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Nonce lock busy, retrying");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }

    /// `base × 1.5^attempt`, capped at five seconds
    pub fn lock_retry_delay(&self, attempt: u32) -> Duration {
        let factor = LOCK_RETRY_BACKOFF.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let nanos = self.options.lock_retry_base.as_nanos() as f64 * factor;
        Duration::from_nanos(nanos.min(MAX_LOCK_RETRY_DELAY.as_nanos() as f64) as u64)
    }

    async fn read_counter(&self, key: &str) -> Result<Option<i64>, NonceError> {
        match self.store.get(key).await? {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| NonceError::NonceAssignmentFailed {
                    reason: format!("stored value at {} is not an integer: {}", key, value),
                }),
            None => Ok(None),
        }
    }

    async fn record_assignment(&self, address: Address, chain_id: u64, nonce: u64, pending: u64) {
        let assignment = NonceAssignment {
            nonce,
            address,
            chain_id,
            pending_count: pending,
            assigned_at: Utc::now().timestamp_millis(),
        };
        let json = match serde_json::to_string(&assignment) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize nonce assignment");
                return;
            }
        };

        let key = self.assignment_key(chain_id, address, nonce);
        if let Err(e) = self
            .store
            .set_with_ttl(&key, &json, self.options.assignment_ttl)
            .await
        {
            tracing::warn!(key = %key, error = %e, "Failed to record nonce assignment");
        }
    }
}
