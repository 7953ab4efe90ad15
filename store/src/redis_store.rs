use std::time::Duration;

use futures::future::BoxFuture;
use nanoid::nanoid;
use redis::{AsyncCommands, aio::ConnectionManager};
use relay_core::operation::{OperationStatus, QueuedOperation, StatusMetadata};

use crate::{
    coordination::{AtomicNonceAssign, CoordinationStore},
    error::StoreError,
    operations::OperationStore,
};

const RELEASE_LOCK_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

const ASSIGN_IF_GREATER_SCRIPT: &str = r#"
    local last_used_key = KEYS[1]
    local pending_count = tonumber(ARGV[1])

    local last_used = redis.call('GET', last_used_key)
    if last_used then
        last_used = tonumber(last_used)
    else
        last_used = -1
    end

    local next_nonce = last_used + 1
    if pending_count > next_nonce then
        next_nonce = pending_count
    end

    redis.call('SET', last_used_key, next_nonce)
    return next_nonce
"#;

const STORE_OPERATION_SCRIPT: &str = r#"
    local operation_key = KEYS[1]
    local sequence_key = KEYS[2]
    local order_key = KEYS[3]
    local queued_key = KEYS[4]

    local document = ARGV[1]
    local operation_id = ARGV[2]
    local is_queued = ARGV[3]

    if redis.call('SETNX', operation_key, document) == 0 then
        return -1
    end

    local sequence = redis.call('INCR', sequence_key)
    redis.call('HSET', order_key, operation_id, sequence)
    if is_queued == '1' then
        redis.call('ZADD', queued_key, sequence, operation_id)
    end
    return sequence
"#;

/// Redis-backed coordination store. Locks are `SET NX PX` keys holding a
/// random token; release is a compare-and-delete script.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    redis: ConnectionManager,
    atomic: bool,
}

impl RedisCoordinationStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = client.get_connection_manager().await?;
        Ok(Self::new(redis))
    }

    /// Lock-based assignment only.
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            atomic: false,
        }
    }

    /// Advertise the scripted assign-if-greater capability. Every process
    /// sharing an account must agree on this setting.
    pub fn with_atomic_assign(mut self, enabled: bool) -> Self {
        self.atomic = enabled;
        self
    }
}

impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let token = nanoid!();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let released: i32 = redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut self.redis.clone())
            .await?;
        Ok(released == 1)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(true)
    }

    fn atomic_assign(&self) -> Option<&dyn AtomicNonceAssign> {
        if self.atomic { Some(self) } else { None }
    }
}

impl AtomicNonceAssign for RedisCoordinationStore {
    fn atomic_assign_nonce<'a>(
        &'a self,
        key: &'a str,
        pending_count: u64,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let nonce: u64 = redis::Script::new(ASSIGN_IF_GREATER_SCRIPT)
                .key(key)
                .arg(pending_count)
                .invoke_async(&mut self.redis.clone())
                .await?;
            Ok(nonce)
        })
    }
}

/// Redis-backed operation store. Each operation is a JSON document; queued
/// ids live in a sorted set scored by an enqueue sequence so batches come out
/// in insertion order, and a retried operation keeps its place.
///
/// Documents in the queue that cannot be decoded are moved to a side hash
/// (`relay:{namespace}:corrupt`, id to raw text) instead of blocking the batch.
#[derive(Clone)]
pub struct RedisOperationStore {
    redis: ConnectionManager,
    namespace: String,
}

impl RedisOperationStore {
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = client.get_connection_manager().await?;
        Ok(Self::new(redis, namespace))
    }

    pub fn new(redis: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            redis,
            namespace: namespace.into(),
        }
    }

    pub fn operation_key_name(&self, id: &str) -> String {
        format!("relay:{}:operation:{}", self.namespace, id)
    }

    pub fn queued_zset_name(&self) -> String {
        format!("relay:{}:queued", self.namespace)
    }

    pub fn sequence_key_name(&self) -> String {
        format!("relay:{}:sequence", self.namespace)
    }

    /// operation id -> enqueue sequence, kept until the operation is terminal
    pub fn enqueue_order_hash_name(&self) -> String {
        format!("relay:{}:enqueue_order", self.namespace)
    }

    pub fn corrupt_hash_name(&self) -> String {
        format!("relay:{}:corrupt", self.namespace)
    }

    async fn quarantine(
        &self,
        conn: &mut ConnectionManager,
        id: &str,
        raw: &str,
    ) -> Result<(), StoreError> {
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline.hset(self.corrupt_hash_name(), id, raw);
        pipeline.zrem(self.queued_zset_name(), id);
        pipeline.hdel(self.enqueue_order_hash_name(), id);
        pipeline.del(self.operation_key_name(id));
        let _: () = pipeline.query_async(conn).await?;
        Ok(())
    }
}

impl OperationStore for RedisOperationStore {
    async fn store_operation(&self, operation: &QueuedOperation) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(operation)?;
        let is_queued = operation.status == OperationStatus::Queued;

        let sequence: i64 = redis::Script::new(STORE_OPERATION_SCRIPT)
            .key(self.operation_key_name(&operation.id))
            .key(self.sequence_key_name())
            .key(self.enqueue_order_hash_name())
            .key(self.queued_zset_name())
            .arg(json)
            .arg(&operation.id)
            .arg(if is_queued { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;

        if sequence < 0 {
            return Err(StoreError::DuplicateOperation {
                id: operation.id.clone(),
            });
        }

        tracing::debug!(operation_id = %operation.id, sequence, "Stored operation");
        Ok(())
    }

    async fn get_operation(&self, id: &str) -> Result<Option<QueuedOperation>, StoreError> {
        let mut conn = self.redis.clone();
        let json: Option<String> = conn.get(self.operation_key_name(id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_queued_operations(&self, limit: usize) -> Result<Vec<QueuedOperation>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrange(self.queued_zset_name(), 0, limit as isize - 1)
            .await?;
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let keys: Vec<String> = ids.iter().map(|id| self.operation_key_name(id)).collect();
        let documents: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut operations = Vec::with_capacity(ids.len());
        for (id, document) in ids.iter().zip(documents) {
            let Some(json) = document else {
                tracing::warn!(operation_id = %id, "Queued id has no operation document, dropping from queue");
                let _: () = conn.zrem(self.queued_zset_name(), id).await?;
                continue;
            };

            let operation: QueuedOperation = match serde_json::from_str(&json) {
                Ok(operation) => operation,
                Err(e) => {
                    tracing::error!(
                        operation_id = %id,
                        error = %e,
                        "Undecodable operation document, moving it out of the queue"
                    );
                    self.quarantine(&mut conn, id, &json).await?;
                    continue;
                }
            };

            if operation.status != OperationStatus::Queued {
                tracing::warn!(
                    operation_id = %id,
                    status = %operation.status,
                    "Stale queue entry for non-queued operation, dropping from queue"
                );
                let _: () = conn.zrem(self.queued_zset_name(), id).await?;
                continue;
            }
            operations.push(operation);
        }

        Ok(operations)
    }

    async fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        metadata: Option<&StatusMetadata>,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let key = self.operation_key_name(id);

        let json: Option<String> = conn.get(&key).await?;
        let mut operation: QueuedOperation = match json {
            Some(json) => serde_json::from_str(&json)?,
            None => return Err(StoreError::OperationNotFound { id: id.to_string() }),
        };
        operation.apply(status, metadata);

        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline.set(&key, serde_json::to_string(&operation)?);
        if status == OperationStatus::Queued {
            let sequence: Option<i64> = conn.hget(self.enqueue_order_hash_name(), id).await?;
            let sequence = match sequence {
                Some(sequence) => sequence,
                None => {
                    let sequence: i64 = conn.incr(self.sequence_key_name(), 1).await?;
                    pipeline.hset(self.enqueue_order_hash_name(), id, sequence);
                    sequence
                }
            };
            pipeline.zadd(self.queued_zset_name(), id, sequence);
        } else {
            pipeline.zrem(self.queued_zset_name(), id);
        }
        if status.is_terminal() {
            pipeline.hdel(self.enqueue_order_hash_name(), id);
        }
        let _: () = pipeline.query_async(&mut conn).await?;

        Ok(())
    }
}
