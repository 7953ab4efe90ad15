pub mod coordination;
pub mod error;
pub mod memory;
pub mod operations;
pub mod redis_store;

pub use coordination::{AtomicNonceAssign, CoordinationStore};
pub use error::StoreError;
pub use memory::{MemoryCoordinationStore, MemoryOperationStore};
pub use operations::OperationStore;
pub use redis;
pub use redis_store::{RedisCoordinationStore, RedisOperationStore};
