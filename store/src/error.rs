use relay_core::error::RelayError;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("JSON Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Operation {id} not found")]
    OperationNotFound { id: String },

    #[error("Operation {id} already exists")]
    DuplicateOperation { id: String },

    #[error("Value at {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::Store {
            message: err.to_string(),
        }
    }
}
