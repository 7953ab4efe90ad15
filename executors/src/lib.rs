pub mod error_classifier;
pub mod fees;
pub mod nonce_manager;
pub mod polling;
pub mod queue_processor;

pub use nonce_manager::{BurnOutcome, NonceError, NonceManager, NonceManagerOptions, NonceRecord};
pub use polling::{PollingError, PollingManager, PollingOptions, PollingOutcome};
pub use queue_processor::{ProcessHooks, ProcessQueueSummary, QueueProcessor, QueueProcessorConfig};
