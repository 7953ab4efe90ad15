use std::{env, time::Duration};

use config::{Config, ConfigError, File};
use relay_executors::{NonceManagerOptions, QueueProcessorConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub private_key: String,
}

impl std::fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NonceStrategy {
    /// Scripted assign-if-greater, no lock round trips
    Atomic,
    Lock,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    pub strategy: NonceStrategy,
    /// Key prefix for nonce state. Every worker signing with the same key
    /// must share it, so it is not derived from the queue namespace.
    pub namespace: Option<String>,
    pub lock_ttl_ms: u64,
    pub lock_retry_base_ms: u64,
    pub max_lock_retries: u32,
    pub assignment_ttl_secs: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            strategy: NonceStrategy::Lock,
            namespace: None,
            lock_ttl_ms: 30_000,
            lock_retry_base_ms: 100,
            max_lock_retries: 10,
            assignment_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub namespace: String,
    pub poll_interval_ms: u64,
    pub max_operations: usize,
    pub max_retries: u32,
    pub gas_escalation_factor: f64,
    pub max_gas_multiplier: f64,
    pub receipt_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let processor = QueueProcessorConfig::default();
        Self {
            namespace: "default".into(),
            poll_interval_ms: 1000,
            max_operations: processor.max_operations,
            max_retries: processor.max_retries,
            gas_escalation_factor: processor.gas_escalation_factor,
            max_gas_multiplier: processor.max_gas_multiplier,
            receipt_timeout_ms: processor.receipt_timeout_ms,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn processor_config(&self) -> QueueProcessorConfig {
        QueueProcessorConfig {
            max_operations: self.max_operations,
            max_retries: self.max_retries,
            gas_escalation_factor: self.gas_escalation_factor,
            max_gas_multiplier: self.max_gas_multiplier,
            receipt_timeout_ms: self.receipt_timeout_ms,
            ..Default::default()
        }
    }
}

impl WorkerConfig {
    pub fn nonce_options(&self) -> NonceManagerOptions {
        NonceManagerOptions {
            namespace: self.nonce.namespace.clone(),
            lock_ttl: Duration::from_millis(self.nonce.lock_ttl_ms),
            lock_retry_base: Duration::from_millis(self.nonce.lock_retry_base_ms),
            max_lock_retries: self.nonce.max_lock_retries,
            assignment_ttl: Duration::from_secs(self.nonce.assignment_ttl_secs),
        }
    }
}

pub fn get_config() -> Result<WorkerConfig, ConfigError> {
    let base_path = env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let environment_filename = format!("worker_{}.yaml", environment.as_str());

    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("worker_base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)).required(false))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?;

    config.try_deserialize::<WorkerConfig>()
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local`, `development`, or `production`.",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::{
        alloy::primitives::Address,
        error::RelayError,
        ledger::{BlockTag, FeeEstimate, LedgerReader},
    };
    use relay_executors::NonceManager;
    use relay_store::MemoryCoordinationStore;

    use super::*;

    struct EmptyLedger;

    impl LedgerReader for EmptyLedger {
        async fn get_transaction_count(&self, _: Address, _: BlockTag) -> Result<u64, RelayError> {
            Ok(0)
        }

        async fn estimate_fees_per_gas(&self) -> Result<FeeEstimate, RelayError> {
            Ok(FeeEstimate {
                max_fee_per_gas: 1,
                max_priority_fee_per_gas: 1,
            })
        }
    }

    fn worker_config(yaml: &str) -> WorkerConfig {
        Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const BASE: &str = r#"
redis:
  url: redis://127.0.0.1:6379
chain:
  rpc_url: http://127.0.0.1:8545
  private_key: "0x01"
"#;

    #[test]
    fn parses_environment_case_insensitively() {
        let env: Environment = "Production".to_string().try_into().unwrap();
        assert_eq!(env.as_str(), "production");
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn layered_sections_fill_defaults() {
        let config = Config::builder()
            .add_source(config::File::from_str(
                r#"
redis:
  url: redis://127.0.0.1:6379
chain:
  rpc_url: http://127.0.0.1:8545
  private_key: "0x01"
nonce:
  strategy: atomic
queue:
  namespace: test
  max_retries: 5
"#,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let config: WorkerConfig = config.try_deserialize().unwrap();

        assert_eq!(config.server.log_format, LogFormat::Pretty);
        assert_eq!(config.nonce.strategy, NonceStrategy::Atomic);
        assert_eq!(config.nonce.max_lock_retries, 10);
        assert_eq!(config.queue.processor_config().max_retries, 5);
        assert_eq!(config.queue.processor_config().max_operations, 10);
        assert_eq!(config.queue.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.nonce_options().namespace, None);
        assert!(!format!("{:?}", config.chain).contains("0x01"));
    }

    #[tokio::test]
    async fn queue_namespaces_share_one_nonce_counter() {
        let payments = worker_config(&format!("{BASE}queue:\n  namespace: payments\n"));
        let grants = worker_config(&format!("{BASE}queue:\n  namespace: grants\n"));

        let store = Arc::new(MemoryCoordinationStore::new());
        let ledger = Arc::new(EmptyLedger);
        let a = NonceManager::new(store.clone(), ledger.clone(), payments.nonce_options());
        let b = NonceManager::new(store, ledger, grants.nonce_options());

        let sender = Address::repeat_byte(0x5e);
        assert_eq!(a.last_used_key(1, sender), b.last_used_key(1, sender));
        assert_eq!(a.lock_key(1, sender), b.lock_key(1, sender));

        let first = a.assign_nonce(sender, 1).await.unwrap();
        let second = b.assign_nonce(sender, 1).await.unwrap();
        assert_eq!(first, Some(0));
        assert_eq!(second, Some(1));
    }

    #[test]
    fn explicit_nonce_namespace_prefixes_keys() {
        let config = worker_config(&format!("{BASE}nonce:\n  namespace: shared\n"));
        assert_eq!(config.nonce_options().namespace.as_deref(), Some("shared"));
    }
}
