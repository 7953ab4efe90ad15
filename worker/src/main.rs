use std::sync::Arc;

use anyhow::{Context, bail};
use relay_core::{
    chain::{AlloyChain, AlloyChainConfig},
    ledger::LedgerWriter,
};
use relay_executors::{
    BurnOutcome, NonceManager, QueueProcessor, nonce_manager::DEFAULT_BURN_GAS_MULTIPLIER,
};
use relay_store::{RedisCoordinationStore, RedisOperationStore};
use relay_worker::config::{self, LogFormat, NonceStrategy, WorkerConfig};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type RelayNonceManager = NonceManager<RedisCoordinationStore, AlloyChain>;

enum Command {
    Drain,
    ResetNonce,
    BurnNonce { nonce: u64, multiplier: f64 },
}

impl Command {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        match args {
            [] => Ok(Command::Drain),
            [cmd] if cmd == "reset-nonce" => Ok(Command::ResetNonce),
            [cmd, nonce, rest @ ..] if cmd == "burn-nonce" && rest.len() <= 1 => {
                let nonce = nonce
                    .parse()
                    .with_context(|| format!("invalid nonce `{nonce}`"))?;
                let multiplier = match rest.first() {
                    Some(m) => m
                        .parse()
                        .with_context(|| format!("invalid gas multiplier `{m}`"))?,
                    None => DEFAULT_BURN_GAS_MULTIPLIER,
                };
                Ok(Command::BurnNonce { nonce, multiplier })
            }
            _ => bail!("usage: relay-worker [reset-nonce | burn-nonce <nonce> [multiplier]]"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    let config = config::get_config().context("Failed to load worker configuration")?;

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "relay_worker=debug,relay_executors=debug,relay_store=debug".into()),
    );

    match config.server.log_format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let chain = Arc::new(AlloyChain::new(AlloyChainConfig {
        rpc_url: &config.chain.rpc_url,
        private_key: &config.chain.private_key,
    })?);
    tracing::info!(address = %chain.signer_address(), rpc_url = %chain.rpc_url(), "Chain client initialized");

    let coordination = RedisCoordinationStore::connect(&config.redis.url)
        .await?
        .with_atomic_assign(config.nonce.strategy == NonceStrategy::Atomic);
    tracing::info!(strategy = ?config.nonce.strategy, "Coordination store connected");

    let nonce_manager = Arc::new(NonceManager::new(
        Arc::new(coordination),
        chain.clone(),
        config.nonce_options(),
    ));

    match command {
        Command::Drain => drain(&config, nonce_manager, chain).await,
        Command::ResetNonce => reset_nonce(&nonce_manager, &chain).await,
        Command::BurnNonce { nonce, multiplier } => {
            burn_nonce(&nonce_manager, &chain, nonce, multiplier).await
        }
    }
}

async fn drain(
    config: &WorkerConfig,
    nonce_manager: Arc<RelayNonceManager>,
    chain: Arc<AlloyChain>,
) -> anyhow::Result<()> {
    let operations =
        RedisOperationStore::connect(&config.redis.url, config.queue.namespace.clone()).await?;
    let processor = QueueProcessor::new(Arc::new(operations), nonce_manager, chain);
    let processor_config = config.queue.processor_config();

    let mut interval = tokio::time::interval(config.queue.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(namespace = %config.queue.namespace, "Queue worker started, waiting for shutdown signal");
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
            _ = interval.tick() => {
                let summary = processor.process_queue(&processor_config).await;
                for failure in &summary.errors {
                    tracing::warn!(operation_id = %failure.id, error = %failure.error, "Operation attempt failed");
                }
            }
        }
    }

    tracing::info!("Shutdown signal received, queue worker stopped");
    Ok(())
}

async fn reset_nonce(nonce_manager: &RelayNonceManager, chain: &AlloyChain) -> anyhow::Result<()> {
    let chain_id = chain.get_chain_id().await?;
    let address = chain.signer_address();

    match nonce_manager.reset_nonce(address, chain_id).await? {
        Some(last_used) => {
            tracing::info!(%address, chain_id, last_used, "Nonce reset");
            Ok(())
        }
        None => bail!("nonce lock for {address} on chain {chain_id} is busy, try again"),
    }
}

async fn burn_nonce(
    nonce_manager: &RelayNonceManager,
    chain: &AlloyChain,
    nonce: u64,
    multiplier: f64,
) -> anyhow::Result<()> {
    let chain_id = chain.get_chain_id().await?;
    let address = chain.signer_address();

    match nonce_manager
        .burn_nonce(chain, nonce, address, chain_id, multiplier)
        .await?
    {
        BurnOutcome::Submitted(hash) => {
            tracing::info!(%address, nonce, %hash, "Burn transaction submitted");
        }
        BurnOutcome::AlreadyConsumed => {
            tracing::info!(%address, nonce, "Nonce already consumed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_operator_commands() {
        assert!(matches!(Command::parse(&[]).unwrap(), Command::Drain));
        assert!(matches!(
            Command::parse(&args(&["reset-nonce"])).unwrap(),
            Command::ResetNonce
        ));

        match Command::parse(&args(&["burn-nonce", "17"])).unwrap() {
            Command::BurnNonce { nonce, multiplier } => {
                assert_eq!(nonce, 17);
                assert_eq!(multiplier, DEFAULT_BURN_GAS_MULTIPLIER);
            }
            _ => panic!("expected burn"),
        }
        match Command::parse(&args(&["burn-nonce", "3", "2.5"])).unwrap() {
            Command::BurnNonce { multiplier, .. } => assert_eq!(multiplier, 2.5),
            _ => panic!("expected burn"),
        }

        assert!(Command::parse(&args(&["burn-nonce"])).is_err());
        assert!(Command::parse(&args(&["burn-nonce", "x"])).is_err());
        assert!(Command::parse(&args(&["frobnicate"])).is_err());
    }
}
