use std::time::Duration;

use alloy::{
    network::{EthereumWallet, ReceiptResponse, TransactionBuilder},
    primitives::{Address, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest as RpcTransactionRequest,
    signers::local::PrivateKeySigner,
    transports::http::reqwest::Url,
};

use crate::{
    error::{AlloyRpcErrorToRelayError, RelayError},
    ledger::{
        BlockTag, FeeEstimate, LedgerReader, LedgerWriter, SendTransactionParams,
        TransactionReceipt,
    },
};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AlloyChainConfig<'a> {
    pub rpc_url: &'a str,
    pub private_key: &'a str,
}

/// Ledger client for one chain backed by an alloy HTTP provider with a local
/// private-key wallet.
#[derive(Clone)]
pub struct AlloyChain {
    provider: DynProvider,
    signer_address: Address,
    rpc_url: Url,
}

impl AlloyChain {
    pub fn new(config: AlloyChainConfig<'_>) -> Result<Self, RelayError> {
        let rpc_url: Url = config.rpc_url.parse().map_err(|e| RelayError::Network {
            message: format!("invalid rpc url {}: {e}", config.rpc_url),
        })?;

        let signer: PrivateKeySigner =
            config
                .private_key
                .parse()
                .map_err(|e| RelayError::Signature {
                    message: format!("invalid private key: {e}"),
                })?;
        let signer_address = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.clone())
            .erased();

        Ok(Self {
            provider,
            signer_address,
            rpc_url,
        })
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }
}

impl LedgerReader for AlloyChain {
    async fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, RelayError> {
        let request = self.provider.get_transaction_count(address);
        let result = match tag {
            BlockTag::Pending => request.pending().await,
            BlockTag::Latest => request.latest().await,
        };
        result.map_err(|e| e.to_relay_error())
    }

    async fn estimate_fees_per_gas(&self) -> Result<FeeEstimate, RelayError> {
        let estimate = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| e.to_relay_error())?;

        Ok(FeeEstimate {
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
        })
    }
}

impl LedgerWriter for AlloyChain {
    async fn get_chain_id(&self) -> Result<u64, RelayError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| e.to_relay_error())
    }

    async fn get_addresses(&self) -> Result<Vec<Address>, RelayError> {
        Ok(vec![self.signer_address])
    }

    async fn send_transaction(&self, params: SendTransactionParams) -> Result<B256, RelayError> {
        let nonce = params.nonce;
        let mut tx = RpcTransactionRequest::default()
            .with_from(params.from)
            .with_to(params.to)
            .with_chain_id(params.chain_id)
            .with_nonce(params.nonce)
            .with_value(params.value)
            .with_input(params.data);

        if let Some(gas_limit) = params.gas_limit {
            tx = tx.with_gas_limit(gas_limit);
        }
        if let Some(fee) = params.max_fee_per_gas {
            tx = tx.with_max_fee_per_gas(fee);
        }
        if let Some(fee) = params.max_priority_fee_per_gas {
            tx = tx.with_max_priority_fee_per_gas(fee);
        }
        if let Some(price) = params.gas_price {
            tx = tx.with_gas_price(price);
        }

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| e.to_relay_error())?;

        tracing::debug!(hash = %pending.tx_hash(), nonce, "Transaction broadcast");
        Ok(*pending.tx_hash())
    }

    async fn wait_for_transaction_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<TransactionReceipt, RelayError> {
        let poll = async {
            loop {
                let receipt = self
                    .provider
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(|e| e.to_relay_error())?;

                if let Some(receipt) = receipt {
                    return Ok::<_, RelayError>(TransactionReceipt {
                        transaction_hash: receipt.transaction_hash,
                        status: receipt.status(),
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    });
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| RelayError::Blockchain {
                message: format!(
                    "Timed out after {}s waiting for receipt of {hash}",
                    timeout.as_secs()
                ),
                code: None,
            })?
    }
}
