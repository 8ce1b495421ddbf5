//! The raw JSON-RPC surface consumed by the EVM client.
//!
//! [`EvmRpc`] is the seam between the client logic and the upstream transport:
//! one method per JSON-RPC operation the crate uses. The production
//! implementation, [`AlloyRpc`], wraps an alloy [`RootProvider`] connected over
//! websocket (subscriptions available) or HTTP (single-shot calls only).

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{Filter, Header, TransactionRequest};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use url::Url;

use crate::error::{Error, Result};

/// Upstream block representation with hydrated transactions.
pub type RpcBlock = alloy::rpc::types::Block;
/// Upstream transaction representation.
pub type RpcTransaction = alloy::rpc::types::Transaction;
/// Upstream receipt representation.
pub type RpcReceipt = alloy::rpc::types::TransactionReceipt;
/// Upstream log representation.
pub type RpcLog = alloy::rpc::types::Log;

/// One method per upstream JSON-RPC operation.
///
/// Implementations must be concurrency-safe: the per-chain client is shared
/// across every monitor worker.
#[async_trait]
pub trait EvmRpc: Send + Sync + 'static {
    async fn chain_id(&self) -> Result<u64>;
    async fn block_number(&self) -> Result<u64>;
    /// Balance at the latest block.
    async fn balance(&self, address: Address) -> Result<U256>;
    /// Pending-state transaction count.
    async fn transaction_count(&self, address: Address) -> Result<u64>;
    async fn gas_price(&self) -> Result<u128>;
    async fn block_by_number(&self, number: BlockNumberOrTag) -> Result<Option<RpcBlock>>;
    async fn block_by_hash(&self, hash: B256) -> Result<Option<RpcBlock>>;
    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<RpcTransaction>>;
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>>;
    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;
    async fn call(&self, request: &TransactionRequest) -> Result<Bytes>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256>;
    async fn logs(&self, filter: &Filter) -> Result<Vec<RpcLog>>;
    /// Open a live log subscription. The stream ends (or yields `Err`) when
    /// the upstream connection degrades; reconnecting is the caller's job.
    async fn subscribe_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Result<RpcLog>>>;
    /// Open a live new-heads subscription.
    async fn subscribe_heads(&self) -> Result<BoxStream<'static, Result<Header>>>;
}

/// [`EvmRpc`] backed by an alloy provider.
#[derive(Debug)]
pub struct AlloyRpc {
    provider: RootProvider,
}

impl AlloyRpc {
    /// Connect to `url`. `ws://` and `wss://` endpoints get a pubsub-capable
    /// transport; `http(s)://` endpoints reject subscriptions at call time.
    pub async fn connect(url: &Url) -> Result<Self> {
        let client = RpcClient::builder()
            .connect(url.as_str())
            .await
            .map_err(|e| Error::rpc(format!("failed to connect to {url}: {e}")))?;
        Ok(Self {
            provider: RootProvider::new(client),
        })
    }

    fn require_pubsub(&self) -> Result<()> {
        if self.provider.client().pubsub_frontend().is_some() {
            Ok(())
        } else {
            Err(Error::rpc(
                "subscriptions require a websocket RPC endpoint (ws:// or wss://)",
            ))
        }
    }
}

fn rpc_err(operation: &str, err: impl std::fmt::Display) -> Error {
    Error::rpc(format!("{operation}: {err}"))
}

#[async_trait]
impl EvmRpc for AlloyRpc {
    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| rpc_err("eth_chainId", e))
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| rpc_err("eth_blockNumber", e))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| rpc_err("eth_getBalance", e))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| rpc_err("eth_getTransactionCount", e))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| rpc_err("eth_gasPrice", e))
    }

    async fn block_by_number(&self, number: BlockNumberOrTag) -> Result<Option<RpcBlock>> {
        self.provider
            .get_block_by_number(number)
            .full()
            .await
            .map_err(|e| rpc_err("eth_getBlockByNumber", e))
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<RpcBlock>> {
        self.provider
            .get_block_by_hash(hash)
            .full()
            .await
            .map_err(|e| rpc_err("eth_getBlockByHash", e))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<RpcTransaction>> {
        self.provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| rpc_err("eth_getTransactionByHash", e))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| rpc_err("eth_getTransactionReceipt", e))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.provider
            .estimate_gas(request.clone())
            .await
            .map_err(|e| rpc_err("eth_estimateGas", e))
    }

    async fn call(&self, request: &TransactionRequest) -> Result<Bytes> {
        self.provider
            .call(request.clone())
            .await
            .map_err(|e| rpc_err("eth_call", e))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| rpc_err("eth_sendRawTransaction", e))?;
        Ok(*pending.tx_hash())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<RpcLog>> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| rpc_err("eth_getLogs", e))
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Result<RpcLog>>> {
        self.require_pubsub()?;
        let subscription = self
            .provider
            .subscribe_logs(filter)
            .await
            .map_err(|e| rpc_err("eth_subscribe(logs)", e))?;
        Ok(subscription.into_stream().map(Ok).boxed())
    }

    async fn subscribe_heads(&self) -> Result<BoxStream<'static, Result<Header>>> {
        self.require_pubsub()?;
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| rpc_err("eth_subscribe(newHeads)", e))?;
        Ok(subscription.into_stream().map(Ok).boxed())
    }
}
