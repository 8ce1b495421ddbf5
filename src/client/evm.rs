//! EVM implementation of the [`Client`] capability interface.
//!
//! Wraps an [`EvmRpc`] transport, owns the reconnecting subscription workers,
//! and converts upstream representations into the crate's data model.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::consensus::{Transaction as _, TxEnvelope, TxReceipt as _};
use alloy::eips::BlockNumberOrTag;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::{Filter, Header, TransactionRequest};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::chain::{Chain, parse_address};
use crate::error::{Error, ErrorCode, Result};
use crate::network::Network;
use crate::topics::{EventArg, EventSignature};
use crate::types::{Block, Log, Transaction, TransactionReceipt, TransactionStatus, TransactionType};

use super::retry::{retry_operation, transient_fetch_error};
use super::rpc::{AlloyRpc, EvmRpc, RpcBlock, RpcLog, RpcReceipt, RpcTransaction};
use super::subscription::{
    ERR_BUFFER, LOG_BUFFER, LOOKBACK_BLOCKS, SubscriptionDriver, spawn_subscription,
};
use super::{BlockIdentifier, Client};

/// ERC-20 `balanceOf(address)` function selector: the first four bytes of
/// keccak-256 of `"balanceOf(address)"`.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// A [`Client`] over one JSON-RPC endpoint.
///
/// Cheap to share: the factory hands out one instance per chain behind an
/// `Arc`, and every monitor worker for that chain goes through it.
#[derive(Debug)]
pub struct EvmClient<R: EvmRpc = AlloyRpc> {
    chain: Chain,
    rpc: Arc<R>,
    shutdown: CancellationToken,
}

impl EvmClient<AlloyRpc> {
    /// Connect to the chain's RPC endpoint and verify it serves the expected
    /// chain ID.
    pub async fn connect(chain: Chain) -> Result<Self> {
        let rpc = AlloyRpc::connect(&chain.rpc_url).await?;
        Self::with_rpc(chain, rpc).await
    }
}

impl<R: EvmRpc> EvmClient<R> {
    /// Build a client over an existing transport, verifying connectivity by
    /// fetching the remote chain ID and cross-checking it against the
    /// descriptor.
    pub async fn with_rpc(chain: Chain, rpc: R) -> Result<Self> {
        let client = Self {
            chain,
            rpc: Arc::new(rpc),
            shutdown: CancellationToken::new(),
        };
        let remote = client.rpc.chain_id().await?;
        if remote != client.chain.id {
            return Err(Error::new(
                ErrorCode::InvalidBlockchainConfig,
                format!(
                    "endpoint serves chain id {remote}, expected {} for {}",
                    client.chain.id, client.chain.network
                ),
            ));
        }
        tracing::info!(network = %client.chain.network, chain_id = remote, "connected EVM client");
        Ok(client)
    }

    fn network(&self) -> Network {
        self.chain.network
    }

    /// A token cancelled by the caller or by [`Client::close`].
    fn linked_token(&self, caller: &CancellationToken) -> CancellationToken {
        crate::cancel::linked_token(&[caller, &self.shutdown])
    }

    /// Starting block for a new subscription: an explicit positive bound wins,
    /// anything else rewinds [`LOOKBACK_BLOCKS`] behind the head.
    async fn resolve_start_block(&self, from_block: Option<u64>) -> Result<u64> {
        match from_block {
            Some(n) if n > 0 => Ok(n),
            _ => {
                let head = self.rpc.block_number().await?;
                Ok(head.saturating_sub(LOOKBACK_BLOCKS))
            }
        }
    }

    fn log_filter(
        &self,
        addresses: &[Address],
        event: &str,
        args: &[Option<EventArg>],
    ) -> Result<Filter> {
        let signature = EventSignature::parse(event)?;
        let topics = signature.topic_filter(args)?;
        if topics.len() > 4 {
            return Err(Error::new(
                ErrorCode::InvalidEventArgs,
                format!("{} topic slots exceed the 4 available", topics.len()),
            ));
        }
        let mut filter = Filter::new().address(addresses.to_vec());
        for (position, slot) in topics.into_iter().enumerate() {
            let Some(values) = slot else { continue };
            filter = match position {
                0 => filter.event_signature(values),
                1 => filter.topic1(values),
                2 => filter.topic2(values),
                _ => filter.topic3(values),
            };
        }
        Ok(filter)
    }
}

#[async_trait]
impl<R: EvmRpc> Client for EvmClient<R> {
    async fn balance(&self, address: &str) -> Result<U256> {
        let address = parse_address(address)?;
        self.rpc.balance(address).await
    }

    async fn nonce(&self, address: &str) -> Result<u64> {
        let address = parse_address(address)?;
        self.rpc.transaction_count(address).await
    }

    async fn gas_price(&self) -> Result<u128> {
        self.rpc.gas_price().await
    }

    #[instrument(skip(self), fields(network = %self.chain.network))]
    async fn block(&self, id: &str) -> Result<Block> {
        let identifier: BlockIdentifier = id.parse()?;
        let rpc = self.rpc.clone();
        let fetched = retry_operation(
            "get_block",
            id,
            || {
                let rpc = rpc.clone();
                async move {
                    let block = match identifier {
                        BlockIdentifier::Latest => {
                            rpc.block_by_number(BlockNumberOrTag::Latest).await?
                        }
                        BlockIdentifier::Earliest => {
                            rpc.block_by_number(BlockNumberOrTag::Earliest).await?
                        }
                        BlockIdentifier::Pending => {
                            rpc.block_by_number(BlockNumberOrTag::Pending).await?
                        }
                        BlockIdentifier::Number(n) => {
                            rpc.block_by_number(BlockNumberOrTag::Number(n)).await?
                        }
                        BlockIdentifier::Hash(h) => rpc.block_by_hash(h).await?,
                    };
                    block.ok_or_else(|| Error::block_not_found(identifier.to_string()))
                }
            },
            transient_fetch_error,
        )
        .await?;
        Ok(block_from_rpc(self.network(), &fetched))
    }

    #[instrument(skip(self), fields(network = %self.chain.network, hash = %hash))]
    async fn transaction(&self, hash: B256) -> Result<Transaction> {
        let raw = self
            .rpc
            .transaction_by_hash(hash)
            .await?
            .ok_or_else(|| Error::transaction_not_found(hash.to_string()))?;

        if raw.block_number.is_none() {
            return Ok(transaction_from_rpc(self.network(), &raw, TransactionStatus::Pending, 0));
        }

        // Mined: derive the final status and gas usage from the receipt.
        let (status, gas_used) = match self.rpc.transaction_receipt(hash).await? {
            Some(receipt) => {
                let status = if receipt.inner.status() {
                    TransactionStatus::Success
                } else {
                    TransactionStatus::Failed
                };
                (status, Some(receipt.gas_used))
            }
            None => (TransactionStatus::Mined, None),
        };
        let mut tx = transaction_from_rpc(self.network(), &raw, status, 0);
        tx.gas_used = gas_used;
        Ok(tx)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        let receipt = self
            .rpc
            .transaction_receipt(hash)
            .await?
            .ok_or_else(|| Error::transaction_not_found(hash.to_string()))?;
        Ok(receipt_from_rpc(self.network(), &receipt))
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.rpc.estimate_gas(request).await.map_err(|e| {
            Error::new(ErrorCode::InvalidGasLimit, "gas estimation failed").with_source(e)
        })
    }

    async fn call_contract(&self, from: Address, to: Address, data: Bytes) -> Result<Bytes> {
        let mut request = TransactionRequest::default().to(to).input(data.into());
        if from != Address::ZERO {
            request = request.from(from);
        }
        self.rpc.call(&request).await
    }

    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&BALANCE_OF_SELECTOR);
        data.extend_from_slice(B256::left_padding_from(holder.as_slice()).as_slice());
        let returned = self
            .call_contract(Address::ZERO, token, Bytes::from(data))
            .await?;
        if returned.len() < 32 {
            return Err(Error::new(
                ErrorCode::InvalidTokenBalance,
                format!("balanceOf returned {} bytes, expected 32", returned.len()),
            )
            .with_detail("token", token.to_string()));
        }
        Ok(U256::from_be_slice(&returned[..32]))
    }

    async fn broadcast_transaction(&self, raw: Bytes) -> Result<B256> {
        TxEnvelope::decode_2718(&mut raw.as_ref()).map_err(|e| {
            Error::new(ErrorCode::InvalidTransaction, "raw transaction does not decode")
                .with_source(e)
        })?;
        self.rpc.send_raw_transaction(&raw).await
    }

    async fn contract_logs(
        &self,
        addresses: &[Address],
        event: &str,
        args: &[Option<EventArg>],
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<Log>> {
        let mut filter = self.log_filter(addresses, event, args)?;
        if let Some(from) = from_block {
            filter = filter.from_block(from);
        }
        if let Some(to) = to_block {
            filter = filter.to_block(to);
        }
        let network = self.network();
        let logs = self.rpc.logs(&filter).await?;
        Ok(logs
            .into_iter()
            .filter_map(|raw| match log_from_rpc(network, raw) {
                Ok(log) => Some(log),
                Err(err) => {
                    tracing::warn!(network = %network, error = %err, "skipping malformed log");
                    None
                }
            })
            .collect())
    }

    async fn subscribe_contract_logs(
        &self,
        addresses: &[Address],
        event: &str,
        args: &[Option<EventArg>],
        from_block: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>)> {
        let filter = self.log_filter(addresses, event, args)?;
        let start = self.resolve_start_block(from_block).await?;
        let driver = LogsDriver {
            rpc: self.rpc.clone(),
            filter,
            network: self.network(),
            label: format!("logs:{}:{event}", self.network()),
        };
        Ok(spawn_subscription(
            driver,
            start,
            LOG_BUFFER,
            ERR_BUFFER,
            self.linked_token(&cancel),
        ))
    }

    async fn subscribe_new_heads(
        &self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Block>, mpsc::Receiver<Error>)> {
        let driver = HeadsDriver {
            rpc: self.rpc.clone(),
            network: self.network(),
        };
        Ok(spawn_subscription(
            driver,
            0,
            LOG_BUFFER,
            ERR_BUFFER,
            self.linked_token(&cancel),
        ))
    }

    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Log subscription driver: reopens the upstream filter from the last
/// delivered block.
struct LogsDriver<R: EvmRpc> {
    rpc: Arc<R>,
    filter: Filter,
    network: Network,
    label: String,
}

#[async_trait]
impl<R: EvmRpc> SubscriptionDriver for LogsDriver<R> {
    type Raw = RpcLog;
    type Item = Log;

    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn open(&self, from_block: u64) -> Result<BoxStream<'static, Result<RpcLog>>> {
        let filter = self.filter.clone().from_block(from_block);
        self.rpc.subscribe_logs(&filter).await
    }

    async fn process(&self, raw: RpcLog) -> Result<Option<(Log, Option<u64>)>> {
        let log = log_from_rpc(self.network, raw)?;
        let block_number = log.block_number;
        Ok(Some((log, block_number)))
    }
}

/// New-head subscription driver: resolves each header to a full block with
/// retry, degrading to a header-only block when the body stays unavailable.
struct HeadsDriver<R: EvmRpc> {
    rpc: Arc<R>,
    network: Network,
}

#[async_trait]
impl<R: EvmRpc> SubscriptionDriver for HeadsDriver<R> {
    type Raw = Header;
    type Item = Block;

    fn describe(&self) -> String {
        format!("heads:{}", self.network)
    }

    async fn open(&self, _from_block: u64) -> Result<BoxStream<'static, Result<Header>>> {
        self.rpc.subscribe_heads().await
    }

    async fn process(&self, header: Header) -> Result<Option<(Block, Option<u64>)>> {
        let hash = header.hash;
        let number = header.inner.number;
        let fetched = retry_operation(
            "get_block_by_hash",
            &hash.to_string(),
            || {
                let rpc = self.rpc.clone();
                async move {
                    rpc.block_by_hash(hash)
                        .await?
                        .ok_or_else(|| Error::block_not_found(hash.to_string()))
                }
            },
            transient_fetch_error,
        )
        .await;

        let block = match fetched {
            Ok(full) => block_from_rpc(self.network, &full),
            Err(err) => {
                tracing::warn!(
                    network = %self.network,
                    block = %hash,
                    number,
                    error = %err,
                    "block body unavailable after retries, emitting header-only block"
                );
                block_from_header(self.network, &header)
            }
        };
        Ok(Some((block, Some(number))))
    }
}

/// Convert an upstream transaction, classifying it from its shape.
pub(crate) fn transaction_from_rpc(
    network: Network,
    tx: &RpcTransaction,
    status: TransactionStatus,
    timestamp: i64,
) -> Transaction {
    let to = tx.kind().to().copied();
    let data = tx.input().clone();
    let tx_type = TransactionType::classify(to.as_ref(), &data);
    Transaction {
        chain: network,
        hash: *tx.inner.tx_hash(),
        from: Some(tx.inner.signer()),
        to,
        value: tx.value(),
        data,
        nonce: tx.nonce(),
        gas_price: tx
            .effective_gas_price
            .or_else(|| tx.gas_price())
            .unwrap_or_else(|| tx.max_fee_per_gas()),
        gas_limit: tx.gas_limit(),
        tx_type,
        status,
        timestamp,
        block_number: tx.block_number,
        gas_used: None,
        metadata: BTreeMap::new(),
    }
}

/// Convert a hydrated upstream block. Transactions assembled here carry
/// `Mined` status and the block timestamp; per-transaction receipts are not
/// fetched at block granularity.
pub(crate) fn block_from_rpc(network: Network, block: &RpcBlock) -> Block {
    let timestamp = block.header.inner.timestamp;
    let transactions = block.transactions.as_transactions().map(|txs| {
        txs.iter()
            .map(|tx| transaction_from_rpc(network, tx, TransactionStatus::Mined, timestamp as i64))
            .collect::<Vec<_>>()
    });
    Block {
        chain: network,
        hash: block.header.hash,
        number: block.header.inner.number,
        parent_hash: block.header.inner.parent_hash,
        timestamp,
        miner: block.header.inner.beneficiary,
        gas_used: block.header.inner.gas_used,
        gas_limit: block.header.inner.gas_limit,
        size: block.header.size.and_then(|s| u64::try_from(s).ok()),
        difficulty: block.header.inner.difficulty,
        extra: block.header.inner.extra_data.clone(),
        transaction_count: transactions.as_ref().map(Vec::len).unwrap_or_default(),
        transactions,
    }
}

/// Degraded block form used when the body cannot be fetched.
pub(crate) fn block_from_header(network: Network, header: &Header) -> Block {
    Block {
        chain: network,
        hash: header.hash,
        number: header.inner.number,
        parent_hash: header.inner.parent_hash,
        timestamp: header.inner.timestamp,
        miner: header.inner.beneficiary,
        gas_used: header.inner.gas_used,
        gas_limit: header.inner.gas_limit,
        size: header.size.and_then(|s| u64::try_from(s).ok()),
        difficulty: header.inner.difficulty,
        extra: header.inner.extra_data.clone(),
        transaction_count: 0,
        transactions: None,
    }
}

/// Convert an upstream log. Logs without a transaction hash are unusable for
/// dispatch and are rejected.
pub(crate) fn log_from_rpc(network: Network, log: RpcLog) -> Result<Log> {
    let transaction_hash = log
        .transaction_hash
        .ok_or_else(|| Error::invalid_input("log without transaction hash"))?;
    Ok(Log {
        address: log.address(),
        chain: network,
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number,
        transaction_hash,
        log_index: log.log_index,
    })
}

/// Convert an upstream receipt.
pub(crate) fn receipt_from_rpc(network: Network, receipt: &RpcReceipt) -> TransactionReceipt {
    let logs = receipt
        .inner
        .logs()
        .iter()
        .cloned()
        .filter_map(|raw| log_from_rpc(network, raw).ok())
        .collect();
    TransactionReceipt {
        hash: receipt.transaction_hash,
        chain: network,
        contract_address: receipt.contract_address,
        block_number: receipt.block_number.unwrap_or_default(),
        success: receipt.inner.status(),
        gas_used: receipt.gas_used,
        cumulative_gas_used: receipt.inner.cumulative_gas_used(),
        logs_bloom: Bytes::copy_from_slice(receipt.inner.bloom().as_slice()),
        logs,
    }
}
