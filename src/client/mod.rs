//! The EVM client: a capability interface over a single JSON-RPC endpoint.
//!
//! [`Client`] is the operation table the monitor and pipeline program
//! against; [`EvmClient`] is the EVM implementation. The transport itself sits
//! behind [`EvmRpc`] so the client logic is testable against a scripted
//! upstream.

mod evm;
mod retry;
mod rpc;
mod subscription;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::error::{Error, ErrorCode, Result};
use crate::topics::EventArg;
use crate::types::{Block, Log, Transaction, TransactionReceipt};

pub use evm::EvmClient;
pub use rpc::{AlloyRpc, EvmRpc, RpcBlock, RpcLog, RpcReceipt, RpcTransaction};

/// How callers identify a block: a tag, a decimal height, or a `0x…` hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdentifier {
    Latest,
    Earliest,
    Pending,
    Number(u64),
    Hash(B256),
}

impl FromStr for BlockIdentifier {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        match trimmed {
            "latest" => return Ok(BlockIdentifier::Latest),
            "earliest" => return Ok(BlockIdentifier::Earliest),
            "pending" => return Ok(BlockIdentifier::Pending),
            _ => {}
        }
        if let Some(hex) = trimmed.strip_prefix("0x") {
            if hex.len() == 64 {
                return B256::from_str(trimmed)
                    .map(BlockIdentifier::Hash)
                    .map_err(|e| invalid_identifier(raw).with_source(e));
            }
            return Err(invalid_identifier(raw));
        }
        trimmed
            .parse::<u64>()
            .map(BlockIdentifier::Number)
            .map_err(|e| invalid_identifier(raw).with_source(e))
    }
}

fn invalid_identifier(raw: &str) -> Error {
    Error::new(
        ErrorCode::InvalidBlockIdentifier,
        format!("block identifier {raw:?} is not a tag, a height, or a 0x-prefixed hash"),
    )
}

impl Display for BlockIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockIdentifier::Latest => write!(f, "latest"),
            BlockIdentifier::Earliest => write!(f, "earliest"),
            BlockIdentifier::Pending => write!(f, "pending"),
            BlockIdentifier::Number(n) => write!(f, "{n}"),
            BlockIdentifier::Hash(h) => write!(f, "{h}"),
        }
    }
}

/// Operations a chain client exposes to the monitor and the pipeline.
///
/// Single-shot operations are cancelled by dropping their futures; long-lived
/// subscriptions additionally observe the given [`CancellationToken`].
#[async_trait]
pub trait Client: Send + Sync {
    /// Native balance of `address` at the latest block.
    async fn balance(&self, address: &str) -> Result<U256>;

    /// Pending-state nonce of `address`.
    async fn nonce(&self, address: &str) -> Result<u64>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    /// Fetch a block by tag (`latest`/`earliest`/`pending`), decimal height,
    /// or `0x…` hash. Transiently missing blocks are retried.
    async fn block(&self, id: &str) -> Result<Block>;

    /// Fetch and classify a transaction, populating receipt-derived fields
    /// when it is mined.
    async fn transaction(&self, hash: B256) -> Result<Transaction>;

    /// Fetch the receipt of a mined transaction.
    async fn transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt>;

    /// Estimate the gas limit for `request`.
    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;

    /// Execute a read-only contract call. A zero `from` address makes the
    /// call unauthenticated.
    async fn call_contract(&self, from: Address, to: Address, data: Bytes) -> Result<Bytes>;

    /// ERC-20 `balanceOf(holder)` on `token`.
    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256>;

    /// Broadcast a pre-signed raw transaction. The payload is decoded first
    /// to reject garbage before it reaches the network.
    async fn broadcast_transaction(&self, raw: Bytes) -> Result<B256>;

    /// One-shot log query. `None` block bounds are unbounded.
    async fn contract_logs(
        &self,
        addresses: &[Address],
        event: &str,
        args: &[Option<EventArg>],
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<Log>>;

    /// Long-lived log subscription with reconnect, backoff, and gap recovery.
    /// A missing `from_block` rewinds the configured lookback behind the head.
    async fn subscribe_contract_logs(
        &self,
        addresses: &[Address],
        event: &str,
        args: &[Option<EventArg>],
        from_block: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>)>;

    /// Long-lived new-head subscription. Each header is resolved to a full
    /// block with retry; on repeated failure a header-only block is emitted.
    async fn subscribe_new_heads(
        &self,
        cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Block>, mpsc::Receiver<Error>)>;

    /// The chain this client serves.
    fn chain(&self) -> &Chain;

    /// Shut down the client; all of its subscriptions terminate.
    fn close(&self);
}

impl std::fmt::Debug for dyn Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Client").field("chain", self.chain()).finish()
    }
}
