//! Contracts consumed from external collaborators.
//!
//! The persistence layer, block explorer, token store, and typed decoder live
//! outside this crate; the pipeline programs against these traits. Pagination
//! tokens are opaque strings; [`PageToken`] is the codec this crate's own
//! in-memory implementors use.

use std::collections::BTreeMap;

use alloy::primitives::B256;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, ErrorCode, Result};
use crate::network::Network;
use crate::types::{Token, Transaction, TransactionStatus, TransactionType};

/// One page of results plus the token for the next page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// A page with no successor.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Opaque pagination token: a base64-wrapped offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub offset: u64,
}

impl PageToken {
    pub fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Encode to the opaque string form.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).expect("token serializes"))
    }

    /// Decode an opaque token string.
    pub fn decode(raw: &str) -> Result<Self> {
        let invalid = || {
            Error::new(
                ErrorCode::InvalidPaginationToken,
                format!("malformed pagination token {raw:?}"),
            )
        };
        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

/// Repository list filter. Unset fields match everything; `address` requires
/// `chain`.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub statuses: Vec<TransactionStatus>,
    pub chain: Option<Network>,
    pub wallet_id: Option<String>,
    pub address: Option<String>,
    pub tx_type: Option<TransactionType>,
    pub token_address: Option<String>,
    pub block_number: Option<u64>,
    pub min_block_number: Option<u64>,
    pub max_block_number: Option<u64>,
}

impl TransactionFilter {
    /// Transactions whose status may still change.
    pub fn non_terminal() -> Self {
        Self {
            statuses: vec![TransactionStatus::Pending, TransactionStatus::Mined],
            ..Self::default()
        }
    }
}

/// Durable store of observed transactions, keyed by hash.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a new record; [`ErrorCode::AlreadyExists`] when the hash is
    /// present.
    async fn create(&self, tx: &Transaction) -> Result<()>;

    /// Full replace by hash; [`ErrorCode::TransactionNotFound`] when missing.
    async fn update(&self, tx: &Transaction) -> Result<()>;

    /// Status-only partial update.
    async fn update_transaction_status(&self, hash: B256, status: TransactionStatus) -> Result<()>;

    /// Fetch by hash; [`ErrorCode::TransactionNotFound`] when missing.
    async fn get_by_hash(&self, hash: B256) -> Result<Transaction>;

    /// List matching transactions. A `limit` of zero means unbounded.
    async fn list(
        &self,
        filter: &TransactionFilter,
        limit: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Transaction>>;

    async fn exists(&self, hash: B256) -> Result<bool>;
}

/// Kind of history served by the block explorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Normal,
    Internal,
    Erc20,
    Erc721,
}

/// Query options for [`Explorer::transaction_history`].
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    pub kind: HistoryKind,
    /// Inclusive lower block bound.
    pub start_block: Option<u64>,
    pub limit: usize,
}

/// Block-explorer source of historical transactions and authoritative status.
#[async_trait]
pub trait Explorer: Send + Sync {
    async fn transaction_history(
        &self,
        address: &str,
        options: &HistoryOptions,
        page_token: Option<&str>,
    ) -> Result<Page<Transaction>>;

    async fn transaction_by_hash(&self, hash: B256) -> Result<Transaction>;
}

/// Change notification from the token store.
#[derive(Debug, Clone)]
pub struct TokenEvent {
    pub kind: TokenEventKind,
    pub token: Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEventKind {
    Added,
    Removed,
}

/// Source of ERC-20 token metadata.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Metadata for the token at `address`.
    async fn token(&self, chain: Network, address: &str) -> Result<Token>;

    async fn tokens_by_chain(
        &self,
        chain: Network,
        limit: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Token>>;

    /// Live token add/remove notifications.
    fn token_events(&self) -> broadcast::Receiver<TokenEvent>;
}

/// Output of the ABI-aware transaction decoder.
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    pub tx_type: TransactionType,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// ABI-aware decoder that refines raw transactions into typed variants.
#[async_trait]
pub trait TypedDecoder: Send + Sync {
    async fn decode_transaction(&self, tx: &Transaction) -> Result<DecodedTransaction>;
}
