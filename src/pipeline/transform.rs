//! Ordered transaction enrichment chain.
//!
//! Transformers run in ascending registration-key order (alphabetical, stable
//! across restarts). A failing transformer is logged and skipped; the
//! transaction always continues to the next stage and to the consumer.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::client::Client;
use crate::error::{Error, ErrorCode, Result};
use crate::ports::{TokenStore, TypedDecoder};
use crate::types::{Transaction, TransactionStatus, TransactionType, metadata};

/// One enrichment step over a transaction record.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, tx: &mut Transaction) -> Result<()>;
}

/// Registry and runner of [`Transformer`]s.
///
/// Registration happens during wiring; `apply` snapshots the table, so
/// register/unregister must not race an active pipeline.
#[derive(Default)]
pub struct TransformerChain {
    entries: RwLock<BTreeMap<String, Arc<dyn Transformer>>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under `key`; [`ErrorCode::AlreadyExists`] on a duplicate.
    pub fn register(&self, key: &str, transformer: Arc<dyn Transformer>) -> Result<()> {
        let mut entries = self.entries.write().expect("transformer lock poisoned");
        if entries.contains_key(key) {
            return Err(Error::new(
                ErrorCode::AlreadyExists,
                format!("transformer {key:?} is already registered"),
            ));
        }
        entries.insert(key.to_owned(), transformer);
        Ok(())
    }

    pub fn unregister(&self, key: &str) {
        self.entries
            .write()
            .expect("transformer lock poisoned")
            .remove(key);
    }

    /// Run every transformer over `tx` in key order, logging and swallowing
    /// per-stage errors.
    pub async fn apply(&self, mut tx: Transaction) -> Transaction {
        let entries: Vec<(String, Arc<dyn Transformer>)> = {
            let entries = self.entries.read().expect("transformer lock poisoned");
            entries
                .iter()
                .map(|(key, transformer)| (key.clone(), transformer.clone()))
                .collect()
        };
        for (key, transformer) in entries {
            if let Err(err) = transformer.transform(&mut tx).await {
                tracing::warn!(
                    transformer = %key,
                    tx = %tx.hash,
                    error = %err,
                    "transformer failed, continuing"
                );
            }
        }
        tx
    }
}

/// Register the four core transformers in their canonical order.
pub fn register_core_transformers(
    chain: &TransformerChain,
    client: Arc<dyn Client>,
    decoder: Arc<dyn TypedDecoder>,
    tokens: Arc<dyn TokenStore>,
) -> Result<()> {
    chain.register(
        ReceiptTransformer::KEY,
        Arc::new(ReceiptTransformer::new(client.clone())),
    )?;
    chain.register(
        InputDataTransformer::KEY,
        Arc::new(InputDataTransformer::new(client)),
    )?;
    chain.register(
        TypedDecodeTransformer::KEY,
        Arc::new(TypedDecodeTransformer::new(decoder)),
    )?;
    chain.register(
        TokenMetadataTransformer::KEY,
        Arc::new(TokenMetadataTransformer::new(tokens)),
    )?;
    Ok(())
}

/// Advances the status from the execution receipt and records gas usage.
pub struct ReceiptTransformer {
    client: Arc<dyn Client>,
}

impl ReceiptTransformer {
    pub const KEY: &'static str = "10_receipt_status";

    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transformer for ReceiptTransformer {
    async fn transform(&self, tx: &mut Transaction) -> Result<()> {
        let receipt = self.client.transaction_receipt(tx.hash).await?;
        let status = if receipt.success {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        tx.advance_status(status);
        tx.gas_used = Some(receipt.gas_used);
        if tx.block_number.is_none() {
            tx.block_number = Some(receipt.block_number);
        }
        Ok(())
    }
}

/// Backfills missing calldata on contract calls. Failures are warnings only.
pub struct InputDataTransformer {
    client: Arc<dyn Client>,
}

impl InputDataTransformer {
    pub const KEY: &'static str = "20_input_data";

    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transformer for InputDataTransformer {
    async fn transform(&self, tx: &mut Transaction) -> Result<()> {
        if tx.tx_type != TransactionType::ContractCall || !tx.data.is_empty() {
            return Ok(());
        }
        match self.client.transaction(tx.hash).await {
            Ok(full) => tx.data = full.data,
            Err(err) => {
                tracing::warn!(tx = %tx.hash, error = %err, "input data backfill failed");
            }
        }
        Ok(())
    }
}

/// Replaces the type and metadata with the ABI-aware decoder's view.
pub struct TypedDecodeTransformer {
    decoder: Arc<dyn TypedDecoder>,
}

impl TypedDecodeTransformer {
    pub const KEY: &'static str = "30_typed_decode";

    pub fn new(decoder: Arc<dyn TypedDecoder>) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl Transformer for TypedDecodeTransformer {
    async fn transform(&self, tx: &mut Transaction) -> Result<()> {
        let decoded = self.decoder.decode_transaction(tx).await?;
        tx.tx_type = decoded.tx_type;
        tx.metadata = decoded.metadata;
        Ok(())
    }
}

/// Resolves token metadata for transactions that reference a token address.
pub struct TokenMetadataTransformer {
    tokens: Arc<dyn TokenStore>,
}

impl TokenMetadataTransformer {
    pub const KEY: &'static str = "40_token_metadata";

    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Transformer for TokenMetadataTransformer {
    async fn transform(&self, tx: &mut Transaction) -> Result<()> {
        let references = [
            (
                metadata::ERC20_TOKEN_ADDRESS,
                metadata::ERC20_TOKEN_SYMBOL,
                metadata::ERC20_TOKEN_DECIMALS,
            ),
            (
                metadata::MULTISIG_TOKEN_ADDRESS,
                metadata::MULTISIG_TOKEN_SYMBOL,
                metadata::MULTISIG_TOKEN_DECIMALS,
            ),
        ];
        for (address_key, symbol_key, decimals_key) in references {
            let Some(address) = tx.metadata_str(address_key).map(str::to_owned) else {
                continue;
            };
            match self.tokens.token(tx.chain, &address).await {
                Ok(token) => {
                    tx.set_metadata(symbol_key, token.symbol);
                    tx.set_metadata(decimals_key, u64::from(token.decimals));
                }
                Err(err) => {
                    tracing::warn!(tx = %tx.hash, token = %address, error = %err, "token lookup failed");
                }
            }
        }
        Ok(())
    }
}
