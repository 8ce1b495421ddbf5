//! Event-log handlers dispatched by the monitor's contract workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chain::to_lowercase_hex;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::registry::AddressRegistry;
use crate::types::{Log, Transaction, TransactionType, metadata};

use super::evm::SEND_TIMEOUT;

/// Canonical ERC-20 `Transfer` signature; its keccak-256 hash is topic 0.
pub(crate) const ERC20_TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

/// Canonical MultiSig wallet event signatures routed to the debug handler.
/// Typed decoding of these happens downstream in the transformer chain.
pub(crate) const MULTISIG_EVENTS: &[&str] = &[
    "Deposited(address,uint256)",
    "WithdrawalRequested(address,address,uint256)",
    "WithdrawalSigned(address,bytes32)",
    "WithdrawalExecuted(bytes32)",
    "RecoveryInitiated(address)",
    "RecoveryExecuted(address)",
    "TokenSupported(address)",
    "TokenRemoved(address)",
    "TokenWhitelisted(address)",
    "NonSupportedTokenRecovered(address,uint256)",
    "RecoveryAddressChanged(address,address)",
];

/// Shared state a handler needs: the chain client, the account registry, and
/// the monitor's output channel.
pub(crate) struct HandlerContext {
    pub client: Arc<dyn Client>,
    pub addresses: Arc<AddressRegistry>,
    pub events_tx: mpsc::Sender<Transaction>,
    pub dropped: Arc<AtomicU64>,
}

impl HandlerContext {
    /// Emit without ever blocking the worker; drops and counts on a full
    /// buffer.
    pub(crate) async fn emit(&self, tx: Transaction) {
        match self.events_tx.send_timeout(tx, SEND_TIMEOUT).await {
            Ok(()) => {}
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "transaction event buffer full, dropping");
            }
        }
    }
}

/// A log-level event handler. Errors are logged by the dispatcher and the log
/// is dropped; they never tear the worker down.
#[async_trait]
pub(crate) trait EventHandler: Send + Sync {
    async fn handle(&self, log: &Log, cx: &HandlerContext) -> Result<()>;
}

/// The last 20 bytes of a 32-byte topic, as solidity encodes indexed
/// addresses.
pub(crate) fn address_from_topic(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

/// Turns ERC-20 `Transfer` logs into fully populated transactions.
pub(crate) struct Erc20TransferHandler;

#[async_trait]
impl EventHandler for Erc20TransferHandler {
    async fn handle(&self, log: &Log, cx: &HandlerContext) -> Result<()> {
        if log.topics.len() < 3 {
            return Err(Error::invalid_input(format!(
                "Transfer log carries {} topics, expected 3",
                log.topics.len()
            )));
        }
        let from = address_from_topic(&log.topics[1]);
        let to = address_from_topic(&log.topics[2]);

        // The transfer is interesting when either party or the token contract
        // itself is monitored.
        if !cx
            .addresses
            .is_any_monitored(log.chain, &[Some(from), Some(to), Some(log.address)])
        {
            tracing::debug!(
                chain = %log.chain,
                token = %log.address,
                "transfer touches no monitored address, dropping"
            );
            return Ok(());
        }

        // The client returns the transaction already populated with
        // receipt-derived status and gas usage.
        let mut tx = cx.client.transaction(log.transaction_hash).await?;
        tx.tx_type = TransactionType::Erc20Transfer;
        tx.set_metadata(metadata::ERC20_TOKEN_ADDRESS, to_lowercase_hex(&log.address));
        tx.set_metadata(metadata::ERC20_SENDER, to_lowercase_hex(&from));
        tx.set_metadata(metadata::ERC20_RECIPIENT, to_lowercase_hex(&to));
        if log.data.len() >= 32 {
            let amount = U256::from_be_slice(&log.data[..32]);
            tx.set_metadata(metadata::ERC20_AMOUNT, amount.to_string());
        }
        cx.emit(tx).await;
        Ok(())
    }
}

/// Placeholder for the MultiSig wallet event family: records the sighting and
/// leaves decoding to the typed-decoder transformer.
pub(crate) struct MultisigEventHandler;

#[async_trait]
impl EventHandler for MultisigEventHandler {
    async fn handle(&self, log: &Log, _cx: &HandlerContext) -> Result<()> {
        tracing::debug!(
            chain = %log.chain,
            contract = %log.address,
            tx = %log.transaction_hash,
            topic0 = ?log.topics.first(),
            "multisig event observed"
        );
        Ok(())
    }
}

/// Handler table keyed by canonical event signature.
pub(crate) fn default_handlers() -> HashMap<String, Arc<dyn EventHandler>> {
    let mut table: HashMap<String, Arc<dyn EventHandler>> = HashMap::new();
    table.insert(ERC20_TRANSFER_EVENT.to_owned(), Arc::new(Erc20TransferHandler));
    let multisig: Arc<dyn EventHandler> = Arc::new(MultisigEventHandler);
    for event in MULTISIG_EVENTS {
        table.insert((*event).to_owned(), multisig.clone());
    }
    table
}
