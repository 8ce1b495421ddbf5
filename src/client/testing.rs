//! Scripted [`Client`] implementation shared by monitor and pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::config::BlockchainConfig;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::topics::EventArg;
use crate::types::{Block, Log, Transaction, TransactionReceipt};

use super::Client;

/// A [`Client`] whose responses are scripted up front. Unscripted operations
/// fail with an RPC error.
pub(crate) struct ScriptedClient {
    chain: Chain,
    pub transactions: Mutex<HashMap<B256, Transaction>>,
    pub transaction_calls: AtomicU32,
    pub receipts: Mutex<HashMap<B256, TransactionReceipt>>,
    pub logs_by_event: Mutex<HashMap<String, Vec<Log>>>,
    pub blocks: Mutex<Vec<Block>>,
    pub log_subscriptions: Mutex<Vec<(Vec<Address>, String, Option<u64>)>>,
    held_block_senders: Mutex<Vec<mpsc::Sender<Block>>>,
}

impl ScriptedClient {
    pub fn new(network: Network) -> Arc<Self> {
        let chain = Chain::new(
            network,
            &BlockchainConfig {
                rpc_url: "wss://rpc.invalid/ws".to_owned(),
                explorer_url: None,
            },
        )
        .expect("test chain");
        Arc::new(Self {
            chain,
            transactions: Mutex::new(HashMap::new()),
            transaction_calls: AtomicU32::new(0),
            receipts: Mutex::new(HashMap::new()),
            logs_by_event: Mutex::new(HashMap::new()),
            blocks: Mutex::new(Vec::new()),
            log_subscriptions: Mutex::new(Vec::new()),
            held_block_senders: Mutex::new(Vec::new()),
        })
    }

    pub fn stub_transaction(&self, tx: Transaction) {
        self.transactions.lock().expect("lock").insert(tx.hash, tx);
    }

    pub fn stub_receipt(&self, receipt: TransactionReceipt) {
        self.receipts.lock().expect("lock").insert(receipt.hash, receipt);
    }

    pub fn stub_log(&self, event: &str, log: Log) {
        self.logs_by_event
            .lock()
            .expect("lock")
            .entry(event.to_owned())
            .or_default()
            .push(log);
    }

    pub fn stub_block(&self, block: Block) {
        self.blocks.lock().expect("lock").push(block);
    }
}

#[async_trait]
impl Client for ScriptedClient {
    async fn balance(&self, _address: &str) -> Result<U256> {
        Err(Error::rpc("not scripted"))
    }

    async fn nonce(&self, _address: &str) -> Result<u64> {
        Err(Error::rpc("not scripted"))
    }

    async fn gas_price(&self) -> Result<u128> {
        Err(Error::rpc("not scripted"))
    }

    async fn block(&self, _id: &str) -> Result<Block> {
        Err(Error::rpc("not scripted"))
    }

    async fn transaction(&self, hash: B256) -> Result<Transaction> {
        self.transaction_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.transactions
            .lock()
            .expect("lock")
            .get(&hash)
            .cloned()
            .ok_or_else(|| Error::transaction_not_found(hash.to_string()))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        self.receipts
            .lock()
            .expect("lock")
            .get(&hash)
            .cloned()
            .ok_or_else(|| Error::transaction_not_found(hash.to_string()))
    }

    async fn estimate_gas(&self, _request: &alloy::rpc::types::TransactionRequest) -> Result<u64> {
        Err(Error::rpc("not scripted"))
    }

    async fn call_contract(&self, _from: Address, _to: Address, _data: Bytes) -> Result<Bytes> {
        Err(Error::rpc("not scripted"))
    }

    async fn token_balance(&self, _token: Address, _holder: Address) -> Result<U256> {
        Err(Error::rpc("not scripted"))
    }

    async fn broadcast_transaction(&self, _raw: Bytes) -> Result<B256> {
        Err(Error::rpc("not scripted"))
    }

    async fn contract_logs(
        &self,
        _addresses: &[Address],
        _event: &str,
        _args: &[Option<EventArg>],
        _from_block: Option<u64>,
        _to_block: Option<u64>,
    ) -> Result<Vec<Log>> {
        Err(Error::rpc("not scripted"))
    }

    async fn subscribe_contract_logs(
        &self,
        addresses: &[Address],
        event: &str,
        _args: &[Option<EventArg>],
        from_block: Option<u64>,
        _cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Log>, mpsc::Receiver<Error>)> {
        self.log_subscriptions.lock().expect("lock").push((
            addresses.to_vec(),
            event.to_owned(),
            from_block,
        ));
        let (log_tx, log_rx) = mpsc::channel(16);
        let (_err_tx, err_rx) = mpsc::channel(1);
        let scripted = self
            .logs_by_event
            .lock()
            .expect("lock")
            .remove(event)
            .unwrap_or_default();
        tokio::spawn(async move {
            for log in scripted {
                if log_tx.send(log).await.is_err() {
                    break;
                }
            }
        });
        Ok((log_rx, err_rx))
    }

    async fn subscribe_new_heads(
        &self,
        _cancel: CancellationToken,
    ) -> Result<(mpsc::Receiver<Block>, mpsc::Receiver<Error>)> {
        let (block_tx, block_rx) = mpsc::channel(16);
        let (_err_tx, err_rx) = mpsc::channel(1);
        for block in self.blocks.lock().expect("lock").drain(..) {
            block_tx.try_send(block).expect("test block buffer");
        }
        // Keep the sender alive so the worker idles instead of exiting.
        self.held_block_senders.lock().expect("lock").push(block_tx);
        Ok((block_rx, err_rx))
    }

    fn chain(&self) -> &Chain {
        &self.chain
    }

    fn close(&self) {}
}
