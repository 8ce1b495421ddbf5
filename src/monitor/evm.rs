//! EVM implementation of the [`Monitor`] capability interface.
//!
//! One header-following worker filters block transactions through the address
//! registry; one worker per (contract, event) pair follows that event's log
//! subscription with independent backoff state. Workers are terminated through
//! cancellation, never by closing channels under them.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cancel::linked_token;
use crate::chain::{parse_address, to_lowercase_hex};
use crate::client::Client;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::registry::{AddressRegistry, ContractRegistry, ContractSubscription};
use crate::topics::EventSignature;
use crate::types::{Block, Transaction};

use super::handlers::{EventHandler, HandlerContext, default_handlers};
use super::{EVENT_BUFFER, Monitor};

/// How long a producer waits on the output channel before dropping.
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-chain event fan-out over a shared [`Client`].
pub struct EvmMonitor {
    client: Arc<dyn Client>,
    addresses: Arc<AddressRegistry>,
    contracts: Arc<ContractRegistry>,
    handlers: Arc<HashMap<String, Arc<dyn EventHandler>>>,
    events_tx: Mutex<Option<mpsc::Sender<Transaction>>>,
    events_rx: Mutex<Option<mpsc::Receiver<Transaction>>>,
    runtime: Mutex<Option<CancellationToken>>,
    stopped: AtomicBool,
    dropped: Arc<AtomicU64>,
}

impl EvmMonitor {
    /// Monitor with the default handler table (ERC-20 Transfer + MultiSig
    /// family).
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self::with_handlers(client, default_handlers())
    }

    pub(crate) fn with_handlers(
        client: Arc<dyn Client>,
        handlers: HashMap<String, Arc<dyn EventHandler>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            client,
            addresses: Arc::new(AddressRegistry::new()),
            contracts: Arc::new(ContractRegistry::new()),
            handlers: Arc::new(handlers),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            runtime: Mutex::new(None),
            stopped: AtomicBool::new(false),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn network(&self) -> Network {
        self.client.chain().network
    }

    fn handler_context(&self) -> Option<HandlerContext> {
        let events_tx = self.events_tx.lock().expect("events lock poisoned").clone()?;
        Some(HandlerContext {
            client: self.client.clone(),
            addresses: self.addresses.clone(),
            events_tx,
            dropped: self.dropped.clone(),
        })
    }

    fn running_token(&self) -> Option<CancellationToken> {
        self.runtime.lock().expect("runtime lock poisoned").clone()
    }

    /// Spawn one worker per event signature in `events` for `sub`'s contract.
    fn spawn_event_workers(
        &self,
        parent: &CancellationToken,
        sub: &ContractSubscription,
        events: impl IntoIterator<Item = String>,
    ) {
        let contract = match parse_address(sub.address()) {
            Ok(address) => address,
            Err(err) => {
                tracing::error!(contract = sub.address(), error = %err, "unparseable contract address in registry");
                return;
            }
        };
        for event in events {
            let Some(cx) = self.handler_context() else { return };
            let token = linked_token(&[parent, sub.cancel_token()]);
            let client = self.client.clone();
            let contracts = self.contracts.clone();
            let handlers = self.handlers.clone();
            tokio::spawn(async move {
                run_event_worker(client, contracts, handlers, cx, contract, event, token).await;
            });
        }
    }

    fn spawn_header_worker(&self, token: CancellationToken) {
        let Some(cx) = self.handler_context() else { return };
        let client = self.client.clone();
        let network = self.network();
        tokio::spawn(async move {
            run_header_worker(client, network, cx, token).await;
        });
    }
}

#[async_trait::async_trait]
impl Monitor for EvmMonitor {
    fn transaction_events(&self) -> Option<mpsc::Receiver<Transaction>> {
        self.events_rx.lock().expect("events lock poisoned").take()
    }

    async fn monitor_address(&self, address: &str) -> Result<()> {
        self.addresses.add(self.network(), address)
    }

    async fn unmonitor_address(&self, address: &str) -> Result<()> {
        self.addresses.remove(self.network(), address)
    }

    async fn monitor_contract(&self, address: &str, events: &[String]) -> Result<()> {
        if events.is_empty() {
            return Err(Error::invalid_input("at least one event signature is required"));
        }
        let canonical: Vec<String> = events
            .iter()
            .map(|raw| EventSignature::parse(raw).map(|sig| sig.canonical().to_owned()))
            .collect::<Result<_>>()?;

        let network = self.network();
        let previous = self
            .contracts
            .get(network, address)
            .map(|sub| sub.events().clone())
            .unwrap_or_default();
        let sub = self.contracts.upsert(network, address, canonical)?;

        // A running monitor picks new events up immediately; otherwise the
        // subscription waits for start.
        if let Some(parent) = self.running_token() {
            let fresh: Vec<String> = sub
                .events()
                .iter()
                .filter(|event| !previous.contains(*event))
                .cloned()
                .collect();
            self.spawn_event_workers(&parent, &sub, fresh);
        }
        Ok(())
    }

    async fn unmonitor_contract(&self, address: &str) -> Result<()> {
        if self.contracts.remove(self.network(), address).is_none() {
            tracing::debug!(contract = address, "unmonitor of unknown contract is a no-op");
        }
        Ok(())
    }

    async fn subscribe_to_transaction_events(&self, cancel: CancellationToken) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::invalid_input("monitor has been stopped"));
        }
        let parent = {
            let mut runtime = self.runtime.lock().expect("runtime lock poisoned");
            if runtime.is_some() {
                tracing::warn!(network = %self.network(), "monitor already started");
                return Ok(());
            }
            let parent = cancel.child_token();
            *runtime = Some(parent.clone());
            parent
        };

        self.spawn_header_worker(parent.child_token());
        for sub in self.contracts.list_for_chain(self.network()) {
            let events: Vec<String> = sub.events().iter().cloned().collect();
            self.spawn_event_workers(&parent, &sub, events);
        }
        tracing::info!(network = %self.network(), "monitor started");
        Ok(())
    }

    async fn unsubscribe_from_transaction_events(&self) {
        let token = self.runtime.lock().expect("runtime lock poisoned").take();
        self.contracts.cancel_all();
        if let Some(token) = token {
            token.cancel();
        }
        self.stopped.store(true, Ordering::SeqCst);
        // The output channel closes once the last in-flight worker sender
        // drops; a second stop finds nothing left to do.
        drop(self.events_tx.lock().expect("events lock poisoned").take());
        tracing::info!(network = %self.network(), "monitor stopped");
    }

    fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_event_worker(
    client: Arc<dyn Client>,
    contracts: Arc<ContractRegistry>,
    handlers: Arc<HashMap<String, Arc<dyn EventHandler>>>,
    cx: HandlerContext,
    contract: alloy::primitives::Address,
    event: String,
    token: CancellationToken,
) {
    let (mut logs, mut errs) = match client
        .subscribe_contract_logs(&[contract], &event, &[], None, token.clone())
        .await
    {
        Ok(channels) => channels,
        Err(err) => {
            tracing::error!(contract = %contract, event, error = %err, "failed to open log subscription");
            return;
        }
    };

    let mut errs_open = true;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            maybe_log = logs.recv() => match maybe_log {
                Some(log) => dispatch_log(&log, &event, &contracts, &handlers, &cx).await,
                None => break,
            },
            maybe_err = errs.recv(), if errs_open => match maybe_err {
                Some(err) => {
                    tracing::warn!(contract = %contract, event, error = %err, "log subscription error");
                }
                None => errs_open = false,
            },
        }
    }
    tracing::debug!(contract = %contract, event, "contract event worker stopped");
}

/// Route one log through the handler table. Handler failures and panics drop
/// the log, never the worker.
async fn dispatch_log(
    log: &crate::types::Log,
    event: &str,
    contracts: &ContractRegistry,
    handlers: &HashMap<String, Arc<dyn EventHandler>>,
    cx: &HandlerContext,
) {
    if log.topics.is_empty() {
        tracing::warn!(contract = %log.address, "log without topics, dropping");
        return;
    }
    let contract = to_lowercase_hex(&log.address);
    if !contracts.has_event(log.chain, &contract, event) {
        tracing::debug!(contract, event, "event no longer subscribed, dropping log");
        return;
    }
    match handlers.get(event) {
        Some(handler) => match AssertUnwindSafe(handler.handle(log, cx)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(contract, event, error = %err, "event handler failed, dropping log");
            }
            Err(_) => {
                cx.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(contract, event, "event handler panicked, dropping log");
            }
        },
        None => {
            tracing::debug!(contract, event, "no handler registered, dropping log");
        }
    }
}

async fn run_header_worker(
    client: Arc<dyn Client>,
    network: Network,
    cx: HandlerContext,
    token: CancellationToken,
) {
    let (mut blocks, mut errs) = match client.subscribe_new_heads(token.clone()).await {
        Ok(channels) => channels,
        Err(err) => {
            tracing::error!(network = %network, error = %err, "failed to open new-heads subscription");
            return;
        }
    };

    let mut errs_open = true;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            maybe_block = blocks.recv() => match maybe_block {
                Some(block) => filter_block(block, network, &cx).await,
                None => break,
            },
            maybe_err = errs.recv(), if errs_open => match maybe_err {
                Some(err) => tracing::warn!(network = %network, error = %err, "new-heads subscription error"),
                None => errs_open = false,
            },
        }
    }
    tracing::debug!(network = %network, "header worker stopped");
}

/// Emit the block's transactions that touch a monitored account, stamping the
/// block timestamp onto them.
async fn filter_block(block: Block, network: Network, cx: &HandlerContext) {
    let timestamp = block.timestamp as i64;
    let Some(transactions) = block.transactions else {
        tracing::debug!(number = block.number, "header-only block, nothing to filter");
        return;
    };
    for mut tx in transactions {
        if !cx.addresses.is_any_monitored(network, &[tx.from, tx.to]) {
            continue;
        }
        if tx.timestamp == 0 {
            tx.timestamp = timestamp;
        }
        cx.emit(tx).await;
    }
}
