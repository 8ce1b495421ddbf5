//! Historical transaction backfill.
//!
//! For every registered address the service periodically pulls history from
//! the chain's block explorer in two passes (native transactions, then ERC-20
//! transfers), runs each record through the transformer chain, upserts it into
//! the repository, and emits it on the history channel. The remembered start
//! block only ever advances, so completed ranges are not refetched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::chain::parse_address;
use crate::error::{Error, ErrorCode, Result};
use crate::network::Network;
use crate::ports::{Explorer, HistoryKind, HistoryOptions, Repository};
use crate::types::Transaction;

use super::transform::TransformerChain;

/// Explorer page size per backfill pass.
pub const HISTORY_PAGE_SIZE: usize = 10_000;

/// Default backfill interval.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Capacity of the history output channel.
const HISTORY_BUFFER: usize = 100;

const SEND_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct BackfillEntry {
    chain: Network,
    address: String,
    start_block: u64,
}

/// Per-address historical catch-up scheduler.
pub struct HistoryService {
    repository: Arc<dyn Repository>,
    explorers: HashMap<Network, Arc<dyn Explorer>>,
    transformers: Arc<TransformerChain>,
    interval: Duration,
    entries: DashMap<String, BackfillEntry>,
    history_tx: mpsc::Sender<Transaction>,
    history_rx: Mutex<Option<mpsc::Receiver<Transaction>>>,
}

impl HistoryService {
    pub fn new(
        repository: Arc<dyn Repository>,
        explorers: HashMap<Network, Arc<dyn Explorer>>,
        transformers: Arc<TransformerChain>,
        interval: Duration,
    ) -> Self {
        let (history_tx, history_rx) = mpsc::channel(HISTORY_BUFFER);
        Self {
            repository,
            explorers,
            transformers,
            interval,
            entries: DashMap::new(),
            history_tx,
            history_rx: Mutex::new(Some(history_rx)),
        }
    }

    /// Claim the history output channel. Single-consumer; later calls return
    /// `None`.
    pub fn history_events(&self) -> Option<mpsc::Receiver<Transaction>> {
        self.history_rx.lock().expect("history lock poisoned").take()
    }

    /// Register `address` for backfill from `start_block`. Re-registering
    /// keeps the more advanced start block.
    pub fn monitor_address(&self, chain: Network, address: &str, start_block: u64) -> Result<()> {
        let lowercase = crate::chain::to_lowercase_hex(&parse_address(address)?);
        if !self.explorers.contains_key(&chain) {
            return Err(Error::new(
                ErrorCode::ChainNotSupported,
                format!("no explorer configured for {chain}"),
            ));
        }
        let key = address_key(chain, &lowercase);
        self.entries
            .entry(key)
            .and_modify(|entry| entry.start_block = entry.start_block.max(start_block))
            .or_insert(BackfillEntry {
                chain,
                address: lowercase,
                start_block,
            });
        Ok(())
    }

    /// Drop `address` from the backfill schedule.
    pub fn unmonitor_address(&self, chain: Network, address: &str) -> Result<()> {
        let lowercase = crate::chain::to_lowercase_hex(&parse_address(address)?);
        self.entries.remove(&address_key(chain, &lowercase));
        Ok(())
    }

    /// Run an immediate sync, then repeat on the interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_s = self.interval.as_secs(), "history backfill started");
        self.sync_cycle(&cancel).await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            self.sync_cycle(&cancel).await;
        }
        tracing::info!("history backfill stopped");
    }

    /// One full sync over all registered addresses.
    pub async fn sync_cycle(&self, cancel: &CancellationToken) {
        let keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if cancel.is_cancelled() {
                return;
            }
            // Re-read per pass: the entry may have been unregistered or
            // advanced meanwhile. The map reference is not held across awaits.
            for kind in [HistoryKind::Normal, HistoryKind::Erc20] {
                let Some(entry) = self.entries.get(&key).map(|entry| entry.clone()) else {
                    break;
                };
                self.backfill_pass(&key, &entry, kind).await;
            }
        }
    }

    async fn backfill_pass(&self, key: &str, entry: &BackfillEntry, kind: HistoryKind) {
        let Some(explorer) = self.explorers.get(&entry.chain) else {
            tracing::debug!(chain = %entry.chain, "no explorer configured, skipping backfill");
            return;
        };
        let options = HistoryOptions {
            kind,
            start_block: Some(entry.start_block),
            limit: HISTORY_PAGE_SIZE,
        };
        let page = match explorer
            .transaction_history(&entry.address, &options, None)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(
                    address = %entry.address,
                    kind = ?kind,
                    error = %err,
                    "history fetch failed, skipping pass"
                );
                return;
            }
        };

        let mut last_block = None;
        for tx in page.items {
            let enriched = self.transformers.apply(tx).await;
            if let Err(err) = self.upsert(&enriched).await {
                tracing::warn!(tx = %enriched.hash, error = %err, "history upsert failed");
                continue;
            }
            last_block = enriched.block_number.or(last_block);
            if self
                .history_tx
                .send_timeout(enriched, SEND_TIMEOUT)
                .await
                .is_err()
            {
                tracing::warn!(address = %entry.address, "history channel full, dropping event");
            }
        }

        if let Some(block) = last_block {
            if let Some(mut entry) = self.entries.get_mut(key) {
                if block > entry.start_block {
                    entry.start_block = block;
                }
            }
        }
    }

    async fn upsert(&self, tx: &Transaction) -> Result<()> {
        match self.repository.get_by_hash(tx.hash).await {
            Ok(_) => self.repository.update(tx).await,
            Err(err) if err.is(ErrorCode::TransactionNotFound) => self.repository.create(tx).await,
            Err(err) => Err(err),
        }
    }
}

fn address_key(chain: Network, lowercase: &str) -> String {
    format!("{chain}:{lowercase}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::support::{MemoryRepository, StubExplorer, sample_tx};
    use crate::pipeline::transform::Transformer;
    use crate::types::TransactionStatus;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    const ADDRESS: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn service(
        repository: Arc<MemoryRepository>,
        explorer: Arc<StubExplorer>,
        transformers: Arc<TransformerChain>,
    ) -> HistoryService {
        HistoryService::new(
            repository,
            HashMap::from([(Network::Ethereum, explorer as Arc<dyn Explorer>)]),
            transformers,
            DEFAULT_SYNC_INTERVAL,
        )
    }

    fn tx_at_block(hash_byte: u8, block: u64) -> Transaction {
        let mut tx = sample_tx(hash_byte, TransactionStatus::Success);
        tx.block_number = Some(block);
        tx
    }

    #[tokio::test]
    async fn sync_runs_normal_then_erc20_and_advances_the_start_block() {
        let repository = Arc::new(MemoryRepository::default());
        let explorer = Arc::new(StubExplorer::default());
        explorer.stub_history(ADDRESS, "normal", vec![tx_at_block(1, 100), tx_at_block(2, 120)]);
        explorer.stub_history(ADDRESS, "erc20", vec![tx_at_block(3, 90)]);

        let service = service(repository.clone(), explorer.clone(), Arc::new(TransformerChain::new()));
        service
            .monitor_address(Network::Ethereum, ADDRESS, 50)
            .expect("monitor");
        let mut events = service.history_events().expect("receiver");

        service.sync_cycle(&CancellationToken::new()).await;

        // Both passes ran, in order, from the remembered start block.
        {
            let calls = explorer.history_calls.lock().expect("lock");
            assert_eq!(calls.len(), 2);
            assert_eq!(calls[0], (ADDRESS.to_owned(), "normal".to_owned(), Some(50)));
            // The ERC-20 pass sees the start block advanced by the normal pass.
            assert_eq!(calls[1], (ADDRESS.to_owned(), "erc20".to_owned(), Some(120)));
        }

        // All three records were created and emitted.
        assert_eq!(repository.creates.load(Ordering::SeqCst), 3);
        for _ in 0..3 {
            events.try_recv().expect("history event");
        }
        assert!(events.try_recv().is_err());

        // The start block never regresses below the furthest page seen.
        let entry = service.entries.iter().next().expect("entry");
        assert_eq!(entry.start_block, 120);
    }

    #[tokio::test]
    async fn known_transactions_are_updated_not_recreated() {
        let existing = tx_at_block(4, 80);
        let repository = Arc::new(MemoryRepository::with([existing.clone()]));
        let explorer = Arc::new(StubExplorer::default());
        explorer.stub_history(ADDRESS, "normal", vec![existing]);

        let service = service(repository.clone(), explorer, Arc::new(TransformerChain::new()));
        service
            .monitor_address(Network::Ethereum, ADDRESS, 0)
            .expect("monitor");
        service.sync_cycle(&CancellationToken::new()).await;

        assert_eq!(repository.creates.load(Ordering::SeqCst), 0);
        assert_eq!(repository.updates.load(Ordering::SeqCst), 1);
    }

    struct TaggingTransformer;

    #[async_trait]
    impl Transformer for TaggingTransformer {
        async fn transform(&self, tx: &mut Transaction) -> crate::error::Result<()> {
            tx.set_metadata("backfill.tagged", true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn records_pass_through_the_transformer_chain_before_persisting() {
        let repository = Arc::new(MemoryRepository::default());
        let explorer = Arc::new(StubExplorer::default());
        explorer.stub_history(ADDRESS, "normal", vec![tx_at_block(5, 60)]);

        let transformers = Arc::new(TransformerChain::new());
        transformers
            .register("10_tag", Arc::new(TaggingTransformer))
            .expect("register");

        let service = service(repository.clone(), explorer, transformers);
        service
            .monitor_address(Network::Ethereum, ADDRESS, 0)
            .expect("monitor");
        service.sync_cycle(&CancellationToken::new()).await;

        let stored = repository
            .transactions
            .lock()
            .expect("lock")
            .values()
            .next()
            .cloned()
            .expect("stored transaction");
        assert_eq!(
            stored.metadata.get("backfill.tagged").and_then(|v| v.as_bool()),
            Some(true)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_repeats_on_the_interval() {
        let repository = Arc::new(MemoryRepository::default());
        let explorer = Arc::new(StubExplorer::default());
        let service = Arc::new(service(
            repository,
            explorer.clone(),
            Arc::new(TransformerChain::new()),
        ));
        service
            .monitor_address(Network::Ethereum, ADDRESS, 0)
            .expect("monitor");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        // Immediate sync plus one interval tick; each cycle runs two passes.
        tokio::time::sleep(DEFAULT_SYNC_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(explorer.history_calls.lock().expect("lock").len(), 4);

        cancel.cancel();
        handle.await.expect("service exits");
    }

    #[tokio::test]
    async fn unmonitored_addresses_are_not_synced() {
        let repository = Arc::new(MemoryRepository::default());
        let explorer = Arc::new(StubExplorer::default());
        let service = service(repository, explorer.clone(), Arc::new(TransformerChain::new()));
        service
            .monitor_address(Network::Ethereum, ADDRESS, 0)
            .expect("monitor");
        service
            .unmonitor_address(Network::Ethereum, &ADDRESS.to_uppercase().replace("0X", "0x"))
            .expect("unmonitor");

        service.sync_cycle(&CancellationToken::new()).await;
        assert!(explorer.history_calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn unsupported_chains_are_rejected_at_registration() {
        let repository = Arc::new(MemoryRepository::default());
        let explorer = Arc::new(StubExplorer::default());
        let service = service(repository, explorer, Arc::new(TransformerChain::new()));
        let err = service
            .monitor_address(Network::Polygon, ADDRESS, 0)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChainNotSupported);
    }

    #[tokio::test]
    async fn reregistration_keeps_the_most_advanced_start_block() {
        let repository = Arc::new(MemoryRepository::default());
        let explorer = Arc::new(StubExplorer::default());
        let service = service(repository, explorer.clone(), Arc::new(TransformerChain::new()));

        service
            .monitor_address(Network::Ethereum, ADDRESS, 500)
            .expect("first");
        service
            .monitor_address(Network::Ethereum, ADDRESS, 100)
            .expect("second");

        service.sync_cycle(&CancellationToken::new()).await;
        let calls = explorer.history_calls.lock().expect("lock");
        assert_eq!(calls[0].2, Some(500));
    }
}
