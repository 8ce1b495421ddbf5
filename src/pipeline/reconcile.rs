//! Periodic reconciliation of non-terminal transaction statuses.
//!
//! Every tick the poller loads transactions still in `Pending` or `Mined`,
//! buckets them by chain, asks that chain's explorer for the authoritative
//! status, and applies status-only updates for the ones that moved. Per-item
//! failures are logged and skipped; a cycle always completes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::network::Network;
use crate::ports::{Explorer, Repository, TransactionFilter};
use crate::types::Transaction;

/// Default reconciliation interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Status reconciliation poller.
pub struct ReconciliationPoller {
    repository: Arc<dyn Repository>,
    explorers: HashMap<Network, Arc<dyn Explorer>>,
    interval: Duration,
}

impl ReconciliationPoller {
    pub fn new(
        repository: Arc<dyn Repository>,
        explorers: HashMap<Network, Arc<dyn Explorer>>,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            explorers,
            interval,
        }
    }

    /// Run until cancelled, reconciling once per interval tick.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_s = self.interval.as_secs(), "reconciliation poller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            self.reconcile_once(&cancel).await;
        }
        tracing::info!("reconciliation poller stopped");
    }

    /// One reconciliation cycle.
    pub async fn reconcile_once(&self, cancel: &CancellationToken) {
        let filter = TransactionFilter::non_terminal();
        let page = match self.repository.list(&filter, 0, None).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list non-terminal transactions");
                return;
            }
        };

        let mut buckets: BTreeMap<Network, Vec<Transaction>> = BTreeMap::new();
        for tx in page.items {
            buckets.entry(tx.chain).or_default().push(tx);
        }

        for (network, transactions) in buckets {
            if cancel.is_cancelled() {
                return;
            }
            let Some(explorer) = self.explorers.get(&network) else {
                tracing::debug!(network = %network, "no explorer configured, skipping bucket");
                continue;
            };
            for tx in transactions {
                match explorer.transaction_by_hash(tx.hash).await {
                    Ok(fresh) => {
                        let mut probe = tx.clone();
                        if fresh.status != tx.status && probe.advance_status(fresh.status) {
                            if let Err(err) = self
                                .repository
                                .update_transaction_status(tx.hash, fresh.status)
                                .await
                            {
                                tracing::warn!(tx = %tx.hash, error = %err, "status update failed");
                            } else {
                                tracing::debug!(
                                    tx = %tx.hash,
                                    from = %tx.status,
                                    to = %fresh.status,
                                    "reconciled transaction status"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(tx = %tx.hash, error = %err, "explorer lookup failed, skipping");
                    }
                }
            }
        }
    }
}
