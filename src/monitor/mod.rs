//! Per-chain transaction and event monitoring.
//!
//! A [`Monitor`] fans one chain's block and log subscriptions out through the
//! address and contract registries and emits matching transactions on a
//! buffered channel. Producers never block: under buffer pressure items are
//! dropped with a warning.

mod evm;
mod handlers;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::Transaction;

pub use evm::EvmMonitor;

/// Capacity of the monitor's transaction output channel.
pub const EVENT_BUFFER: usize = 100;

/// Operations a chain monitor exposes.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Claim the transaction output channel.
    ///
    /// The channel is single-consumer: the first call returns it, every later
    /// call returns `None`.
    fn transaction_events(&self) -> Option<mpsc::Receiver<Transaction>>;

    /// Watch an externally-owned account. Transactions touching it as sender
    /// or recipient are emitted.
    async fn monitor_address(&self, address: &str) -> Result<()>;

    /// Stop watching an account.
    async fn unmonitor_address(&self, address: &str) -> Result<()>;

    /// Watch contract events on `address`. At least one event signature is
    /// required; signatures may be given in full or canonical form.
    ///
    /// When the monitor is already running, workers for newly added events
    /// start immediately; otherwise the subscription waits for
    /// [`Monitor::subscribe_to_transaction_events`].
    async fn monitor_contract(&self, address: &str, events: &[String]) -> Result<()>;

    /// Drop the contract subscription for `address`, cancelling its workers.
    async fn unmonitor_contract(&self, address: &str) -> Result<()>;

    /// Start the monitor: spawns the header worker and one worker per
    /// (contract, event) pair currently registered.
    async fn subscribe_to_transaction_events(&self, cancel: CancellationToken) -> Result<()>;

    /// Stop the monitor: cancels every worker and closes the output channel
    /// once in-flight producers finish. Idempotent.
    async fn unsubscribe_from_transaction_events(&self);

    /// Events dropped at worker boundaries (full buffers, panicking
    /// handlers) since the monitor started.
    fn dropped_events(&self) -> u64;
}

impl std::fmt::Debug for dyn Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Monitor").field("dropped_events", &self.dropped_events()).finish()
    }
}
