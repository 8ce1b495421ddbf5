//! Multi-chain EVM event monitoring and transaction pipeline.
//!
//! `chainwatch` maintains long-lived subscriptions to block headers and
//! contract event logs on EVM-compatible networks, filters the stream against
//! a dynamically updated set of watched accounts and contract/event pairs,
//! resolves observations into fully populated transaction records, enriches
//! them, and reconciles them against a durable store whose records may still
//! change status.
//!
//! # Architecture
//!
//! - [`client`] — the [`Client`](client::Client) capability interface over one
//!   JSON-RPC endpoint, including the reconnecting subscription engine with
//!   exponential backoff and gap recovery.
//! - [`monitor`] — the per-chain [`Monitor`](monitor::Monitor): address and
//!   contract registries, a header-following worker, and per-(contract, event)
//!   log workers dispatching through a handler table.
//! - [`factory`] — lazy construction and memoization of one client and one
//!   monitor per network.
//! - [`pipeline`] — the transformer chain, the reconciliation poller, and the
//!   historical backfill service.
//! - [`ports`] — contracts of the external collaborators (repository, block
//!   explorer, token store, typed decoder).
//!
//! # Example
//!
//! ```ignore
//! use chainwatch::config::Config;
//! use chainwatch::factory::Factory;
//! use chainwatch::monitor::Monitor;
//! use chainwatch::network::Network;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_json_str(raw_config)?;
//! let factory = Factory::new(&config)?;
//! let monitor = factory.monitor(Network::Ethereum).await?;
//!
//! monitor.monitor_address("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").await?;
//! let mut events = monitor.transaction_events().expect("first claim");
//! monitor.subscribe_to_transaction_events(CancellationToken::new()).await?;
//!
//! while let Some(tx) = events.recv().await {
//!     println!("{} {} on {}", tx.tx_type, tx.hash, tx.chain);
//! }
//! ```
//!
//! # Delivery semantics
//!
//! Producers never block on consumers: output channels are bounded and drop
//! with a warning under sustained pressure. Subscription gaps across
//! reconnects are bounded by the last delivered block. Consumers must be
//! idempotent on transaction hash; the same transaction can surface through
//! the header path and the log path in either order.

mod cancel;

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod monitor;
pub mod network;
pub mod pipeline;
pub mod ports;
pub mod registry;
pub mod telemetry;
pub mod topics;
pub mod types;

pub use chain::{Chain, ChainAddress};
pub use error::{Error, ErrorCode, Result};
pub use network::Network;
pub use types::{Block, Log, Transaction, TransactionReceipt, TransactionStatus, TransactionType};
