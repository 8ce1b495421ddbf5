//! The transaction pipeline above the monitor: enrichment, reconciliation,
//! and historical backfill.

mod history;
mod reconcile;
mod transform;

pub use history::{DEFAULT_SYNC_INTERVAL, HISTORY_PAGE_SIZE, HistoryService};
pub use reconcile::{DEFAULT_POLL_INTERVAL, ReconciliationPoller};
pub use transform::{
    InputDataTransformer, ReceiptTransformer, TokenMetadataTransformer, Transformer,
    TransformerChain, TypedDecodeTransformer, register_core_transformers,
};
