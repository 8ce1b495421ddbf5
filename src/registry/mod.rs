//! Thread-safe registries of monitored addresses and contract subscriptions.
//!
//! Registries are mutated only through the monitor's public methods; the
//! subscription workers are read-only consumers. Reads never suspend.

mod addresses;
mod contracts;

pub use addresses::AddressRegistry;
pub use contracts::{ContractRegistry, ContractSubscription};
