//! Registry of watched contracts and their event subscriptions.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::chain::{parse_address, to_lowercase_hex};
use crate::error::{Error, Result};
use crate::network::Network;

/// A watched contract: its address, the event signatures followed on it, and
/// the cancellation handle covering its background workers.
///
/// The record never stores an empty event set; removing the last event removes
/// the record.
#[derive(Debug, Clone)]
pub struct ContractSubscription {
    chain: Network,
    address: String,
    events: HashSet<String>,
    cancel: CancellationToken,
}

impl ContractSubscription {
    pub fn chain(&self) -> Network {
        self.chain
    }

    /// Lowercase contract address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Canonical event signatures followed on this contract.
    pub fn events(&self) -> &HashSet<String> {
        &self.events
    }

    /// Cancellation handle covering every worker spawned for this contract.
    /// Worker tasks observe child tokens of it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Thread-safe map of `network → contract address → subscription`.
#[derive(Debug, Default)]
pub struct ContractRegistry {
    inner: RwLock<HashMap<Network, HashMap<String, ContractSubscription>>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current subscription for `address`, if any.
    pub fn get(&self, network: Network, address: &str) -> Option<ContractSubscription> {
        let key = address.to_ascii_lowercase();
        let inner = self.inner.read().expect("contract registry lock poisoned");
        inner.get(&network)?.get(&key).cloned()
    }

    /// Create or extend the subscription for `address` with `events`.
    ///
    /// Events merge into an existing record; the stored cancellation handle is
    /// preserved across upserts. An empty event set is rejected with
    /// `INVALID_INPUT`.
    pub fn upsert(
        &self,
        network: Network,
        address: &str,
        events: impl IntoIterator<Item = String>,
    ) -> Result<ContractSubscription> {
        let events: HashSet<String> = events.into_iter().collect();
        if events.is_empty() {
            return Err(Error::invalid_input("contract subscription requires at least one event"));
        }
        let key = to_lowercase_hex(&parse_address(address)?);

        let mut inner = self.inner.write().expect("contract registry lock poisoned");
        let per_chain = inner.entry(network).or_default();
        let sub = match per_chain.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().events.extend(events);
                existing.get().clone()
            }
            Entry::Vacant(slot) => slot
                .insert(ContractSubscription {
                    chain: network,
                    address: key,
                    events,
                    cancel: CancellationToken::new(),
                })
                .clone(),
        };
        Ok(sub)
    }

    /// Remove the subscription for `address`, invoking its cancel handle.
    pub fn remove(&self, network: Network, address: &str) -> Option<ContractSubscription> {
        let key = address.to_ascii_lowercase();
        let mut inner = self.inner.write().expect("contract registry lock poisoned");
        let per_chain = inner.get_mut(&network)?;
        let sub = per_chain.remove(&key)?;
        if per_chain.is_empty() {
            inner.remove(&network);
        }
        sub.cancel.cancel();
        Some(sub)
    }

    /// Stop following one event on `address`. Removing the last event removes
    /// (and cancels) the whole subscription.
    pub fn remove_event(&self, network: Network, address: &str, event: &str) -> Option<ContractSubscription> {
        let key = address.to_ascii_lowercase();
        let mut inner = self.inner.write().expect("contract registry lock poisoned");
        let per_chain = inner.get_mut(&network)?;
        let sub = per_chain.get_mut(&key)?;
        sub.events.remove(event);
        if sub.events.is_empty() {
            let sub = per_chain.remove(&key).expect("present under write lock");
            if per_chain.is_empty() {
                inner.remove(&network);
            }
            sub.cancel.cancel();
            Some(sub)
        } else {
            Some(sub.clone())
        }
    }

    /// All subscriptions on `network`.
    pub fn list_for_chain(&self, network: Network) -> Vec<ContractSubscription> {
        let inner = self.inner.read().expect("contract registry lock poisoned");
        inner
            .get(&network)
            .map(|per_chain| per_chain.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `event` is followed on `address`.
    pub fn has_event(&self, network: Network, address: &str, event: &str) -> bool {
        let key = address.to_ascii_lowercase();
        let inner = self.inner.read().expect("contract registry lock poisoned");
        inner
            .get(&network)
            .and_then(|per_chain| per_chain.get(&key))
            .is_some_and(|sub| sub.events.contains(event))
    }

    /// Cancel every stored handle and clear the registry in one critical
    /// section.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.write().expect("contract registry lock poisoned");
        for (_, per_chain) in inner.drain() {
            for (_, sub) in per_chain {
                sub.cancel.cancel();
            }
        }
    }
}
