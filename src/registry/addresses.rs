//! Registry of monitored externally-owned accounts.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use alloy::primitives::Address;

use crate::chain::{parse_address, to_lowercase_hex};
use crate::error::{Error, Result};
use crate::network::Network;

/// Thread-safe set of monitored account addresses, keyed by network.
///
/// Addresses are canonicalized on entry, so membership checks are independent
/// of the case callers write addresses in. Safe under concurrent readers and
/// writers; lookups take the shared lock only across the map probe.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    inner: RwLock<HashMap<Network, HashSet<Address>>>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring `address` on `network`.
    ///
    /// Re-adding a monitored address is a no-op, not an error.
    pub fn add(&self, network: Network, address: &str) -> Result<()> {
        let address = validated(address)?;
        let mut inner = self.inner.write().expect("address registry lock poisoned");
        inner.entry(network).or_default().insert(address);
        Ok(())
    }

    /// Stop monitoring `address` on `network`. Unknown addresses are a no-op.
    pub fn remove(&self, network: Network, address: &str) -> Result<()> {
        let address = validated(address)?;
        let mut inner = self.inner.write().expect("address registry lock poisoned");
        if let Some(set) = inner.get_mut(&network) {
            set.remove(&address);
            if set.is_empty() {
                inner.remove(&network);
            }
        }
        Ok(())
    }

    /// Whether any of `candidates` is monitored on `network`.
    ///
    /// Short-circuits on the first hit; `None` entries (e.g. the missing `to`
    /// of a deployment) never match.
    pub fn is_any_monitored(&self, network: Network, candidates: &[Option<Address>]) -> bool {
        let inner = self.inner.read().expect("address registry lock poisoned");
        let Some(set) = inner.get(&network) else {
            return false;
        };
        candidates
            .iter()
            .flatten()
            .any(|candidate| set.contains(candidate))
    }

    /// Monitored addresses on `network`, in lowercase hex, sorted.
    pub fn list(&self, network: Network) -> Vec<String> {
        let inner = self.inner.read().expect("address registry lock poisoned");
        let mut addresses: Vec<String> = inner
            .get(&network)
            .map(|set| set.iter().map(to_lowercase_hex).collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }
}

fn validated(address: &str) -> Result<Address> {
    if address.trim().is_empty() {
        return Err(Error::invalid_input("no address given"));
    }
    parse_address(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const VITALIK: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

    fn parsed(hex: &str) -> Option<Address> {
        Some(parse_address(hex).expect("test address"))
    }

    #[test]
    fn monitoring_is_case_independent() {
        let registry = AddressRegistry::new();
        registry
            .add(Network::Ethereum, &VITALIK.to_uppercase().replace("0X", "0x"))
            .expect("add");
        assert!(registry.is_any_monitored(Network::Ethereum, &[parsed(VITALIK)]));
        assert_eq!(registry.list(Network::Ethereum), vec![VITALIK.to_owned()]);
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let registry = AddressRegistry::new();
        registry.add(Network::Ethereum, VITALIK).expect("first add");
        registry.add(Network::Ethereum, VITALIK).expect("second add");
        assert_eq!(registry.list(Network::Ethereum).len(), 1);
    }

    #[test]
    fn empty_address_is_invalid_input() {
        let registry = AddressRegistry::new();
        assert_eq!(
            registry.add(Network::Ethereum, "  ").unwrap_err().code(),
            ErrorCode::InvalidInput
        );
        assert_eq!(
            registry.remove(Network::Ethereum, "").unwrap_err().code(),
            ErrorCode::InvalidInput
        );
    }

    #[test]
    fn malformed_address_is_rejected() {
        let registry = AddressRegistry::new();
        let err = registry.add(Network::Ethereum, "0x1234").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAddress);
    }

    #[test]
    fn networks_are_isolated() {
        let registry = AddressRegistry::new();
        registry.add(Network::Ethereum, VITALIK).expect("add");
        assert!(!registry.is_any_monitored(Network::Polygon, &[parsed(VITALIK)]));
    }

    #[test]
    fn remove_clears_membership() {
        let registry = AddressRegistry::new();
        registry.add(Network::Base, VITALIK).expect("add");
        registry.remove(Network::Base, VITALIK).expect("remove");
        assert!(!registry.is_any_monitored(Network::Base, &[parsed(VITALIK)]));
        assert!(registry.list(Network::Base).is_empty());
    }

    #[test]
    fn none_candidates_never_match() {
        let registry = AddressRegistry::new();
        registry.add(Network::Ethereum, VITALIK).expect("add");
        assert!(!registry.is_any_monitored(Network::Ethereum, &[None, None]));
        assert!(registry.is_any_monitored(Network::Ethereum, &[None, parsed(VITALIK)]));
    }
}
