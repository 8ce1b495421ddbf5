//! Supported networks and their chain IDs.
//!
//! This module defines the EVM networks the monitor can follow. Every network
//! maps to a canonical numeric chain ID and a native currency symbol.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Supported EVM-compatible networks.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum mainnet (chain ID 1).
    #[serde(rename = "ethereum")]
    Ethereum,
    /// Ethereum Sepolia testnet (chain ID 11155111).
    #[serde(rename = "sepolia")]
    Sepolia,
    /// Polygon PoS mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Network::Ethereum => "ethereum",
            Network::Sepolia => "sepolia",
            Network::Polygon => "polygon",
            Network::Base => "base",
        };
        write!(f, "{name}")
    }
}

impl Network {
    /// Return the numeric chain ID associated with the network.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Sepolia => 11155111,
            Network::Polygon => 137,
            Network::Base => 8453,
        }
    }

    /// Ticker of the native currency.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Ethereum | Network::Sepolia | Network::Base => "ETH",
            Network::Polygon => "POL",
        }
    }

    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Ethereum,
            Network::Sepolia,
            Network::Polygon,
            Network::Base,
        ]
    }
}
