//! Chain descriptors and EVM address handling.
//!
//! A [`Chain`] bundles the per-network parameters the rest of the crate needs
//! (chain ID, endpoints, key family). [`ChainAddress`] is a validated account
//! address bound to its network: equality and all registry lookups use the
//! lowercase form, the EIP-55 checksum form is retained for display.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::BlockchainConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::network::Network;

/// Elliptic curve family used for account keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    #[serde(rename = "secp256k1")]
    Secp256k1,
}

/// Signing scheme used on top of the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    #[serde(rename = "ecdsa")]
    Ecdsa,
}

/// Immutable per-chain parameters.
///
/// Constructed once from configuration; the factory holds at most one per
/// [`Network`].
#[derive(Debug, Clone)]
pub struct Chain {
    /// Numeric chain ID used in transactions and upstream verification.
    pub id: u64,
    /// The network this descriptor belongs to.
    pub network: Network,
    /// Human-readable network name.
    pub name: String,
    /// Ticker of the native currency.
    pub native_symbol: String,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Block-explorer endpoint, when configured.
    pub explorer_url: Option<Url>,
    /// Key curve for accounts on this chain.
    pub curve: Curve,
    /// Signing scheme for accounts on this chain.
    pub key_kind: KeyKind,
}

impl Chain {
    /// Build a descriptor for `network` from its configuration section.
    ///
    /// Fails fast with [`ErrorCode::InvalidBlockchainConfig`] when the RPC URL
    /// is missing or unparseable.
    pub fn new(network: Network, config: &BlockchainConfig) -> Result<Self> {
        if config.rpc_url.trim().is_empty() {
            return Err(Error::new(
                ErrorCode::InvalidBlockchainConfig,
                format!("no RPC URL configured for {network}"),
            ));
        }
        let rpc_url = Url::parse(&config.rpc_url).map_err(|e| {
            Error::new(
                ErrorCode::InvalidBlockchainConfig,
                format!("invalid RPC URL for {network}: {e}"),
            )
        })?;
        let explorer_url = match config.explorer_url.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(Url::parse(raw).map_err(|e| {
                Error::new(
                    ErrorCode::InvalidBlockchainConfig,
                    format!("invalid explorer URL for {network}: {e}"),
                )
            })?),
        };
        Ok(Self {
            id: network.chain_id(),
            network,
            name: network.to_string(),
            native_symbol: network.native_symbol().to_owned(),
            rpc_url,
            explorer_url,
            curve: Curve::Secp256k1,
            key_kind: KeyKind::Ecdsa,
        })
    }

    /// Validate that `hex` is a well-formed account address for this chain
    /// family (EVM: exactly 20 bytes, `0x` + 40 hex chars).
    pub fn validate_address(&self, hex: &str) -> Result<()> {
        parse_address(hex).map(|_| ())
    }
}

/// Parse a hex account address, accepting any case.
pub(crate) fn parse_address(hex: &str) -> Result<Address> {
    let trimmed = hex.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_input("empty address"));
    }
    Address::from_str(trimmed).map_err(|e| Error::invalid_address(trimmed).with_source(e))
}

/// Lowercase `0x…` form of an address, the canonical key for registries.
pub(crate) fn to_lowercase_hex(address: &Address) -> String {
    format!("{address:#x}")
}

/// A validated account address bound to a network.
///
/// Two addresses are equal iff their network and raw bytes match, regardless
/// of the case they were written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainAddress {
    network: Network,
    address: Address,
}

impl ChainAddress {
    /// Parse and validate `hex` for `network`.
    ///
    /// No partially constructed address ever escapes: a wrong byte length or
    /// malformed hex yields [`ErrorCode::InvalidAddress`].
    pub fn new(network: Network, hex: &str) -> Result<Self> {
        Ok(Self {
            network,
            address: parse_address(hex)?,
        })
    }

    /// The network this address belongs to.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The raw 20-byte address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Lowercase `0x…` form, used for equality and storage.
    pub fn lowercase(&self) -> String {
        to_lowercase_hex(&self.address)
    }

    /// EIP-55 checksum form, used for display.
    pub fn checksum(&self) -> String {
        self.address.to_checksum(None)
    }
}

impl Display for ChainAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.checksum())
    }
}
