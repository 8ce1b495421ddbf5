//! Configuration surface for the monitor and pipeline.
//!
//! Recognized options only:
//!
//! - `blockchain.<network>.rpcUrl` — required JSON-RPC endpoint per network
//! - `blockchain.<network>.explorerUrl` — optional explorer endpoint
//! - `transaction.historySyncIntervalSeconds` — default 300
//! - `transaction.updateIntervalSeconds` — default 60
//!
//! String values may reference environment variables as `$VAR` or `${VAR}`;
//! references are resolved during deserialization.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, ErrorCode, Result};
use crate::network::Network;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Per-network endpoints, keyed by network name.
    #[serde(default)]
    pub blockchain: BTreeMap<Network, BlockchainConfig>,
    /// Pipeline scheduling knobs.
    #[serde(default)]
    pub transaction: TransactionConfig,
}

impl Config {
    /// Parse a configuration document from JSON.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::new(ErrorCode::Configuration, format!("invalid configuration: {e}")))
    }

    /// Configuration section for `network`, or [`ErrorCode::ChainNotSupported`]
    /// when the network has no entry.
    pub fn blockchain(&self, network: Network) -> Result<&BlockchainConfig> {
        self.blockchain.get(&network).ok_or_else(|| {
            Error::new(
                ErrorCode::ChainNotSupported,
                format!("no blockchain configuration for {network}"),
            )
        })
    }
}

/// Endpoints for a single network.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint. `ws(s)://` endpoints enable subscriptions.
    #[serde(rename = "rpcUrl", deserialize_with = "env_string")]
    pub rpc_url: String,
    /// Block-explorer endpoint used by the reconciliation and backfill
    /// collaborators.
    #[serde(rename = "explorerUrl", default, deserialize_with = "opt_env_string")]
    pub explorer_url: Option<String>,
}

/// Scheduling configuration for the transaction pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    /// Seconds between historical backfill sync cycles.
    #[serde(
        rename = "historySyncIntervalSeconds",
        default = "config_defaults::history_sync_interval_seconds"
    )]
    pub history_sync_interval_seconds: u64,
    /// Seconds between reconciliation poller ticks.
    #[serde(
        rename = "updateIntervalSeconds",
        default = "config_defaults::update_interval_seconds"
    )]
    pub update_interval_seconds: u64,
}

impl TransactionConfig {
    /// Backfill interval as a [`Duration`].
    pub fn history_sync_interval(&self) -> Duration {
        Duration::from_secs(self.history_sync_interval_seconds)
    }

    /// Reconciliation interval as a [`Duration`].
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            history_sync_interval_seconds: config_defaults::history_sync_interval_seconds(),
            update_interval_seconds: config_defaults::update_interval_seconds(),
        }
    }
}

mod config_defaults {
    pub fn history_sync_interval_seconds() -> u64 {
        300
    }

    pub fn update_interval_seconds() -> u64 {
        60
    }
}

/// Resolve `$VAR` / `${VAR}` references against the process environment.
fn resolve_env_reference(raw: &str) -> std::result::Result<String, String> {
    let var_name = if raw.starts_with("${") && raw.ends_with('}') {
        Some(&raw[2..raw.len() - 1])
    } else if let Some(rest) = raw.strip_prefix('$') {
        rest.chars()
            .all(|c| c.is_alphanumeric() || c == '_')
            .then_some(rest)
    } else {
        None
    };
    match var_name {
        Some(name) if !name.is_empty() => std::env::var(name)
            .map_err(|_| format!("environment variable {name:?} not found (referenced as {raw:?})")),
        _ => Ok(raw.to_owned()),
    }
}

fn env_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    resolve_env_reference(&raw).map_err(serde::de::Error::custom)
}

fn opt_env_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => resolve_env_reference(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
