//! Lazy per-chain construction of clients and monitors.
//!
//! The factory is the sole owner of client and monitor singletons: at most one
//! of each per network, created on first use and retained for the process
//! lifetime. Construction goes through a pluggable connector so deployments
//! (and tests) can substitute the transport.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::chain::Chain;
use crate::client::{Client, EvmClient};
use crate::config::Config;
use crate::error::{Error, ErrorCode, Result};
use crate::monitor::{EvmMonitor, Monitor};
use crate::network::Network;

/// Builds a [`Client`] for a chain descriptor.
pub type ClientConnector =
    dyn Fn(Chain) -> BoxFuture<'static, Result<Arc<dyn Client>>> + Send + Sync;

/// Memoizing factory for per-chain [`Client`] and [`Monitor`] singletons.
pub struct Factory {
    chains: HashMap<Network, Chain>,
    connector: Box<ClientConnector>,
    clients: RwLock<HashMap<Network, Arc<dyn Client>>>,
    monitors: RwLock<HashMap<Network, Arc<dyn Monitor>>>,
}

impl Factory {
    /// Factory over the configured networks, connecting real RPC transports.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_connector(
            config,
            Box::new(|chain| {
                Box::pin(async move {
                    let client = EvmClient::connect(chain).await?;
                    Ok(Arc::new(client) as Arc<dyn Client>)
                })
            }),
        )
    }

    /// Factory with a custom transport connector.
    pub fn with_connector(config: &Config, connector: Box<ClientConnector>) -> Result<Self> {
        let mut chains = HashMap::new();
        for (network, section) in &config.blockchain {
            chains.insert(*network, Chain::new(*network, section)?);
        }
        Ok(Self {
            chains,
            connector,
            clients: RwLock::new(HashMap::new()),
            monitors: RwLock::new(HashMap::new()),
        })
    }

    /// Descriptor for `network`, or [`ErrorCode::ChainNotSupported`].
    pub fn chain(&self, network: Network) -> Result<&Chain> {
        self.chains.get(&network).ok_or_else(|| {
            Error::new(
                ErrorCode::ChainNotSupported,
                format!("chain {network} is not configured"),
            )
        })
    }

    /// The client for `network`, constructing and memoizing it on first use.
    pub async fn client(&self, network: Network) -> Result<Arc<dyn Client>> {
        if let Some(client) = self.clients.read().await.get(&network) {
            return Ok(client.clone());
        }
        // Exclusive lock across the memoization gap; re-check before building.
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(&network) {
            return Ok(client.clone());
        }
        let chain = self.chain(network)?.clone();
        let client = (self.connector)(chain).await?;
        clients.insert(network, client.clone());
        tracing::info!(network = %network, "constructed chain client");
        Ok(client)
    }

    /// The monitor for `network`, constructing and memoizing it on first use.
    pub async fn monitor(&self, network: Network) -> Result<Arc<dyn Monitor>> {
        if let Some(monitor) = self.monitors.read().await.get(&network) {
            return Ok(monitor.clone());
        }
        let client = self.client(network).await?;
        let mut monitors = self.monitors.write().await;
        if let Some(monitor) = monitors.get(&network) {
            return Ok(monitor.clone());
        }
        let monitor: Arc<dyn Monitor> = Arc::new(EvmMonitor::new(client));
        monitors.insert(network, monitor.clone());
        tracing::info!(network = %network, "constructed chain monitor");
        Ok(monitor)
    }
}
