//! Supported networks and the per-network connection handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::config::NetworkConnectionConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::eth::EthClient;
use crate::models::NetworkIdentity;
use crate::storage::{self, DbPool};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub const NETWORKS: &[NetworkIdentity] = &[
    NetworkIdentity {
        id: 1,
        display_name: "Ethereum Mainnet",
        native_currency_symbol: "ETH",
        decimals: 18,
        is_testnet: false,
    },
    NetworkIdentity {
        id: 10,
        display_name: "OP Mainnet",
        native_currency_symbol: "ETH",
        decimals: 18,
        is_testnet: false,
    },
    NetworkIdentity {
        id: 137,
        display_name: "Polygon",
        native_currency_symbol: "POL",
        decimals: 18,
        is_testnet: false,
    },
    NetworkIdentity {
        id: 8453,
        display_name: "Base",
        native_currency_symbol: "ETH",
        decimals: 18,
        is_testnet: false,
    },
    NetworkIdentity {
        id: 42161,
        display_name: "Arbitrum One",
        native_currency_symbol: "ETH",
        decimals: 18,
        is_testnet: false,
    },
    NetworkIdentity {
        id: 11155111,
        display_name: "Sepolia",
        native_currency_symbol: "ETH",
        decimals: 18,
        is_testnet: true,
    },
];

#[derive(Debug, Clone, Copy)]
pub struct ChainRegistry {
    networks: &'static [NetworkIdentity],
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self { networks: NETWORKS }
    }
}

impl ChainRegistry {
    pub fn lookup(&self, network_id: u64) -> Option<NetworkIdentity> {
        self.networks.iter().find(|n| n.id == network_id).copied()
    }

    pub fn require(&self, network_id: u64) -> PipelineResult<NetworkIdentity> {
        self.lookup(network_id)
            .ok_or(PipelineError::UnsupportedNetwork(network_id))
    }

    pub fn all(&self) -> &'static [NetworkIdentity] {
        self.networks
    }
}

/// The query client (relational store) and data client (JSON-RPC node) for
/// one network. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub network: NetworkIdentity,
    pub query: DbPool,
    pub data: Option<EthClient>,
}

/// Lazily creates one handle per network id and hands out clones afterwards.
pub struct ConnectionRegistry {
    chains: ChainRegistry,
    configs: HashMap<u64, NetworkConnectionConfig>,
    handles: Mutex<HashMap<u64, Arc<OnceCell<ConnectionHandle>>>>,
}

impl ConnectionRegistry {
    pub fn new(chains: ChainRegistry, configs: HashMap<u64, NetworkConnectionConfig>) -> Self {
        Self {
            chains,
            configs,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(&self, network_id: u64) -> PipelineResult<ConnectionHandle> {
        let network = self.chains.require(network_id)?;
        let config = self
            .configs
            .get(&network_id)
            .ok_or(PipelineError::MissingConnectionConfig(network_id))?;

        // The map lock covers the slot lookup only. Creation is serialized
        // per network by its cell, so a slow network never stalls the others.
        let slot = self
            .handles
            .lock()
            .await
            .entry(network_id)
            .or_default()
            .clone();
        let handle = slot.get_or_try_init(|| connect(network, config)).await?;
        Ok(handle.clone())
    }
}

async fn connect(
    network: NetworkIdentity,
    config: &NetworkConnectionConfig,
) -> PipelineResult<ConnectionHandle> {
    let query = storage::init_pool(&config.database_url).await?;
    let data = match config.rpc_url.as_deref() {
        Some(url) => Some(EthClient::new(url)?),
        None => None,
    };

    let handle = ConnectionHandle {
        network,
        query,
        data,
    };
    tokio::join!(probe_query(&handle), probe_data(&handle));
    Ok(handle)
}

/// One-off liveness checks on a freshly created handle. Failures are logged
/// and otherwise ignored.
async fn probe_query(handle: &ConnectionHandle) {
    let name = handle.network.display_name;
    match tokio::time::timeout(PROBE_TIMEOUT, storage::ping(&handle.query)).await {
        Ok(Ok(())) => info!(network = name, "query client reachable"),
        Ok(Err(err)) => warn!(network = name, error = %err, "query client probe failed"),
        Err(_) => warn!(network = name, "query client probe timed out"),
    }
}

async fn probe_data(handle: &ConnectionHandle) {
    let name = handle.network.display_name;
    let Some(data) = &handle.data else {
        return;
    };
    match tokio::time::timeout(PROBE_TIMEOUT, data.chain_id()).await {
        Ok(Ok(chain_id)) if chain_id == handle.network.id => {
            info!(network = name, chain_id, "data client reachable")
        }
        Ok(Ok(chain_id)) => warn!(
            network = name,
            expected = handle.network.id,
            chain_id,
            "data client reports a different chain id"
        ),
        Ok(Err(err)) => warn!(network = name, error = %err, "data client probe failed"),
        Err(_) => warn!(network = name, "data client probe timed out"),
    }
}
