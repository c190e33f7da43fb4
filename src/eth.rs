use anyhow::{Context, Result};
use ethers_providers::{Http, Middleware, Provider};
use url::Url;

use crate::numeric::u256_to_u64_saturating;

/// JSON-RPC client used as a network's data client: liveness probes and
/// chain-head lookups for indexing-lag estimates.
#[derive(Clone, Debug)]
pub struct EthClient {
    provider: Provider<Http>,
}

impl EthClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(rpc_url).with_context(|| format!("invalid rpc url {}", rpc_url))?;
        let transport = Http::new_with_client(url, client);
        let provider = Provider::new(transport);
        Ok(Self { provider })
    }

    pub async fn chain_head(&self) -> Result<u64> {
        let latest = self
            .provider
            .get_block_number()
            .await
            .context("failed to fetch latest block number")?;
        Ok(latest.as_u64())
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let id = self
            .provider
            .get_chainid()
            .await
            .context("failed to fetch chain id")?;
        Ok(u256_to_u64_saturating(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_url() {
        assert!(EthClient::new("not a url").is_err());
    }

    #[test]
    fn accepts_http_url_without_connecting() {
        assert!(EthClient::new("http://127.0.0.1:8545").is_ok());
    }
}
