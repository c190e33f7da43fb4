use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConnectionConfig {
    pub database_url: String,
    pub rpc_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_bind_addr: String,
    pub default_network_id: u64,
    pub networks: HashMap<u64, NetworkConnectionConfig>,
    pub cache_max_entries: usize,
    pub cache_sweep_interval: Duration,
    pub query_timeout: Duration,
    pub context_timeout: Duration,
    pub max_requests_per_sec: u32,
    pub generator: Option<GeneratorConfig>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: String, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_bind_addr = get("HTTP_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let default_network_id = parse_number(&vars, "DEFAULT_NETWORK_ID", 1)?;

        let mut networks = parse_network_overrides(&vars)?;
        let default_entry = networks
            .entry(default_network_id)
            .or_insert_with(|| NetworkConnectionConfig {
                database_url: get("DATABASE_URL")
                    .unwrap_or_else(|| "sqlite://data/chain.db".to_string()),
                rpc_url: None,
            });
        if default_entry.rpc_url.is_none() {
            default_entry.rpc_url = get("ETH_RPC_URL");
        }

        let generator = get("LLM_API_URL").map(|api_url| GeneratorConfig {
            api_url,
            api_key: get("LLM_API_KEY"),
            model: get("LLM_MODEL").unwrap_or_else(|| "default".to_string()),
        });

        Ok(Self {
            http_bind_addr,
            default_network_id,
            networks,
            cache_max_entries: parse_narrow(&vars, "CACHE_MAX_ENTRIES", 1000)?,
            cache_sweep_interval: Duration::from_secs(parse_number(&vars, "CACHE_SWEEP_SECS", 600)?),
            query_timeout: Duration::from_millis(parse_number(&vars, "QUERY_TIMEOUT_MS", 3000)?),
            context_timeout: Duration::from_millis(parse_number(&vars, "CONTEXT_TIMEOUT_MS", 2000)?),
            max_requests_per_sec: parse_narrow(&vars, "MAX_REQUESTS_PER_SEC", 50)?,
            generator,
        })
    }
}

fn parse_number(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::InvalidNumber {
                var: key.to_string(),
                value: raw.to_string(),
            }),
    }
}

/// Like [`parse_number`], rejecting values the target type cannot hold.
fn parse_narrow<T: TryFrom<u64>>(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<T, ConfigError> {
    let n = parse_number(vars, key, default)?;
    T::try_from(n).map_err(|_| ConfigError::InvalidNumber {
        var: key.to_string(),
        value: n.to_string(),
    })
}

/// Collects `NETWORK_<ID>_DATABASE_URL` / `NETWORK_<ID>_RPC_URL` pairs.
/// An RPC url without a database url is ignored.
fn parse_network_overrides(
    vars: &HashMap<String, String>,
) -> Result<HashMap<u64, NetworkConnectionConfig>, ConfigError> {
    let mut networks = HashMap::new();
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix("NETWORK_") else {
            continue;
        };
        let Some(id_raw) = rest.strip_suffix("_DATABASE_URL") else {
            continue;
        };
        let id = id_raw.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
            var: key.clone(),
            value: id_raw.to_string(),
        })?;
        let rpc_url = vars
            .get(&format!("NETWORK_{}_RPC_URL", id))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        networks.insert(
            id,
            NetworkConnectionConfig {
                database_url: value.trim().to_string(),
                rpc_url,
            },
        );
    }
    Ok(networks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_bind_default_network_to_database_url() {
        let config = Config::from_vars(vars(&[("DATABASE_URL", "sqlite://tmp/a.db")])).unwrap();
        assert_eq!(config.default_network_id, 1);
        assert_eq!(config.networks[&1].database_url, "sqlite://tmp/a.db");
        assert_eq!(config.cache_max_entries, 1000);
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(600));
        assert_eq!(config.query_timeout, Duration::from_millis(3000));
        assert!(config.generator.is_none());
    }

    #[test]
    fn per_network_overrides_are_collected() {
        let config = Config::from_vars(vars(&[
            ("NETWORK_137_DATABASE_URL", "sqlite://tmp/polygon.db"),
            ("NETWORK_137_RPC_URL", "http://localhost:8545"),
            ("NETWORK_10_RPC_URL", "http://ignored"),
            ("ETH_RPC_URL", "http://mainnet"),
        ]))
        .unwrap();
        assert_eq!(
            config.networks[&137].rpc_url.as_deref(),
            Some("http://localhost:8545")
        );
        assert!(!config.networks.contains_key(&10));
        assert_eq!(config.networks[&1].rpc_url.as_deref(), Some("http://mainnet"));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = Config::from_vars(vars(&[("CACHE_MAX_ENTRIES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("CACHE_MAX_ENTRIES"));
        assert!(Config::from_vars(vars(&[("QUERY_TIMEOUT_MS", "0")])).is_err());
    }

    #[test]
    fn rejects_values_beyond_the_target_width() {
        let err = Config::from_vars(vars(&[("MAX_REQUESTS_PER_SEC", "4294967296")])).unwrap_err();
        assert!(err.to_string().contains("MAX_REQUESTS_PER_SEC"));
        let config = Config::from_vars(vars(&[("MAX_REQUESTS_PER_SEC", "4294967295")])).unwrap();
        assert_eq!(config.max_requests_per_sec, u32::MAX);
    }
}
