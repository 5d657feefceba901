//! Scheduler configuration.
//!
//! Durations are stored as integers (`*_ms`, `*_secs`) so the whole struct
//! round-trips through JSON or TOML unchanged. Accessor methods return
//! [`Duration`]s.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// RPC endpoint for one supported chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoint {
    pub rpc_url: String,
}

/// Configuration for a [`Manager`](crate::Manager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Chain ID → endpoint. Chains that fail to connect at startup are skipped.
    pub chains: BTreeMap<String, ChainEndpoint>,
    /// Upper bound on concurrently registered workers.
    pub max_workers: usize,
    /// Interval between polls of a worker's trigger chain.
    pub poll_interval_ms: u64,
    /// Number of blocks behind the head a block must be to be processed.
    pub confirmations: u64,
    /// TTL of the cached current block number per chain.
    pub block_cache_ttl_secs: u64,
    /// TTL of the `(job, tx_hash, log_index)` duplicate-suppression key.
    pub duplicate_event_window_secs: u64,
    /// Per-call bound on chain RPC requests.
    pub rpc_timeout_ms: u64,
    /// How long `stop` waits for in-flight worker ticks to finish.
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chains: BTreeMap::new(),
            max_workers: 100,
            poll_interval_ms: 10_000,
            confirmations: 3,
            block_cache_ttl_secs: 120,
            duplicate_event_window_secs: 30,
            rpc_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Build a config from the process environment. Unset variables keep
    /// their defaults.
    ///
    /// | Variable | Format |
    /// |---|---|
    /// | `CHAIN_RPC_URLS` | `chain=url,chain=url` |
    /// | `MAX_WORKERS` | integer |
    /// | `POLL_INTERVAL_SECS` | integer |
    /// | `BLOCK_CONFIRMATIONS` | integer |
    /// | `RPC_TIMEOUT_SECS` | integer |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("CHAIN_RPC_URLS") {
            config.chains = parse_chain_urls(&raw)?;
        }
        if let Some(v) = lookup("MAX_WORKERS") {
            config.max_workers = parse_number("MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("POLL_INTERVAL_SECS") {
            config.poll_interval_ms = parse_secs_as_ms("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("BLOCK_CONFIRMATIONS") {
            config.confirmations = parse_number("BLOCK_CONFIRMATIONS", &v)?;
        }
        if let Some(v) = lookup("RPC_TIMEOUT_SECS") {
            config.rpc_timeout_ms = parse_secs_as_ms("RPC_TIMEOUT_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be non-zero".into()));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn block_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.block_cache_ttl_secs)
    }

    pub fn duplicate_event_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_event_window_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_secs_as_ms(key: &str, value: &str) -> Result<u64, ConfigError> {
    parse_number::<u64>(key, value)?
        .checked_mul(1000)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_chain_urls(raw: &str) -> Result<BTreeMap<String, ChainEndpoint>, ConfigError> {
    let mut chains = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (chain_id, url) = entry
            .split_once('=')
            .map(|(c, u)| (c.trim(), u.trim()))
            .filter(|(c, u)| !c.is_empty() && !u.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "CHAIN_RPC_URLS".into(),
                value: entry.to_string(),
            })?;
        chains.insert(
            chain_id.to_string(),
            ChainEndpoint {
                rpc_url: url.to_string(),
            },
        );
    }
    Ok(chains)
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Fluent builder for [`SchedulerConfig`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn chain(mut self, chain_id: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        self.config.chains.insert(
            chain_id.into(),
            ChainEndpoint {
                rpc_url: rpc_url.into(),
            },
        );
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn confirmations(mut self, n: u64) -> Self {
        self.config.confirmations = n;
        self
    }

    pub fn block_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.block_cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn duplicate_event_window(mut self, window: Duration) -> Self {
        self.config.duplicate_event_window_secs = window.as_secs();
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_workers, 100);
        assert_eq!(config.confirmations, 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.block_cache_ttl(), Duration::from_secs(120));
        assert_eq!(config.duplicate_event_window(), Duration::from_secs(30));
    }

    #[test]
    fn from_lookup_parses_chains_and_numbers() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            (
                "CHAIN_RPC_URLS",
                "11155111=https://sepolia.example, 84532 = https://base.example ,",
            ),
            ("MAX_WORKERS", "8"),
            ("POLL_INTERVAL_SECS", "2"),
            ("BLOCK_CONFIRMATIONS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains["84532"].rpc_url, "https://base.example");
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.confirmations, 5);
        assert_eq!(config.rpc_timeout_ms, 30_000);
    }

    #[test]
    fn from_lookup_rejects_bad_values() {
        let err = SchedulerConfig::from_lookup(lookup(&[("MAX_WORKERS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAX_WORKERS"));

        let err =
            SchedulerConfig::from_lookup(lookup(&[("CHAIN_RPC_URLS", "1=http://a,broken")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = SchedulerConfig::from_lookup(lookup(&[("MAX_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SchedulerConfig::from_lookup(lookup(&[(
            "POLL_INTERVAL_SECS",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "POLL_INTERVAL_SECS"));

        let err = SchedulerConfig::from_lookup(lookup(&[("RPC_TIMEOUT_SECS", "18446744073709552")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RPC_TIMEOUT_SECS"));
    }

    #[test]
    fn builder_overrides() {
        let config = SchedulerConfig::builder()
            .chain("1", "http://localhost:8545")
            .max_workers(2)
            .poll_interval(Duration::from_millis(500))
            .confirmations(0)
            .build();
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.confirmations, 0);
        assert!(config.validate().is_ok());
    }
}
