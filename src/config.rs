//! Configuration for the coordination service.
//!
//! A [`RpcConfig`] describes how a node joins its cluster and how patient
//! the execution engine is. Invalid transport configuration is a hard
//! startup failure: [`RpcConfig::validate`] runs when the service is
//! constructed and refuses to degrade silently.
//!
//! # Example
//!
//! ```rust
//! use conclave::config::RpcConfig;
//!
//! let config = RpcConfig {
//!     cluster_name: "cache-cluster".to_string(),
//!     bind_addr: "127.0.0.1:0".parse().unwrap(),
//!     seeds: vec!["10.0.0.1:7400".parse().unwrap()],
//!     ..RpcConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! [`RpcConfig::from_env`] reads the `CONCLAVE_*` variables below; unset
//! variables fall back to the defaults, unparseable ones are errors.
//!
//! - `CONCLAVE_CLUSTER_NAME`
//! - `CONCLAVE_BIND_ADDR`, `CONCLAVE_ADVERTISE_ADDR`
//! - `CONCLAVE_SEEDS` (comma-separated socket addresses)
//! - `CONCLAVE_DEFAULT_TIMEOUT_MS`, `CONCLAVE_RETRY_TIMEOUT_MS`
//! - `CONCLAVE_ALLOW_FAILOVER`
//! - `CONCLAVE_HEARTBEAT_INTERVAL_MS`, `CONCLAVE_FAILURE_THRESHOLD`

use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_CLUSTER_NAME, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RETRY_TIMEOUT, DEFAULT_STARTUP_GRACE_PERIOD,
};
use crate::error::{Result, RpcError};

/// Configuration of one service instance.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Name of the cluster this node belongs to. Nodes only accept
    /// membership traffic for their own cluster name.
    pub cluster_name: String,

    /// Address the transport listener binds to. Port 0 picks an ephemeral
    /// port; the actual bound address becomes the member address unless
    /// `advertise_addr` overrides it.
    pub bind_addr: SocketAddr,

    /// Address advertised to other members, when it differs from the bound
    /// address (NAT, containers).
    pub advertise_addr: Option<SocketAddr>,

    /// Addresses of existing members used to join the cluster. A node with
    /// no reachable seed forms a new singleton cluster and coordinates it.
    pub seeds: Vec<SocketAddr>,

    /// Bound applied to synchronous calls. A hard deadline for each call
    /// that asked to "wait for everyone".
    pub default_timeout: Duration,

    /// How long a coordinator-only call waits for a topology change before
    /// retrying against a new coordinator.
    pub retry_timeout: Duration,

    /// Whether a coordinator-only call transparently retries on the new
    /// coordinator when the old one left mid-call.
    pub allow_failover: bool,

    /// Interval between heartbeats sent to the coordinator.
    pub heartbeat_interval: Duration,

    /// Number of missed heartbeats before a member is declared failed.
    pub failure_threshold: u32,

    /// Grace period after a join before heartbeats are enforced.
    pub startup_grace_period: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            bind_addr: "127.0.0.1:0".parse().expect("static addr"),
            advertise_addr: None,
            seeds: Vec::new(),
            default_timeout: DEFAULT_CALL_TIMEOUT,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            allow_failover: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            startup_grace_period: DEFAULT_STARTUP_GRACE_PERIOD,
        }
    }
}

impl RpcConfig {
    /// Build a configuration from `CONCLAVE_*` environment variables.
    ///
    /// Unset variables keep their defaults; set-but-invalid values are
    /// configuration errors, not silent fallbacks.
    pub fn from_env() -> Result<Self> {
        let mut config = RpcConfig::default();

        if let Ok(name) = std::env::var("CONCLAVE_CLUSTER_NAME") {
            config.cluster_name = name;
        }
        if let Some(addr) = parse_env("CONCLAVE_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(addr) = parse_env("CONCLAVE_ADVERTISE_ADDR")? {
            config.advertise_addr = Some(addr);
        }
        if let Ok(seeds) = std::env::var("CONCLAVE_SEEDS") {
            config.seeds = seeds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<SocketAddr>().map_err(|e| {
                        RpcError::Config(format!("invalid seed address '{s}' in CONCLAVE_SEEDS: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(ms) = parse_env::<u64>("CONCLAVE_DEFAULT_TIMEOUT_MS")? {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("CONCLAVE_RETRY_TIMEOUT_MS")? {
            config.retry_timeout = Duration::from_millis(ms);
        }
        if let Some(allow) = parse_env::<bool>("CONCLAVE_ALLOW_FAILOVER")? {
            config.allow_failover = allow;
        }
        if let Some(ms) = parse_env::<u64>("CONCLAVE_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_env::<u32>("CONCLAVE_FAILURE_THRESHOLD")? {
            config.failure_threshold = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(RpcError::Config("cluster_name cannot be empty".to_string()));
        }
        if self.default_timeout.is_zero() {
            return Err(RpcError::Config(
                "default_timeout must be greater than zero".to_string(),
            ));
        }
        if self.retry_timeout.is_zero() {
            return Err(RpcError::Config(
                "retry_timeout must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(RpcError::Config(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(RpcError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The window of coordinator silence after which survivors react.
    pub(crate) fn failure_window(&self) -> Duration {
        self.heartbeat_interval * self.failure_threshold
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RpcError::Config(format!("invalid value '{raw}' for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RpcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_cluster_name_rejected() {
        let config = RpcConfig {
            cluster_name: "  ".to_string(),
            ..RpcConfig::default()
        };
        assert!(matches!(config.validate(), Err(RpcError::Config(_))));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let config = RpcConfig {
            default_timeout: Duration::ZERO,
            ..RpcConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RpcConfig {
            heartbeat_interval: Duration::ZERO,
            ..RpcConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let config = RpcConfig {
            failure_threshold: 0,
            ..RpcConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failure_window() {
        let config = RpcConfig {
            heartbeat_interval: Duration::from_millis(100),
            failure_threshold: 5,
            ..RpcConfig::default()
        };
        assert_eq!(config.failure_window(), Duration::from_millis(500));
    }
}
