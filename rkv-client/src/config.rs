//! # Client Configuration
//!
//! Purpose: Describe the endpoint (`network` + `address`) and the pool/buffer
//! tuning knobs, validated once at construction.
//!
//! ## Design Principles
//! 1. **Validate Early**: Bad network kinds or empty addresses fail before any dial.
//! 2. **Immutable Values**: Configs are plain data; the client copies what it needs.
//! 3. **Serde-Friendly**: Configs can be loaded from any serde format.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Default number of idle connections kept by the pool.
pub const DEFAULT_MAX_IDLE: usize = 10;

/// Default read buffer size requested per response.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

const DEFAULT_PORT: u16 = 6379;

/// Transport used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// TCP, address is `host:port`.
    Tcp,
    /// Unix domain socket, address is a filesystem path.
    Unix,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Unix => "unix",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(ClientError::InvalidConfig(format!(
                "unsupported network: {}",
                other
            ))),
        }
    }
}

/// Server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub network: Network,
    pub address: String,
}

impl Config {
    /// Builds and validates an endpoint from a network name and address.
    pub fn new(network: &str, address: impl Into<String>) -> ClientResult<Self> {
        let config = Config {
            network: network.parse()?,
            address: address.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// TCP endpoint shorthand.
    pub fn tcp(address: impl Into<String>) -> ClientResult<Self> {
        Self::new("tcp", address)
    }

    /// Checks the endpoint. The network kind is already constrained by its
    /// type, so only the address is left to inspect.
    pub fn validate(&self) -> ClientResult<()> {
        if self.address.trim().is_empty() {
            return Err(ClientError::InvalidConfig(format!(
                "empty {} address",
                self.network
            )));
        }
        Ok(())
    }

    /// Parses a connection string.
    ///
    /// `tcp://host[:port]` and `redis://host[:port]` map to [`Network::Tcp`]
    /// (port defaults to 6379); `unix:///path/to.sock` maps to
    /// [`Network::Unix`] with the path as address.
    pub fn parse_url(s: &str) -> ClientResult<Self> {
        let url = url::Url::parse(s)
            .map_err(|err| ClientError::InvalidConfig(format!("{}: {}", s, err)))?;

        let config = match url.scheme() {
            "tcp" | "redis" => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| ClientError::InvalidConfig(format!("{}: missing host", s)))?;
                Config {
                    network: Network::Tcp,
                    address: format!("{}:{}", host, url.port().unwrap_or(DEFAULT_PORT)),
                }
            }
            "unix" => Config {
                network: Network::Unix,
                address: url.path().to_string(),
            },
            other => {
                return Err(ClientError::InvalidConfig(format!(
                    "unsupported network: {}",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for the client and its pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint.
    pub endpoint: Config,
    /// Maximum idle connections kept in the pool.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// Dial `max_idle` connections while constructing the client.
    #[serde(default = "default_prefill")]
    pub prefill: bool,
    /// Optional connect timeout applied to every dial.
    #[serde(default)]
    pub connect_timeout: Option<Duration>,
    /// Read buffer size requested for each response.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl ClientConfig {
    /// Default tuning for the given endpoint.
    pub fn new(endpoint: Config) -> Self {
        ClientConfig {
            endpoint,
            max_idle: DEFAULT_MAX_IDLE,
            prefill: true,
            connect_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        self.endpoint.validate()?;
        if self.max_idle == 0 {
            return Err(ClientError::InvalidConfig("max_idle must be positive".into()));
        }
        if self.read_buffer_size < 16 {
            return Err(ClientError::InvalidConfig(format!(
                "read_buffer_size {} is too small",
                self.read_buffer_size
            )));
        }
        Ok(())
    }
}

fn default_max_idle() -> usize {
    DEFAULT_MAX_IDLE
}

fn default_prefill() -> bool {
    true
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_network() {
        let err = Config::new("udp", "127.0.0.1:6379").unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
        assert!(err.to_string().contains("unsupported network: udp"));
    }

    #[test]
    fn rejects_empty_address() {
        assert!(Config::new("tcp", " ").is_err());
    }

    #[test]
    fn parses_tcp_url() {
        let config = Config::parse_url("tcp://10.0.0.7:7000").unwrap();
        assert_eq!(config.network, Network::Tcp);
        assert_eq!(config.address, "10.0.0.7:7000");
    }

    #[test]
    fn parses_redis_url_with_default_port() {
        let config = Config::parse_url("redis://cache.local").unwrap();
        assert_eq!(config.network, Network::Tcp);
        assert_eq!(config.address, "cache.local:6379");
    }

    #[test]
    fn parses_unix_url() {
        let config = Config::parse_url("unix:///var/run/kv.sock").unwrap();
        assert_eq!(config.network, Network::Unix);
        assert_eq!(config.address, "/var/run/kv.sock");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Config::parse_url("http://localhost:80").is_err());
        assert!(Config::parse_url("not a url").is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{"endpoint":{"network":"unix","address":"/tmp/kv.sock"}}"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.endpoint.network, Network::Unix);
        assert_eq!(config.max_idle, DEFAULT_MAX_IDLE);
        assert!(config.prefill);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_rejects_unknown_network() {
        let json = r#"{"network":"udp","address":"x"}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }
}
