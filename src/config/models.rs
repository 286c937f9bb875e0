//! Configuration data structures for Ceres.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They
//! include defaults so that minimal configs stay short. Durations are written in
//! humantime notation (`"1s"`, `"250ms"`, `"2m"`).
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

fn default_tcp_nodelay() -> bool {
    true
}

fn default_fetch_timeout() -> String {
    "30s".to_string()
}

fn default_connector_timeout_secs() -> u64 {
    5
}

/// Backoff policy for remote schema recovery.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Multiplier applied to the wait after each failed attempt
    pub factor: f64,
    /// Wait after the first failed attempt
    pub min_timeout: String,
    /// Retries after the first attempt
    pub retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            factor: 2.0,
            min_timeout: "1s".to_string(),
            retries: 5,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Result<RetryPolicy> {
        let min_timeout = humantime::parse_duration(&self.min_timeout)
            .with_context(|| format!("Invalid retry.min_timeout '{}'", self.min_timeout))?;
        Ok(RetryPolicy::new(self.factor, min_timeout, self.retries))
    }
}

/// A GraphQL endpoint mounted on the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GraphQLMountConfig {
    /// Mount path, e.g. `/graphql`
    pub path: String,
    /// Remote services stitched into this endpoint, in merge order
    #[serde(default)]
    pub remote_schema_urls: Vec<String>,
}

/// Readiness endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub path: String,
    /// Returned as `data` when the application is ready
    pub manifest: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            manifest: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// A dependency probed once before middleware starts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectorConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_connector_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Deadline for each introspection or version lookup; `"0s"` disables it
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: String,
    #[serde(default)]
    pub graphql: Vec<GraphQLMountConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Parsed fetch deadline. `None` when disabled.
    pub fn fetch_timeout(&self) -> Result<Option<Duration>> {
        let timeout = humantime::parse_duration(&self.fetch_timeout)
            .with_context(|| format!("Invalid fetch_timeout '{}'", self.fetch_timeout))?;
        Ok((!timeout.is_zero()).then_some(timeout))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4000".to_string(),
            tcp_nodelay: true,
            retry: RetryConfig::default(),
            fetch_timeout: default_fetch_timeout(),
            graphql: Vec::new(),
            health: HealthConfig::default(),
            connectors: Vec::new(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    tcp_nodelay: Option<bool>,
    retry: Option<RetryConfig>,
    fetch_timeout: Option<String>,
    graphql: Vec<GraphQLMountConfig>,
    health: Option<HealthConfig>,
    connectors: Vec<ConnectorConfig>,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = Some(enabled);
        self
    }

    /// Set the retry policy for remote schemas
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn fetch_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.fetch_timeout = Some(timeout.into());
        self
    }

    /// Mount a GraphQL endpoint stitching the given remotes
    pub fn graphql<I, S>(mut self, path: impl Into<String>, remote_schema_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graphql.push(GraphQLMountConfig {
            path: path.into(),
            remote_schema_urls: remote_schema_urls.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Set health endpoint configuration
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.health = Some(config);
        self
    }

    pub fn connector(mut self, config: ConnectorConfig) -> Self {
        self.connectors.push(config);
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> Result<ServerConfig, String> {
        let listen_addr = self
            .listen_addr
            .ok_or_else(|| "listen_addr is required".to_string())?;

        if self.graphql.is_empty() {
            return Err("At least one GraphQL endpoint must be configured".to_string());
        }

        Ok(ServerConfig {
            listen_addr,
            tcp_nodelay: self.tcp_nodelay.unwrap_or(true),
            retry: self.retry.unwrap_or_default(),
            fetch_timeout: self.fetch_timeout.unwrap_or_else(default_fetch_timeout),
            graphql: self.graphql,
            health: self.health.unwrap_or_default(),
            connectors: self.connectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_defaults() {
        let config = ServerConfig::builder()
            .listen_addr("0.0.0.0:4000")
            .graphql("/graphql", ["http://offers:4001/graphql"])
            .build()
            .unwrap();

        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.fetch_timeout().unwrap(), Some(Duration::from_secs(30)));
        assert_eq!(config.health.path, "/health");
        assert_eq!(config.graphql[0].remote_schema_urls.len(), 1);
    }

    #[test]
    fn test_builder_requires_a_graphql_mount() {
        let err = ServerConfig::builder()
            .listen_addr("0.0.0.0:4000")
            .build()
            .unwrap_err();
        assert!(err.contains("GraphQL"));
    }

    #[test]
    fn test_zero_fetch_timeout_disables_deadline() {
        let config = ServerConfig {
            fetch_timeout: "0s".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.fetch_timeout().unwrap(), None);
    }

    #[test]
    fn test_retry_policy_parsing() {
        let retry = RetryConfig {
            factor: 3.0,
            min_timeout: "250ms".to_string(),
            retries: 2,
        };
        let policy = retry.policy().unwrap();
        assert_eq!(policy.min_timeout, Duration::from_millis(250));
        assert_eq!(policy.max_attempts(), 3);

        let bad = RetryConfig {
            min_timeout: "soon".to_string(),
            ..RetryConfig::default()
        };
        assert!(bad.policy().is_err());
    }
}
