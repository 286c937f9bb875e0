use async_trait::async_trait;
use eyre::Result;
use thiserror::Error;

/// Custom error type for connector startup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectorError {
    /// Error when the dependency cannot be reached
    #[error("Connector '{name}' could not reach {target}: {message}")]
    Unreachable {
        name: String,
        target: String,
        message: String,
    },

    /// Error when the dependency answers but reports a failure
    #[error("Connector '{name}' got an unhealthy response from {target}: status {status}")]
    Unhealthy {
        name: String,
        target: String,
        status: u16,
    },
}

/// Connector defines the port for external dependencies that must be ready
/// before any middleware starts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Establish the connection. All connectors initialize in parallel.
    async fn initialize(&self) -> Result<()>;
}
