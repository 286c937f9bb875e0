use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use reqwest::Client;

use crate::{
    config::models::ConnectorConfig,
    ports::connector::{Connector, ConnectorError},
};

/// Connector that checks an HTTP dependency once at startup.
///
/// Any response below 500 counts as reachable; the probe only guards against
/// dependencies that are down or failing.
#[derive(Debug, Clone)]
pub struct HttpProbeConnector {
    name: String,
    url: String,
    client: Client,
}

impl HttpProbeConnector {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Connector for HttpProbeConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        tracing::debug!(connector = %self.name, url = %self.url, "Probing dependency");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable {
                name: self.name.clone(),
                target: self.url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ConnectorError::Unhealthy {
                name: self.name.clone(),
                target: self.url.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        tracing::info!(connector = %self.name, status = status.as_u16(), "Dependency reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode, routing::get};

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_client_errors_count_as_reachable() {
        let base = serve(Router::new()).await;
        let probe = HttpProbeConnector::new("db-proxy", format!("{base}/missing"), Duration::from_secs(2));
        probe.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_fail_the_probe() {
        let base = serve(Router::new().route(
            "/ping",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let probe = HttpProbeConnector::new("pricing", format!("{base}/ping"), Duration::from_secs(2));

        let err = probe.initialize().await.unwrap_err();
        let err = err.downcast_ref::<ConnectorError>().unwrap();
        assert!(matches!(err, ConnectorError::Unhealthy { status: 503, .. }));
    }
}
