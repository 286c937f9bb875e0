use async_trait::async_trait;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use eyre::{Result, eyre};
use serde_json::json;

use crate::{
    config::HealthConfig,
    core::{MountPoint, mount::ReadinessFn},
    ports::Middleware,
};

/// Answers readiness probes from the predicate the server installs on the
/// mount point.
#[derive(Debug, Clone)]
pub struct HealthMiddleware {
    path: String,
    manifest: String,
}

impl HealthMiddleware {
    pub fn new(path: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            manifest: manifest.into(),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.path.clone(), config.manifest.clone())
    }

    fn routes(&self, ready: ReadinessFn) -> Router {
        let manifest = self.manifest.clone();
        Router::new().route(
            &self.path,
            get(move || {
                let ready = ready();
                let manifest = manifest.clone();
                async move { health_response(ready, manifest) }
            }),
        )
    }
}

fn health_response(ready: bool, manifest: String) -> impl IntoResponse {
    if ready {
        (StatusCode::OK, Json(json!({ "data": manifest })))
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "data": "Application not ready" })),
        )
    }
}

#[async_trait]
impl Middleware for HealthMiddleware {
    fn name(&self) -> &str {
        "health"
    }

    async fn initialize(&self, mount: &MountPoint) -> Result<()> {
        let ready = mount
            .readiness()
            .ok_or_else(|| eyre!("No readiness predicate installed for {}", self.path))?;
        mount.mount(format!("health:{}", self.path), self.routes(ready));
        tracing::info!(path = %self.path, "Health endpoint mounted");
        Ok(())
    }
}
