//! Runtime-extensible route table shared by the server and its middleware.
//!
//! The listener is bound before middleware runs, so routes mounted during
//! startup must become reachable without restarting it. The mount point keeps
//! the current [`Router`] behind an [`ArcSwap`]; the service handed to the
//! listener loads the latest router on every request.
//!
//! Routes are registered under a key. Mounting the same key again replaces the
//! earlier routes, so middleware can be initialized again after a restart.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

use arc_swap::ArcSwap;
use axum::{Router, extract::Request, response::Response};
use tower::ServiceExt;

/// Readiness predicate installed by the server and read by health checks.
pub type ReadinessFn = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub struct MountPoint {
    mounted: Arc<Mutex<BTreeMap<String, Router>>>,
    router: Arc<ArcSwap<Router>>,
    readiness: Arc<RwLock<Option<ReadinessFn>>>,
}

impl Default for MountPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MountPoint {
    pub fn new() -> Self {
        Self {
            mounted: Arc::new(Mutex::new(BTreeMap::new())),
            router: Arc::new(ArcSwap::from_pointee(Router::new())),
            readiness: Arc::new(RwLock::new(None)),
        }
    }

    /// Register `routes` under `key` and publish the rebuilt route table.
    ///
    /// Overlapping paths under different keys panic inside axum;
    /// configuration validation rejects duplicate mount paths before they get
    /// here.
    pub fn mount(&self, key: impl Into<String>, routes: Router) {
        let mut mounted = match self.mounted.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if mounted.insert(key.into(), routes).is_some() {
            tracing::debug!("Replaced previously mounted routes");
        }
        let table = mounted
            .values()
            .cloned()
            .fold(Router::new(), |table, routes| table.merge(routes));
        self.router.store(Arc::new(table));
    }

    pub fn set_readiness<F>(&self, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let mut slot = match self.readiness.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(predicate));
    }

    pub fn readiness(&self) -> Option<ReadinessFn> {
        match self.readiness.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// A router that forwards every request to whatever is mounted at the
    /// time the request arrives.
    pub fn service(&self) -> Router {
        let table = self.router.clone();
        Router::new().fallback(move |request: Request| {
            let router = table.load_full();
            async move { dispatch(router, request).await }
        })
    }
}

async fn dispatch(router: Arc<Router>, request: Request) -> Response {
    match Router::clone(&router).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode, routing::get};

    use super::*;

    fn get_request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_routes_mounted_later_are_served() {
        let mount = MountPoint::new();
        let app = mount.service();

        let response = app.clone().oneshot(get_request("/late")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        mount.mount("late", Router::new().route("/late", get(|| async { "here" })));

        let response = app.oneshot(get_request("/late")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mounts_accumulate() {
        let mount = MountPoint::new();
        mount.mount("a", Router::new().route("/a", get(|| async { "a" })));
        mount.mount("b", Router::new().route("/b", get(|| async { "b" })));

        for path in ["/a", "/b"] {
            let response = mount.service().oneshot(get_request(path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn test_mounting_a_key_again_replaces_its_routes() {
        let mount = MountPoint::new();
        mount.mount("health", Router::new().route("/health", get(|| async { "first" })));
        mount.mount("health", Router::new().route("/health", get(|| async { "second" })));

        let response = mount.service().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"second");
    }

    #[test]
    fn test_readiness_predicate_roundtrip() {
        let mount = MountPoint::new();
        assert!(mount.readiness().is_none());

        mount.set_readiness(|| true);
        let ready = mount.readiness().unwrap();
        assert!(ready());
    }
}
