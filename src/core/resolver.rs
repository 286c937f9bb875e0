//! Remote schema resolution for one mounted GraphQL endpoint.
//!
//! A resolver owns the cache of introspected remote schemas for its endpoint,
//! keyed by URL, and the retry loops that bring unavailable remotes back. After
//! every successful fetch the served schema is rebuilt from the local schema
//! and whatever remotes are resolved, then swapped in atomically. Remotes that
//! are down are left out of the merge and never block the endpoint.
//!
//! Progress is announced on the lifecycle bus: `REMOTE_SCHEMAS_FETCHING` when a
//! fetch begins and `REMOTE_SCHEMAS_FETCHED` once every configured remote is
//! resolved. The server derives readiness from these.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use eyre::{Result, WrapErr, eyre};
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;

use super::{
    lifecycle::{LifecycleBus, LifecycleEvent, LifecycleMessage},
    mount::MountPoint,
    retry::{RetryOperation, RetryOutcome, RetryPolicy},
};
use crate::{
    adapters::graphql_endpoint::{EndpointOptions, graphql_router},
    ports::{Middleware, SchemaFetcher},
    schema::{ExecutableSchema, RemoteSchema, SchemaMiddleware, SchemaSource, ServedSchema, StitchedSchema},
    tracing_setup,
};

/// Errors surfaced by a resolver.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ResolverError {
    /// A retry loop ran out of attempts without resolving the remote.
    #[error("Remote schema at {url} is unavailable after {attempts} attempts")]
    RemoteSchemaUnavailable { url: String, attempts: u32 },

    #[error("Could not find required ENV variable \"{name}\" that is required when {required_by} is present")]
    MissingOperationalVariable { name: String, required_by: String },

    #[error("Remote schema {url} is not configured for this endpoint")]
    UnknownRemoteSchema { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSchemaStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for RemoteSchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteSchemaStatus::Active => f.write_str("ACTIVE"),
            RemoteSchemaStatus::Inactive => f.write_str("INACTIVE"),
        }
    }
}

/// Settings for one resolver.
#[derive(Clone)]
pub struct ResolverConfig {
    pub path: String,
    /// Remotes in merge order; later remotes win type conflicts
    pub remote_schema_urls: Vec<String>,
    pub retry: RetryPolicy,
    pub middleware: Vec<Arc<dyn SchemaMiddleware>>,
    /// Read from the environment at `initialize` when unset
    pub endpoint: Option<EndpointOptions>,
    /// Receives an error whenever a retry loop gives up
    pub failure_sink: Option<mpsc::UnboundedSender<ResolverError>>,
}

impl ResolverConfig {
    pub fn new<I, S>(path: impl Into<String>, remote_schema_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            remote_schema_urls: remote_schema_urls.into_iter().map(Into::into).collect(),
            retry: RetryPolicy::default(),
            middleware: Vec::new(),
            endpoint: None,
            failure_sink: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn SchemaMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_endpoint_options(mut self, options: EndpointOptions) -> Self {
        self.endpoint = Some(options);
        self
    }

    pub fn with_failure_sink(mut self, sink: mpsc::UnboundedSender<ResolverError>) -> Self {
        self.failure_sink = Some(sink);
        self
    }
}

#[derive(Debug, Default)]
struct RemoteSchemaEntry {
    schema: Option<Arc<RemoteSchema>>,
    version: Option<String>,
    retries_exhausted: bool,
}

struct RetryRegistration {
    operation: RetryOperation,
    target_version: Option<String>,
    generation: u64,
}

/// What a retry loop is trying to reach.
#[derive(Debug, Clone)]
struct RetryState {
    url: String,
    target_version: Option<String>,
}

pub struct RemoteSchemaResolver {
    id: String,
    config: ResolverConfig,
    local: Arc<dyn SchemaSource>,
    fetcher: Arc<dyn SchemaFetcher>,
    bus: Arc<LifecycleBus>,
    entries: RwLock<HashMap<String, RemoteSchemaEntry>>,
    retries: Mutex<HashMap<String, RetryRegistration>>,
    generation: AtomicU64,
    source_tracing: AtomicBool,
    served: Arc<ArcSwap<ExecutableSchema>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    self_ref: Weak<Self>,
}

impl RemoteSchemaResolver {
    /// Every configured remote starts out INACTIVE and the local schema is
    /// served until `initialize` runs.
    pub fn new(
        config: ResolverConfig,
        local: Arc<dyn SchemaSource>,
        fetcher: Arc<dyn SchemaFetcher>,
        bus: Arc<LifecycleBus>,
    ) -> Arc<Self> {
        let entries = config
            .remote_schema_urls
            .iter()
            .map(|url| (url.clone(), RemoteSchemaEntry::default()))
            .collect();
        let served = ExecutableSchema::new(ServedSchema::Local(local.clone()), config.middleware.clone());

        Arc::new_cyclic(|self_ref| Self {
            id: format!("graphql:{}", config.path),
            config,
            local,
            fetcher,
            bus,
            entries: RwLock::new(entries),
            retries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            source_tracing: AtomicBool::new(false),
            served: Arc::new(ArcSwap::from_pointee(served)),
            rebuild_lock: tokio::sync::Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    /// Identifies this resolver on the lifecycle bus.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.config.path
    }

    /// Handle to the schema the endpoint executes against.
    pub fn schema(&self) -> Arc<ArcSwap<ExecutableSchema>> {
        self.served.clone()
    }

    pub fn current_schema(&self) -> Arc<ExecutableSchema> {
        self.served.load_full()
    }

    /// True when no remotes are configured or every remote is resolved.
    pub fn is_schema_healthy(&self) -> bool {
        self.read_entries().values().all(|entry| entry.schema.is_some())
    }

    pub fn get_remote_schema_status(&self, url: &str) -> RemoteSchemaStatus {
        match self.read_entries().get(url) {
            Some(entry) if entry.schema.is_some() => RemoteSchemaStatus::Active,
            _ => RemoteSchemaStatus::Inactive,
        }
    }

    /// Last version the remote reported through `{ version }`.
    pub fn remote_schema_version(&self, url: &str) -> Option<String> {
        self.read_entries().get(url).and_then(|entry| entry.version.clone())
    }

    /// True once a retry loop for `url` gave up, until the next successful fetch.
    pub fn retries_exhausted(&self, url: &str) -> bool {
        self.read_entries()
            .get(url)
            .is_some_and(|entry| entry.retries_exhausted)
    }

    pub fn has_active_retry(&self, url: &str) -> bool {
        self.lock_retries()
            .get(url)
            .is_some_and(|registration| !registration.operation.is_stopped())
    }

    /// Refetch `url`, optionally until it reports `target_version`.
    ///
    /// Does nothing when the cached version already equals `target_version`.
    /// Fetch failures are logged and handed to the retry loop; they are not
    /// returned.
    pub async fn update_remote_schema(
        &self,
        url: &str,
        target_version: Option<&str>,
    ) -> Result<(), ResolverError> {
        let cached_version = match self.read_entries().get(url) {
            Some(entry) => entry.version.clone(),
            None => {
                return Err(ResolverError::UnknownRemoteSchema {
                    url: url.to_string(),
                });
            }
        };

        if target_version.is_some() && cached_version.as_deref() == target_version {
            tracing::debug!(url, target_version, "Remote schema already at target version");
            return Ok(());
        }

        tracing::info!(url, target_version, "Updating remote schema");
        self.refresh_remote_schema(url).await;
        self.reconcile_retry(url, target_version);
        Ok(())
    }

    /// One fetch round for `url`. Returns whether the remote resolved.
    async fn refresh_remote_schema(&self, url: &str) -> bool {
        self.publish(LifecycleEvent::RemoteSchemasFetching);
        let resolved = self.add_remote_schema(url).await;
        if resolved {
            self.rebuild().await;
        }
        self.publish_fetched_if_healthy();
        resolved
    }

    async fn add_remote_schema(&self, url: &str) -> bool {
        let span = tracing_setup::create_remote_fetch_span(url, &self.id);
        async {
            let schema = match self.fetcher.introspect(url).await {
                Ok(schema) => schema,
                Err(e) => {
                    tracing::warn!(url, "Could not introspect remote schema: {e}");
                    if let Some(entry) = self.write_entries().get_mut(url) {
                        entry.schema = None;
                    }
                    return false;
                }
            };

            let version = match self.fetcher.query_version(url).await {
                Ok(version) => {
                    if let Some(version) = &version {
                        tracing::Span::current().record("remote.version", version.as_str());
                    }
                    Some(version)
                }
                Err(e) => {
                    tracing::error!(url, "Failed to get remote schema version: {e}");
                    None
                }
            };

            let remote = Arc::new(RemoteSchema::new(url, schema, self.fetcher.clone()));
            if let Some(entry) = self.write_entries().get_mut(url) {
                entry.schema = Some(remote);
                entry.retries_exhausted = false;
                if let Some(version) = version {
                    entry.version = version;
                }
            }
            tracing::info!(url, "Remote schema resolved");
            true
        }
        .instrument(span)
        .await
    }

    /// Swap in a schema built from the local schema and every resolved remote.
    async fn rebuild(&self) {
        let _guard = self.rebuild_lock.lock().await;

        let mut sources: Vec<Arc<dyn SchemaSource>> = {
            let entries = self.read_entries();
            self.config
                .remote_schema_urls
                .iter()
                .filter_map(|url| entries.get(url).and_then(|entry| entry.schema.clone()))
                .map(|remote| remote as Arc<dyn SchemaSource>)
                .collect()
        };
        let remotes = sources.len();

        let served = if sources.is_empty() {
            ServedSchema::Local(self.local.clone())
        } else {
            sources.push(self.local.clone());
            match StitchedSchema::build(sources).await {
                Ok(stitched) => ServedSchema::Stitched(Arc::new(
                    stitched.with_source_tracing(self.source_tracing.load(Ordering::Relaxed)),
                )),
                Err(e) => {
                    tracing::error!(path = %self.config.path, "Could not stitch schemas, keeping the current one: {e}");
                    return;
                }
            }
        };

        tracing::info!(path = %self.config.path, remotes, "Refreshed GraphQL schema");
        self.served.store(Arc::new(ExecutableSchema::new(
            served,
            self.config.middleware.clone(),
        )));
    }

    /// Start, keep or stop the retry loop for `url`.
    fn reconcile_retry(&self, url: &str, target_version: Option<&str>) {
        let version_mismatch = target_version
            .is_some_and(|target| self.remote_schema_version(url).as_deref() != Some(target));
        let should_retry =
            self.get_remote_schema_status(url) == RemoteSchemaStatus::Inactive || version_mismatch;

        if !should_retry {
            if let Some(registration) = self.lock_retries().remove(url) {
                tracing::info!(url, "Stopping ongoing retry after successful update");
                registration.operation.stop();
            }
            return;
        }

        let running = self.lock_retries().get(url).is_some_and(|registration| {
            !registration.operation.is_stopped()
                && registration.target_version.as_deref() == target_version
        });
        if running {
            tracing::debug!(url, "Retry already running");
            return;
        }

        self.start_retry(RetryState {
            url: url.to_string(),
            target_version: target_version.map(str::to_string),
        });
    }

    fn start_retry(&self, state: RetryState) {
        let operation = RetryOperation::new(
            format!("fetch remote schema at {}", state.url),
            self.config.retry,
        );
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let previous = self.lock_retries().insert(
            state.url.clone(),
            RetryRegistration {
                operation: operation.clone(),
                target_version: state.target_version.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.operation.stop();
        }

        tracing::info!(url = %state.url, target_version = ?state.target_version, "Starting remote schema retry");
        tokio::spawn(run_retry(self.self_ref.clone(), operation, state, generation));
    }

    fn retry_satisfied(&self, state: &RetryState) -> bool {
        match &state.target_version {
            Some(target) => self.remote_schema_version(&state.url).as_deref() == Some(target.as_str()),
            None => self.get_remote_schema_status(&state.url) == RemoteSchemaStatus::Active,
        }
    }

    /// Drop the registration of a finished loop. Only the loop currently
    /// registered for the URL may report exhaustion; a superseded or stopped
    /// loop ends silently.
    fn finish_retry(&self, state: &RetryState, generation: u64, outcome: RetryOutcome) {
        let current = {
            let mut retries = self.lock_retries();
            let current = retries
                .get(&state.url)
                .is_some_and(|registration| registration.generation == generation);
            if current {
                retries.remove(&state.url);
            }
            current
        };

        if !current || !outcome.retries_exceeded() {
            return;
        }

        if let Some(entry) = self.write_entries().get_mut(&state.url) {
            entry.retries_exhausted = true;
        }
        let error = ResolverError::RemoteSchemaUnavailable {
            url: state.url.clone(),
            attempts: outcome.attempts(),
        };
        let report = eyre::Report::new(error.clone()).wrap_err("Ceres failed to get remote schema");
        tracing::error!(url = %state.url, "{report:?}");

        if let Some(sink) = &self.config.failure_sink {
            if sink.send(error).is_err() {
                tracing::debug!(url = %state.url, "Failure sink is closed");
            }
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        self.bus.publish(LifecycleMessage::new(event, self.id.clone()));
    }

    fn publish_fetched_if_healthy(&self) {
        if self.is_schema_healthy() {
            self.publish(LifecycleEvent::RemoteSchemasFetched);
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, RemoteSchemaEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, RemoteSchemaEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_retries(&self) -> MutexGuard<'_, HashMap<String, RetryRegistration>> {
        match self.retries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn run_retry(
    resolver: Weak<RemoteSchemaResolver>,
    operation: RetryOperation,
    state: RetryState,
    generation: u64,
) {
    let handle = operation.clone();
    let outcome = operation
        .run(
            |attempt| {
                let resolver = resolver.upgrade();
                let handle = handle.clone();
                let url = state.url.clone();
                async move {
                    let Some(resolver) = resolver else {
                        handle.stop();
                        return Err(eyre!("Resolver for {url} was dropped"));
                    };
                    tracing::debug!(url, attempt, "Retrying remote schema fetch");
                    if resolver.refresh_remote_schema(&url).await {
                        Ok(())
                    } else {
                        Err(eyre!("Remote schema at {url} is still unavailable"))
                    }
                }
            },
            || {
                resolver
                    .upgrade()
                    .is_some_and(|resolver| resolver.retry_satisfied(&state))
            },
        )
        .await;

    if let Some(resolver) = resolver.upgrade() {
        resolver.finish_retry(&state, generation, outcome);
    }
}

#[async_trait]
impl Middleware for RemoteSchemaResolver {
    fn name(&self) -> &str {
        &self.id
    }

    /// Resolve every remote, build the served schema and mount the endpoint.
    /// Only a missing operational variable fails; unresolved remotes are
    /// retried in the background.
    async fn initialize(&self, mount: &MountPoint) -> Result<()> {
        let options = match &self.config.endpoint {
            Some(options) => options.clone(),
            None => EndpointOptions::from_env()
                .wrap_err_with(|| format!("Could not build GraphQL endpoint at {}", self.config.path))?,
        };
        self.source_tracing
            .store(options.debug_tracing, Ordering::Relaxed);

        self.publish(LifecycleEvent::RemoteSchemasFetching);
        join_all(
            self.config
                .remote_schema_urls
                .iter()
                .map(|url| self.add_remote_schema(url)),
        )
        .await;
        self.publish_fetched_if_healthy();

        self.rebuild().await;

        for url in &self.config.remote_schema_urls {
            if self.get_remote_schema_status(url) == RemoteSchemaStatus::Inactive {
                self.reconcile_retry(url, None);
            }
        }

        mount.mount(self.id.as_str(), graphql_router(&self.config.path, self.served.clone(), options));
        tracing::info!(path = %self.config.path, "GraphQL endpoint mounted");
        Ok(())
    }
}

impl std::fmt::Debug for RemoteSchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSchemaResolver")
            .field("id", &self.id)
            .field("remote_schema_urls", &self.config.remote_schema_urls)
            .finish()
    }
}
