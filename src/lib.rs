//! Ceres - a GraphQL gateway that stitches a local schema with remote ones.
//!
//! Ceres serves one or more GraphQL endpoints. Each endpoint executes against
//! the schema compiled into the process merged with the schemas of remote
//! GraphQL services, discovered through introspection. Remotes that are down
//! are left out and recovered in the background with bounded exponential
//! backoff; the merged schema is rebuilt and swapped atomically whenever a
//! remote comes back or moves to a new version.
//!
//! # Features
//! - Schema stitching by root field, with merged introspection and GraphiQL
//! - Self-healing remote schemas with version reconciliation
//! - Startup sequencing: connectors in parallel, then middleware in order
//! - Lifecycle events on an in-process bus and a readiness health endpoint
//! - Header forwarding (`IA-Context`, bearer tokens, trace and request ids)
//! - Configuration from TOML / YAML / JSON with validation
//! - Structured tracing via `tracing`
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
//! use ceres::{
//!     HealthMiddleware, HttpSchemaFetcher, LifecycleBus, RemoteSchemaResolver, ResolverConfig,
//!     Server, config::ServerConfig, schema::LocalSchema,
//! };
//!
//! struct Query;
//!
//! #[Object]
//! impl Query {
//!     async fn version(&self) -> &str {
//!         env!("CARGO_PKG_VERSION")
//!     }
//! }
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config: ServerConfig = ceres::config::loader::load_config("config.toml").await?;
//! let bus = Arc::new(LifecycleBus::new());
//! let local = Arc::new(LocalSchema::new(Schema::new(Query, EmptyMutation, EmptySubscription)));
//! let resolver = RemoteSchemaResolver::new(
//!     ResolverConfig::new("/graphql", ["http://offers:4001/graphql"]),
//!     local,
//!     Arc::new(HttpSchemaFetcher::default()),
//!     bus.clone(),
//! );
//! let middleware: Vec<Arc<dyn ceres::ports::Middleware>> =
//!     vec![Arc::new(HealthMiddleware::new("/health", "ceres")), resolver];
//! let server = Server::new(bus, Vec::new(), middleware);
//! server.start(&config).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the lifecycle and resolution logic inside `core`. Schema merging and request routing live
//! in `schema`.
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` or a domain specific error type
//! (`FetchError`, `ResolverError`, `ValidationError`, `SchemaBuildError`). Context is attached
//! with `WrapErr`.
//!
//! # Concurrency
//! The served schema and the route table are swapped through `arc_swap::ArcSwap`; short
//! critical sections use `std::sync` locks that are never held across an `.await`.
pub mod config;
pub mod ports;
pub mod schema;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{EndpointOptions, HealthMiddleware, HttpProbeConnector, HttpSchemaFetcher},
    core::{
        LifecycleBus, LifecycleEvent, MountPoint, RemoteSchemaResolver, RemoteSchemaStatus,
        ResolverConfig, ResolverError, Server,
    },
    utils::GracefulShutdown,
};
