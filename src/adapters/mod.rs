pub mod graphql_endpoint;
pub mod health;
pub mod http_probe;
pub mod http_schema_fetcher;

/// Re-export commonly used types from adapters
pub use graphql_endpoint::{EndpointOptions, EngineReporting, graphql_router};
pub use health::HealthMiddleware;
pub use http_probe::HttpProbeConnector;
pub use http_schema_fetcher::HttpSchemaFetcher;
