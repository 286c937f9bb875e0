pub mod connector;
pub mod middleware;
pub mod schema_fetcher;

pub use connector::{Connector, ConnectorError};
pub use middleware::Middleware;
pub use schema_fetcher::{FetchError, FetchResult, GraphQLPayload, GraphQLReply, SchemaFetcher};
