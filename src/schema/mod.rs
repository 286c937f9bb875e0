//! Schema sources, stitching and the executable schema served by the GraphQL
//! endpoint.
pub mod context;
pub mod introspection;
pub mod merge;
pub mod middleware;
pub mod printer;
pub mod router;
pub mod shadow;
pub mod source;

use std::sync::Arc;

use async_graphql::{Request, Response};
use thiserror::Error;

pub use context::RequestContext;
pub use middleware::{ErrorLogging, Next, RequestTiming, SchemaMiddleware};
pub use router::StitchedSchema;
pub use source::{LocalSchema, RemoteSchema, RequestHook, SchemaSource};

/// Errors raised while assembling a servable schema.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SchemaBuildError {
    #[error("No schema sources to merge")]
    NoSources,

    #[error("Merged schema has no query root")]
    MissingQueryRoot,

    #[error("Introspection failed: {0}")]
    Introspection(String),
}

/// What the endpoint executes before middleware is applied.
#[derive(Clone)]
pub enum ServedSchema {
    /// Only the local schema is available; it is served as is.
    Local(Arc<dyn SchemaSource>),
    /// The local schema stitched with resolved remotes.
    Stitched(Arc<StitchedSchema>),
}

impl ServedSchema {
    pub async fn execute(&self, request: Request, ctx: &RequestContext) -> Response {
        match self {
            ServedSchema::Local(source) => source.execute(request, ctx).await,
            ServedSchema::Stitched(schema) => schema.execute(request, ctx).await,
        }
    }

    pub fn is_stitched(&self) -> bool {
        matches!(self, ServedSchema::Stitched(_))
    }

    /// The underlying source when nothing was stitched.
    pub fn as_local(&self) -> Option<&Arc<dyn SchemaSource>> {
        match self {
            ServedSchema::Local(source) => Some(source),
            ServedSchema::Stitched(_) => None,
        }
    }
}

/// A served schema wrapped in its middleware chain.
#[derive(Clone)]
pub struct ExecutableSchema {
    schema: ServedSchema,
    middleware: Arc<[Arc<dyn SchemaMiddleware>]>,
}

impl ExecutableSchema {
    pub fn new(schema: ServedSchema, middleware: Vec<Arc<dyn SchemaMiddleware>>) -> Self {
        Self {
            schema,
            middleware: middleware.into(),
        }
    }

    pub fn served(&self) -> &ServedSchema {
        &self.schema
    }

    pub async fn execute(&self, request: Request, ctx: &RequestContext) -> Response {
        Next::new(&self.middleware, &self.schema).run(request, ctx).await
    }
}
