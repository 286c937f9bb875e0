//! Wrappers applied uniformly around the served schema.
use std::{sync::Arc, time::Instant};

use async_graphql::{Request, Response};
use async_trait::async_trait;

use super::{ServedSchema, context::RequestContext};

/// A step in the chain around schema execution.
#[async_trait]
pub trait SchemaMiddleware: Send + Sync + 'static {
    async fn call(&self, request: Request, ctx: &RequestContext, next: Next<'_>) -> Response;
}

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn SchemaMiddleware>],
    schema: &'a ServedSchema,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn SchemaMiddleware>], schema: &'a ServedSchema) -> Self {
        Self { chain, schema }
    }

    pub async fn run(self, request: Request, ctx: &RequestContext) -> Response {
        match self.chain.split_first() {
            Some((current, rest)) => {
                current
                    .call(request, ctx, Next::new(rest, self.schema))
                    .await
            }
            None => self.schema.execute(request, ctx).await,
        }
    }
}

/// Logs every error in a response. Errors whose extensions carry
/// `expected: true` are business outcomes and go to `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLogging;

#[async_trait]
impl SchemaMiddleware for ErrorLogging {
    async fn call(&self, request: Request, ctx: &RequestContext, next: Next<'_>) -> Response {
        let operation = request.operation_name.clone();
        let response = next.run(request, ctx).await;
        for error in &response.errors {
            let expected = error
                .extensions
                .as_ref()
                .and_then(|ext| ext.get("expected"))
                .is_some_and(|value| matches!(value, async_graphql::Value::Boolean(true)));
            if expected {
                tracing::info!(
                    operation = operation.as_deref(),
                    request_id = ctx.request_id.as_deref(),
                    "Expected error: {}",
                    error.message
                );
            } else {
                tracing::error!(
                    operation = operation.as_deref(),
                    request_id = ctx.request_id.as_deref(),
                    path = ?error.path,
                    "GraphQL error: {}",
                    error.message
                );
            }
        }
        response
    }
}

/// Logs the duration of each request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestTiming;

#[async_trait]
impl SchemaMiddleware for RequestTiming {
    async fn call(&self, request: Request, ctx: &RequestContext, next: Next<'_>) -> Response {
        let operation = request.operation_name.clone();
        let started = Instant::now();
        let response = next.run(request, ctx).await;
        tracing::info!(
            operation = operation.as_deref(),
            trace_id = ctx.trace_id.as_deref(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            errors = response.errors.len(),
            "GraphQL request finished"
        );
        response
    }
}
