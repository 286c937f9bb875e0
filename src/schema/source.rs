//! Things a GraphQL request can be executed against.
use std::{fmt, sync::Arc};

use async_graphql::{Executor, Request, Response, ServerError, Value};
use async_trait::async_trait;

use super::{
    SchemaBuildError,
    context::RequestContext,
    introspection::{INTROSPECTION_QUERY, IntrospectionData, IntrospectionSchema},
};
use crate::ports::{GraphQLPayload, GraphQLReply, SchemaFetcher};

/// Adds per-request data (loaders, caches) to requests bound for the local
/// schema.
pub type RequestHook = Arc<dyn Fn(Request, &RequestContext) -> Request + Send + Sync>;

#[async_trait]
pub trait SchemaSource: Send + Sync + 'static {
    /// Short name used in logs and traces
    fn name(&self) -> &str;

    async fn execute(&self, request: Request, ctx: &RequestContext) -> Response;

    /// Describe the type system this source serves
    async fn introspect(&self) -> Result<IntrospectionSchema, SchemaBuildError>;
}

/// The schema compiled into this process.
pub struct LocalSchema<E: Executor> {
    executor: E,
    hook: Option<RequestHook>,
}

impl<E: Executor> LocalSchema<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            hook: None,
        }
    }

    pub fn with_request_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Request, &RequestContext) -> Request + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }
}

#[async_trait]
impl<E: Executor> SchemaSource for LocalSchema<E> {
    fn name(&self) -> &str {
        "local"
    }

    async fn execute(&self, request: Request, ctx: &RequestContext) -> Response {
        let mut request = request.data(ctx.clone());
        if let Some(hook) = &self.hook {
            request = hook(request, ctx);
        }
        self.executor.execute(request).await
    }

    async fn introspect(&self) -> Result<IntrospectionSchema, SchemaBuildError> {
        let response = self.executor.execute(Request::new(INTROSPECTION_QUERY)).await;
        if let Some(error) = response.errors.first() {
            return Err(SchemaBuildError::Introspection(error.message.clone()));
        }
        let data = response
            .data
            .into_json()
            .map_err(|e| SchemaBuildError::Introspection(e.to_string()))?;
        let data: IntrospectionData = serde_json::from_value(data)
            .map_err(|e| SchemaBuildError::Introspection(e.to_string()))?;
        Ok(data.schema)
    }
}

impl<E: Executor> fmt::Debug for LocalSchema<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSchema")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// A remote GraphQL service whose type system was introspected.
pub struct RemoteSchema {
    url: String,
    schema: IntrospectionSchema,
    fetcher: Arc<dyn SchemaFetcher>,
}

impl RemoteSchema {
    pub fn new(url: impl Into<String>, schema: IntrospectionSchema, fetcher: Arc<dyn SchemaFetcher>) -> Self {
        Self {
            url: url.into(),
            schema,
            fetcher,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn schema(&self) -> &IntrospectionSchema {
        &self.schema
    }
}

impl fmt::Debug for RemoteSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSchema")
            .field("url", &self.url)
            .field("types", &self.schema.types.len())
            .finish()
    }
}

#[async_trait]
impl SchemaSource for RemoteSchema {
    fn name(&self) -> &str {
        &self.url
    }

    async fn execute(&self, request: Request, ctx: &RequestContext) -> Response {
        let variables = match serde_json::to_value(&request.variables) {
            Ok(variables) => variables,
            Err(e) => return error_response(format!("Could not encode variables: {e}")),
        };
        let payload = GraphQLPayload {
            query: request.query,
            operation_name: request.operation_name,
            variables,
        };

        match self.fetcher.execute(&self.url, &payload, &ctx.forward_headers()).await {
            Ok(reply) => reply_to_response(reply),
            Err(e) => {
                tracing::warn!(url = %self.url, "Remote schema request failed: {e}");
                error_response(format!("Remote schema at {} is unavailable: {e}", self.url))
            }
        }
    }

    async fn introspect(&self) -> Result<IntrospectionSchema, SchemaBuildError> {
        Ok(self.schema.clone())
    }
}

fn error_response(message: String) -> Response {
    Response::from_errors(vec![ServerError::new(message, None)])
}

fn reply_to_response(reply: GraphQLReply) -> Response {
    let data = match reply.data.map(Value::from_json).transpose() {
        Ok(data) => data.unwrap_or(Value::Null),
        Err(e) => return error_response(format!("Invalid remote data: {e}")),
    };
    let errors = reply
        .errors
        .into_iter()
        .map(|error| {
            serde_json::from_value::<ServerError>(error.clone()).unwrap_or_else(|_| {
                let message = error
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| error.to_string(), str::to_string);
                ServerError::new(message, None)
            })
        })
        .collect();

    let mut response = Response::new(data);
    response.errors = errors;
    response
}

#[cfg(test)]
mod tests {
    use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
    use serde_json::json;

    use super::*;
    use crate::ports::{FetchError, FetchResult};

    struct Query;

    #[Object]
    impl Query {
        async fn caller(&self, ctx: &async_graphql::Context<'_>) -> Option<String> {
            ctx.data_opt::<RequestContext>().and_then(|c| c.token.clone())
        }
    }

    #[tokio::test]
    async fn test_local_schema_sees_request_context() {
        let local = LocalSchema::new(Schema::new(Query, EmptyMutation, EmptySubscription));
        let ctx = RequestContext {
            token: Some("secret".to_string()),
            ..Default::default()
        };

        let response = local.execute(Request::new("{ caller }"), &ctx).await;
        assert_eq!(
            response.data.into_json().unwrap(),
            json!({ "caller": "secret" })
        );

        let schema = local.introspect().await.unwrap();
        assert_eq!(schema.query_type_name(), Some("Query"));
        assert!(schema.find_type("Query").is_some());
    }

    struct EchoFetcher;

    #[async_trait]
    impl SchemaFetcher for EchoFetcher {
        async fn execute(
            &self,
            url: &str,
            payload: &GraphQLPayload,
            headers: &[(String, String)],
        ) -> FetchResult<GraphQLReply> {
            if url.contains("down") {
                return Err(FetchError::Connection("refused".to_string()));
            }
            Ok(GraphQLReply {
                data: Some(json!({
                    "query": payload.query,
                    "headers": headers.len(),
                })),
                errors: vec![json!({ "message": "partial", "path": ["query"] })],
            })
        }
    }

    fn empty_schema() -> IntrospectionSchema {
        serde_json::from_value(json!({ "queryType": { "name": "Query" }, "types": [] })).unwrap()
    }

    #[tokio::test]
    async fn test_remote_schema_forwards_and_converts() {
        let remote = RemoteSchema::new("http://offers/graphql", empty_schema(), Arc::new(EchoFetcher));
        let ctx = RequestContext {
            trace_id: Some("t-1".to_string()),
            ..Default::default()
        };

        let response = remote.execute(Request::new("{ offers }"), &ctx).await;
        assert_eq!(
            response.data.into_json().unwrap(),
            json!({ "query": "{ offers }", "headers": 1 })
        );
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "partial");
    }

    #[tokio::test]
    async fn test_remote_failure_becomes_graphql_error() {
        let remote = RemoteSchema::new("http://down/graphql", empty_schema(), Arc::new(EchoFetcher));
        let response = remote
            .execute(Request::new("{ offers }"), &RequestContext::default())
            .await;
        assert_eq!(response.data, Value::Null);
        assert!(response.errors[0].message.contains("unavailable"));
    }
}
