use std::sync::Arc;

use arc_swap::ArcSwap;
use async_graphql::{BatchRequest, BatchResponse, http::GraphiQLSource};
use async_graphql_axum::{GraphQLBatchRequest, GraphQLResponse};
use axum::{
    Router,
    extract::{FromRequest, Request, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tracing::Instrument;

use crate::{
    core::resolver::ResolverError,
    schema::{ExecutableSchema, RequestContext},
    tracing_setup,
};

pub const ENGINE_API_KEY: &str = "ENGINE_API_KEY";
pub const ENGINE_SCHEMA_TAG: &str = "ENGINE_SCHEMA_TAG";
pub const DEBUG_RESOLVER_TRACING: &str = "DEBUG_RESOLVER_TRACING";

/// Usage reporting settings enabled by `ENGINE_API_KEY`.
#[derive(Clone, PartialEq, Eq)]
pub struct EngineReporting {
    pub api_key: String,
    pub schema_tag: String,
}

impl std::fmt::Debug for EngineReporting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineReporting")
            .field("api_key", &"<redacted>")
            .field("schema_tag", &self.schema_tag)
            .finish()
    }
}

/// Options read from the process environment when an endpoint is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointOptions {
    pub engine: Option<EngineReporting>,
    pub debug_tracing: bool,
}

impl EndpointOptions {
    pub fn from_env() -> Result<Self, ResolverError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ResolverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let engine = match read(ENGINE_API_KEY) {
            Some(api_key) => {
                let schema_tag = read(ENGINE_SCHEMA_TAG).ok_or_else(|| {
                    ResolverError::MissingOperationalVariable {
                        name: ENGINE_SCHEMA_TAG.to_string(),
                        required_by: ENGINE_API_KEY.to_string(),
                    }
                })?;
                Some(EngineReporting {
                    api_key,
                    schema_tag,
                })
            }
            None => None,
        };

        Ok(Self {
            engine,
            debug_tracing: read(DEBUG_RESOLVER_TRACING).is_some(),
        })
    }
}

struct EndpointState {
    path: String,
    schema: Arc<ArcSwap<ExecutableSchema>>,
    options: EndpointOptions,
}

/// Routes for one GraphQL endpoint. GET without a `query` parameter serves the
/// explorer; GET with one and POST execute, single or batched. Requests always
/// run against the schema currently stored in `schema`.
pub fn graphql_router(
    path: &str,
    schema: Arc<ArcSwap<ExecutableSchema>>,
    options: EndpointOptions,
) -> Router {
    let state = Arc::new(EndpointState {
        path: path.to_string(),
        schema,
        options,
    });
    Router::new()
        .route(path, get(explore_or_execute).post(execute))
        .with_state(state)
}

async fn explore_or_execute(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    let has_query = request.uri().query().is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == "query")
    });
    if !has_query {
        return Html(GraphiQLSource::build().endpoint(&state.path).finish()).into_response();
    }

    match <GraphQLBatchRequest as FromRequest<()>>::from_request(request, &()).await {
        Ok(batch) => run_batch(&state, &headers, batch.into_inner())
            .await
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn execute(
    State(state): State<Arc<EndpointState>>,
    headers: HeaderMap,
    batch: GraphQLBatchRequest,
) -> GraphQLResponse {
    run_batch(&state, &headers, batch.into_inner()).await
}

/// Batched operations run one after another, in request order.
async fn run_batch(state: &EndpointState, headers: &HeaderMap, batch: BatchRequest) -> GraphQLResponse {
    let ctx = RequestContext::from_headers(headers);
    let schema = state.schema.load_full();

    let response = match batch {
        BatchRequest::Single(request) => BatchResponse::Single(run_one(state, &schema, &ctx, request).await),
        BatchRequest::Batch(requests) => {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(run_one(state, &schema, &ctx, request).await);
            }
            BatchResponse::Batch(responses)
        }
    };
    response.into()
}

async fn run_one(
    state: &EndpointState,
    schema: &ExecutableSchema,
    ctx: &RequestContext,
    request: async_graphql::Request,
) -> async_graphql::Response {
    let span = tracing_setup::create_graphql_span(
        &state.path,
        request.operation_name.as_deref(),
        ctx.request_id.as_deref(),
    );
    if let Some(engine) = &state.options.engine {
        span.record("client.name", ctx.client_name.as_deref().unwrap_or("unknown"));
        span.record("client.version", ctx.client_version.as_deref().unwrap_or("unknown"));
        span.record("schema.tag", engine.schema_tag.as_str());
    }

    schema.execute(request, ctx).instrument(span).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::schema::{LocalSchema, ServedSchema};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_engine_key_requires_schema_tag() {
        let err = EndpointOptions::from_lookup(lookup(&[(ENGINE_API_KEY, "key")])).unwrap_err();
        assert!(matches!(
            err,
            ResolverError::MissingOperationalVariable { ref name, .. } if name == ENGINE_SCHEMA_TAG
        ));

        let options = EndpointOptions::from_lookup(lookup(&[
            (ENGINE_API_KEY, "key"),
            (ENGINE_SCHEMA_TAG, "staging"),
            (DEBUG_RESOLVER_TRACING, "1"),
        ]))
        .unwrap();
        assert_eq!(options.engine.unwrap().schema_tag, "staging");
        assert!(options.debug_tracing);
    }

    #[test]
    fn test_no_variables_means_defaults() {
        let options = EndpointOptions::from_lookup(lookup(&[(ENGINE_SCHEMA_TAG, "unused")])).unwrap();
        assert_eq!(options, EndpointOptions::default());
    }

    struct Query;

    #[Object]
    impl Query {
        async fn greeting(&self, ctx: &async_graphql::Context<'_>) -> String {
            let trace = ctx
                .data_opt::<RequestContext>()
                .and_then(|c| c.trace_id.clone())
                .unwrap_or_default();
            format!("hello {trace}")
        }
    }

    fn endpoint() -> Router {
        let served = ServedSchema::Local(Arc::new(LocalSchema::new(Schema::new(
            Query,
            EmptyMutation,
            EmptySubscription,
        ))));
        let schema = Arc::new(ArcSwap::from_pointee(ExecutableSchema::new(served, Vec::new())));
        graphql_router("/graphql", schema, EndpointOptions::default())
    }

    #[tokio::test]
    async fn test_post_executes_with_request_context() {
        let response = endpoint()
            .oneshot(
                Request::post("/graphql")
                    .header("content-type", "application/json")
                    .header("ia-trace-id", "t-42")
                    .body(Body::from(json!({ "query": "{ greeting }" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "data": { "greeting": "hello t-42" } }));
    }

    #[tokio::test]
    async fn test_get_serves_explorer() {
        let response = endpoint()
            .oneshot(Request::get("/graphql").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&body).contains("graphiql"));
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_batched_post_answers_each_operation() {
        let batch = json!([
            { "query": "{ greeting }" },
            { "query": "query Named { greeting }", "operationName": "Named" }
        ]);
        let response = endpoint()
            .oneshot(
                Request::post("/graphql")
                    .header("content-type", "application/json")
                    .body(Body::from(batch.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!([
                { "data": { "greeting": "hello " } },
                { "data": { "greeting": "hello " } }
            ])
        );
    }

    #[tokio::test]
    async fn test_get_with_query_executes() {
        let response = endpoint()
            .oneshot(
                Request::get("/graphql?query=%7B%20greeting%20%7D")
                    .header("ia-trace-id", "t-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "data": { "greeting": "hello t-7" } })
        );
    }
}
