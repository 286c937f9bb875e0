use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use tracing::Instrument;

use crate::ports::schema_fetcher::{
    FetchError, FetchResult, GraphQLPayload, GraphQLReply, SchemaFetcher,
};

const USER_AGENT: &str = concat!("Ceres-Gateway/", env!("CARGO_PKG_VERSION"));

/// Schema fetcher adapter speaking GraphQL over HTTP with reqwest.
///
/// Every request is bounded by the fetch deadline when one is configured.
/// Non-2xx statuses are errors; a 2xx body must parse as a GraphQL response.
#[derive(Debug, Clone)]
pub struct HttpSchemaFetcher {
    client: Client,
    deadline: Option<Duration>,
}

impl HttpSchemaFetcher {
    pub fn new(deadline: Option<Duration>) -> Self {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(deadline) = deadline {
            builder = builder.timeout(deadline);
        }
        let client = builder.build().unwrap_or_default();
        Self { client, deadline }
    }

    fn classify(&self, url: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            let millis = self.deadline.map_or(0, |d| d.as_millis() as u64);
            FetchError::Timeout(millis)
        } else if error.is_decode() {
            FetchError::InvalidResponse(format!("{url}: {error}"))
        } else {
            FetchError::Connection(format!("{url}: {error}"))
        }
    }
}

impl Default for HttpSchemaFetcher {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(30)))
    }
}

#[async_trait]
impl SchemaFetcher for HttpSchemaFetcher {
    async fn execute(
        &self,
        url: &str,
        payload: &GraphQLPayload,
        headers: &[(String, String)],
    ) -> FetchResult<GraphQLReply> {
        let span = tracing::debug_span!("remote_schema_request", remote.url = %url);
        self.post(url, payload, headers).instrument(span).await
    }
}

impl HttpSchemaFetcher {
    async fn post(
        &self,
        url: &str,
        payload: &GraphQLPayload,
        headers: &[(String, String)],
    ) -> FetchResult<GraphQLReply> {
        let mut request = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(payload);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| self.classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<GraphQLReply>()
            .await
            .map_err(|e| self.classify(url, e))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    use super::*;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_version_query_roundtrip() {
        let addr = serve(Router::new().route(
            "/graphql",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["query"], "{ version }");
                Json(json!({ "data": { "version": "2.0.0" } }))
            }),
        ))
        .await;

        let fetcher = HttpSchemaFetcher::default();
        let version = fetcher
            .query_version(&format!("http://{addr}/graphql"))
            .await
            .unwrap();
        assert_eq!(version.as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let addr = serve(Router::new().route(
            "/graphql",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;

        let fetcher = HttpSchemaFetcher::default();
        let url = format!("http://{addr}/graphql");
        let err = fetcher.introspect(&url).await.unwrap_err();
        assert_eq!(err, FetchError::Status { url, status: 502 });
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let addr = serve(Router::new().route(
            "/graphql",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "data": null }))
            }),
        ))
        .await;

        let fetcher = HttpSchemaFetcher::new(Some(Duration::from_millis(100)));
        let err = fetcher
            .introspect(&format!("http://{addr}/graphql"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout(100));
    }

    #[tokio::test]
    async fn test_unreachable_remote() {
        let fetcher = HttpSchemaFetcher::new(Some(Duration::from_secs(2)));
        let err = fetcher
            .introspect("http://127.0.0.1:1/graphql")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Connection(_)), "{err:?}");
    }
}
