use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::introspection::{INTROSPECTION_QUERY, IntrospectionData, IntrospectionSchema, VERSION_QUERY};

/// Custom error type for remote schema operations
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum FetchError {
    /// Error when the remote cannot be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error when the remote does not answer within the fetch deadline
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// Error when the remote answers with a non-success status code
    #[error("Remote schema returned error status: {status}, url: {url}")]
    Status {
        /// The URL that was requested
        url: String,
        /// The status code returned by the remote
        status: u16,
    },

    /// Error when the response body is not a GraphQL response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Error when the remote reports GraphQL errors without data
    #[error("GraphQL error: {0}")]
    GraphQL(String),
}

/// Result type alias for remote schema operations
pub type FetchResult<T> = Result<T, FetchError>;

/// A GraphQL request body as sent over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLPayload {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub variables: serde_json::Value,
}

impl GraphQLPayload {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: serde_json::Value::Null,
        }
    }
}

/// A GraphQL response body as received over HTTP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLReply {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<serde_json::Value>,
}

impl GraphQLReply {
    fn first_error_message(&self) -> String {
        self.errors
            .first()
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error")
            .to_string()
    }
}

/// SchemaFetcher defines the port (interface) for talking to remote GraphQL services
#[async_trait]
pub trait SchemaFetcher: Send + Sync + 'static {
    /// Send a GraphQL request to the remote at `url`
    ///
    /// # Arguments
    /// * `url` - The remote GraphQL endpoint
    /// * `payload` - The request body
    /// * `headers` - Extra headers forwarded from the caller
    async fn execute(
        &self,
        url: &str,
        payload: &GraphQLPayload,
        headers: &[(String, String)],
    ) -> FetchResult<GraphQLReply>;

    /// Introspect the remote's type system
    async fn introspect(&self, url: &str) -> FetchResult<IntrospectionSchema> {
        let reply = self
            .execute(url, &GraphQLPayload::query(INTROSPECTION_QUERY), &[])
            .await?;
        let data = match reply.data {
            Some(data) if !data.is_null() => data,
            _ => return Err(FetchError::GraphQL(reply.first_error_message())),
        };
        let data: IntrospectionData = serde_json::from_value(data)
            .map_err(|e| FetchError::InvalidResponse(format!("introspection result: {e}")))?;
        Ok(data.schema)
    }

    /// Read the remote's `version` root field, if it has one
    async fn query_version(&self, url: &str) -> FetchResult<Option<String>> {
        let reply = self
            .execute(url, &GraphQLPayload::query(VERSION_QUERY), &[])
            .await?;
        match reply.data.as_ref().and_then(|d| d.get("version")) {
            Some(serde_json::Value::String(version)) => Ok(Some(version.clone())),
            Some(serde_json::Value::Null) | None if !reply.errors.is_empty() => {
                Err(FetchError::GraphQL(reply.first_error_message()))
            }
            Some(other) if !other.is_null() => Ok(Some(other.to_string())),
            _ => Ok(None),
        }
    }
}
