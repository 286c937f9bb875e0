//! Per-request caller context extracted from HTTP headers.
use http::HeaderMap;

pub const IA_CONTEXT_HEADER: &str = "ia-context";
pub const IA_TRACE_ID_HEADER: &str = "ia-trace-id";
pub const IA_REQUEST_ID_HEADER: &str = "ia-request-id";
pub const CLIENT_NAME_HEADER: &str = "graphql-client-name";
pub const CLIENT_VERSION_HEADER: &str = "graphql-client-version";

/// Caller identity and tracing identifiers for one GraphQL request.
///
/// Inserted into local request data and forwarded to remote schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Serialized upstream context (`IA-Context`).
    pub ia_context: Option<String>,
    /// Bearer token from `Authorization`.
    pub token: Option<String>,
    pub trace_id: Option<String>,
    pub request_id: Option<String>,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let token = header(http::header::AUTHORIZATION.as_str()).and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
                .map(|token| token.trim().to_string())
        });

        Self {
            ia_context: header(IA_CONTEXT_HEADER),
            token,
            trace_id: header(IA_TRACE_ID_HEADER),
            request_id: header(IA_REQUEST_ID_HEADER),
            client_name: header(CLIENT_NAME_HEADER),
            client_version: header(CLIENT_VERSION_HEADER),
        }
    }

    /// Headers to attach when forwarding this request to a remote schema.
    ///
    /// `IA-Context` wins over the bearer token; only one identity is sent.
    pub fn forward_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(context) = &self.ia_context {
            headers.push(("IA-Context".to_string(), context.clone()));
        } else if let Some(token) = &self.token {
            headers.push((
                http::header::AUTHORIZATION.to_string(),
                format!("Bearer {token}"),
            ));
        }
        if let Some(trace_id) = &self.trace_id {
            headers.push(("IA-Trace-Id".to_string(), trace_id.clone()));
        }
        if let Some(request_id) = &self.request_id {
            headers.push(("IA-Request-Id".to_string(), request_id.clone()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn test_extracts_identity_and_trace_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        headers.insert("ia-trace-id", HeaderValue::from_static("trace-1"));
        headers.insert("graphql-client-name", HeaderValue::from_static("web"));

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.token.as_deref(), Some("abc123"));
        assert_eq!(ctx.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(ctx.client_name.as_deref(), Some("web"));
        assert_eq!(ctx.ia_context, None);

        assert_eq!(
            ctx.forward_headers(),
            vec![
                ("authorization".to_string(), "Bearer abc123".to_string()),
                ("IA-Trace-Id".to_string(), "trace-1".to_string()),
            ]
        );
    }

    #[test]
    fn test_ia_context_replaces_token_when_forwarding() {
        let ctx = RequestContext {
            ia_context: Some("{\"userId\":7}".to_string()),
            token: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ctx.forward_headers(),
            vec![("IA-Context".to_string(), "{\"userId\":7}".to_string())]
        );
    }
}
