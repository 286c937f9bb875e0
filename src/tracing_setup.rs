use std::str::FromStr;

use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event with the span list attached
    #[default]
    Json,
    /// Human readable multi-line output for development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "console" => Ok(LogFormat::Pretty),
            other => Err(format!("Unknown log format '{other}', expected 'json' or 'pretty'")),
        }
    }
}

/// Filter from an explicit directive, else `RUST_LOG`, else `info`.
pub fn build_filter(level: Option<&str>) -> Result<EnvFilter> {
    match level {
        Some(level) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Install the global subscriber for Ceres.
pub fn init_tracing(format: LogFormat, level: Option<&str>) -> Result<()> {
    let filter = build_filter(level)?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    }
    .wrap_err("A global tracing subscriber is already installed")?;

    tracing::info!(?format, "Ceres logging initialized");
    Ok(())
}

/// Create a span for one GraphQL request. Client and schema tag fields are
/// recorded later when usage reporting is enabled.
pub fn create_graphql_span(path: &str, operation: Option<&str>, request_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "graphql_request",
        graphql.path = path,
        graphql.operation = operation,
        request.id = request_id,
        client.name = tracing::field::Empty,
        client.version = tracing::field::Empty,
        schema.tag = tracing::field::Empty,
    )
}

/// Create a span for a remote schema fetch
pub fn create_remote_fetch_span(url: &str, source: &str) -> tracing::Span {
    tracing::info_span!(
        "remote_schema_fetch",
        remote.url = url,
        resolver = source,
        remote.version = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_explicit_level_is_validated() {
        assert!(build_filter(Some("ceres=debug,info")).is_ok());
        assert!(build_filter(Some("ceres=loud")).is_err());
    }

    #[test]
    fn test_init_rejects_invalid_level_before_installing() {
        assert!(init_tracing(LogFormat::Pretty, Some("ceres=loud")).is_err());
    }

    #[test]
    fn test_create_graphql_span() {
        let span = create_graphql_span("/graphql", Some("Offers"), None);
        assert_eq!(span.metadata().map(|m| m.name()), Some("graphql_request"));
    }

    #[test]
    fn test_create_remote_fetch_span() {
        let span = create_remote_fetch_span("http://offers/graphql", "graphql:/graphql");
        assert_eq!(span.metadata().map(|m| m.name()), Some("remote_schema_fetch"));
    }
}
