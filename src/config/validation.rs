use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;

use crate::config::models::{ConnectorConfig, GraphQLMountConfig, HealthConfig, RetryConfig, ServerConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Mount conflict detected: {message}")]
    MountConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.graphql.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "graphql".to_string(),
            });
        }
        for mount in &config.graphql {
            errors.extend(Self::validate_graphql_mount(mount));
        }

        errors.extend(Self::validate_retry(&config.retry));

        if let Err(e) = humantime::parse_duration(&config.fetch_timeout) {
            errors.push(ValidationError::InvalidField {
                field: "fetch_timeout".to_string(),
                message: format!("'{}' is not a duration: {e}", config.fetch_timeout),
            });
        }

        errors.extend(Self::validate_health(&config.health));

        for connector in &config.connectors {
            errors.extend(Self::validate_connector(connector));
        }

        errors.extend(Self::check_mount_conflicts(config));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:4000' or '0.0.0.0:4000')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_graphql_mount(mount: &GraphQLMountConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let path = &mount.path;

        if let Err(e) = Self::validate_path(path, &format!("graphql path: {path}")) {
            errors.push(e);
        }

        let mut seen = HashSet::new();
        for url in &mount.remote_schema_urls {
            if let Err(e) = Self::validate_url(url, &format!("graphql '{path}' remote_schema_urls")) {
                errors.push(e);
            }
            if !seen.insert(url.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("graphql '{path}' remote_schema_urls"),
                    message: format!("Remote schema '{url}' is listed more than once"),
                });
            }
        }
        errors
    }

    fn validate_retry(retry: &RetryConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !retry.factor.is_finite() || retry.factor < 1.0 {
            errors.push(ValidationError::InvalidField {
                field: "retry.factor".to_string(),
                message: "Backoff factor must be a finite number >= 1".to_string(),
            });
        }
        if let Err(e) = humantime::parse_duration(&retry.min_timeout) {
            errors.push(ValidationError::InvalidField {
                field: "retry.min_timeout".to_string(),
                message: format!("'{}' is not a duration: {e}", retry.min_timeout),
            });
        }
        errors
    }

    fn validate_health(health: &HealthConfig) -> Vec<ValidationError> {
        if !health.enabled {
            return Vec::new();
        }
        Self::validate_path(&health.path, "health.path")
            .err()
            .into_iter()
            .collect()
    }

    fn validate_connector(connector: &ConnectorConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if connector.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "connectors.name".to_string(),
            });
        }
        if let Err(e) = Self::validate_url(&connector.url, &format!("connector '{}' url", connector.name)) {
            errors.push(e);
        }
        if connector.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("connector '{}' timeout_secs", connector.name),
                message: "Must be greater than 0".to_string(),
            });
        }
        errors
    }

    fn validate_path(path: &str, context: &str) -> ValidationResult<()> {
        if path.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: "Cannot be empty".to_string(),
            });
        }
        if !path.starts_with('/') {
            return Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: "Paths must start with '/'".to_string(),
            });
        }
        Ok(())
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }
                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Two mounts on the same path would collide in the router.
    fn check_mount_conflicts(config: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut paths: HashSet<&str> = HashSet::new();
        if config.health.enabled {
            paths.insert(config.health.path.as_str());
        }
        for mount in &config.graphql {
            if !paths.insert(mount.path.as_str()) {
                errors.push(ValidationError::MountConflict {
                    message: format!("Path '{}' is mounted more than once", mount.path),
                });
            }
        }
        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> ServerConfig {
        ServerConfig::builder()
            .listen_addr("127.0.0.1:4000")
            .graphql("/graphql", ["http://offers:4001/graphql"])
            .build()
            .unwrap()
    }

    fn failure_message(config: &ServerConfig) -> String {
        match ServerConfigValidator::validate(config) {
            Err(ValidationError::ValidationFailed { message }) => message,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(ServerConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_listen_address() {
        let config = ServerConfig {
            listen_addr: "localhost".to_string(),
            ..minimal_valid_config()
        };
        assert!(failure_message(&config).contains("Invalid listen address"));
    }

    #[test]
    fn validate_rejects_non_http_remote() {
        let mut config = minimal_valid_config();
        config.graphql[0].remote_schema_urls = vec!["ftp://offers/graphql".to_string()];
        assert!(failure_message(&config).contains("URL scheme must be 'http' or 'https'"));
    }

    #[test]
    fn validate_rejects_duplicate_mounts() {
        let mut config = minimal_valid_config();
        config.graphql.push(GraphQLMountConfig {
            path: "/health".to_string(),
            remote_schema_urls: Vec::new(),
        });
        assert!(failure_message(&config).contains("'/health' is mounted more than once"));
    }

    #[test]
    fn validate_aggregates_errors() {
        let mut config = minimal_valid_config();
        config.retry.factor = 0.5;
        config.fetch_timeout = "later".to_string();
        config.graphql[0].path = "graphql".to_string();

        let message = failure_message(&config);
        assert!(message.starts_with("Found 3 validation errors"), "{message}");
        assert!(message.contains("retry.factor"));
        assert!(message.contains("fetch_timeout"));
        assert!(message.contains("must start with '/'"));
    }

    #[test]
    fn validate_checks_connectors() {
        let mut config = minimal_valid_config();
        config.connectors.push(ConnectorConfig {
            name: "pricing".to_string(),
            url: "not a url".to_string(),
            timeout_secs: 0,
        });
        let message = failure_message(&config);
        assert!(message.contains("connector 'pricing' url"));
        assert!(message.contains("connector 'pricing' timeout_secs"));
    }
}
