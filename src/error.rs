use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when delivering log entries to a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to deliver log batch: {0}")]
    DeliveryFailed(String),

    #[error("Transport is closed: {0}")]
    Closed(String),

    #[error("Failed to serialize log entry: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur when dispatching an alert to an action
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to dispatch alert: {0}")]
    DispatchFailed(String),

    #[error("No alert action registered under '{0}'")]
    UnknownAction(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading or rule/budget registration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = ConfigError::ValidationError("threshold must be finite".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration value: threshold must be finite"
        );
    }

    #[test]
    fn test_read_error_names_the_file() {
        let err = ConfigError::ReadError {
            path: PathBuf::from("/etc/vigil.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read config file /etc/vigil.toml: missing"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unknown_action_message() {
        let err = AlertError::UnknownAction("pager".to_string());
        assert_eq!(err.to_string(), "No alert action registered under 'pager'");
    }

    #[test]
    fn test_transport_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: TransportError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
