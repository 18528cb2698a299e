//! Error types for location-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Location permission denied: {0}")]
    PermissionDenied(String),

    #[error("SMS send failed: {0}")]
    SendFailure(String),

    #[error("Tracking service already running")]
    AlreadyRunning,

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SendFailure("radio off".to_string());
        assert!(err.to_string().contains("radio off"));

        let err = Error::PermissionDenied("ACCESS_FINE_LOCATION".to_string());
        assert!(err.to_string().starts_with("Location permission denied"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
