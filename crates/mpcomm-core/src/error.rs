//! Error types for the message-passing substrate.
//!
//! Most public operations that cross the process boundary report failure as a
//! boolean plus a recorded last-error string; internally everything flows
//! through [`CommError`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the communication substrate.
#[derive(Debug, Error)]
pub enum CommError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Addressing and connection errors
    #[error("Invalid endpoint address {address:?}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address} after {attempts} attempts: {message}")]
    ConnectFailed {
        address: String,
        attempts: u32,
        message: String,
    },

    #[error("Connection to {address} lost")]
    ConnectionLost { address: String },

    #[error("Sender is not connected to any endpoint")]
    NotConnected,

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Receiver lifecycle errors
    #[error("Receiver is closed")]
    ReceiverClosed,

    #[error("File session error: {message}")]
    FileSession { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for communication operations.
pub type Result<T> = std::result::Result<T, CommError>;

impl From<std::io::Error> for CommError {
    fn from(err: std::io::Error) -> Self {
        CommError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CommError {
    fn from(err: serde_json::Error) -> Self {
        CommError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CommError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CommError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code for the wire.
    ///
    /// - -32700: Parse error
    /// - -32601: Method not found (raised by the dispatcher, not here)
    /// - -32603: Internal error
    /// - -32000: Connection error
    /// - -32001: File session error
    /// - -32002: Receiver closed
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            CommError::Json { .. } => -32700,

            CommError::ConnectFailed { .. }
            | CommError::ConnectionLost { .. }
            | CommError::NotConnected => -32000,

            CommError::FileSession { .. } | CommError::Io { .. } => -32001,

            CommError::ReceiverClosed => -32002,

            CommError::Validation { .. } | CommError::InvalidAddress { .. } => -32005,

            _ => -32603,
        }
    }

    /// Check if this error should trigger another connection attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommError::Io { .. } | CommError::ConnectionLost { .. } | CommError::Remote { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommError::ConnectFailed {
            address: "http://localhost:8080/MessagePassingComm".into(),
            attempts: 10,
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to http://localhost:8080/MessagePassingComm after 10 attempts: connection refused"
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(CommError::ReceiverClosed.to_rpc_error_code(), -32002);
        assert_eq!(
            CommError::FileSession {
                message: "no open file".into()
            }
            .to_rpc_error_code(),
            -32001
        );
        assert_eq!(CommError::Other("x".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_retryable_errors() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(CommError::from(refused).is_retryable());
        assert!(!CommError::InvalidAddress {
            address: "nope".into(),
            message: "relative URL without a base".into()
        }
        .is_retryable());
    }
}
