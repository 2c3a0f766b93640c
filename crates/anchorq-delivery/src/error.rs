//! Error types for anchoring delivery operations.
//!
//! Defines the failure conditions that can occur while dispatching a queue
//! entry, with enough context for retry decisions and for the diagnostic
//! message persisted on the entry.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for anchoring delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// The anchoring service answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        /// HTTP status code of the response.
        status: u16,
        /// Error detail extracted from the response body.
        message: String,
    },

    /// The payload snapshot could not be serialized or parsed.
    #[error("payload serialization failed: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// All internal attempts for one dispatch exhausted.
    #[error("all {attempts} attempts failed; last error: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Message of the final attempt's failure.
        last_error: String,
    },

    /// Database operation failed during dispatch.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid client or processor configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an HTTP status error from a response.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::HttpStatus { status, message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::RetriesExhausted { attempts, last_error: last_error.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this failure is worth another queue-level attempt.
    ///
    /// Network failures, timeouts, and HTTP error statuses are transient.
    /// An exhausted fast-attempt series is also retryable here: the client
    /// gave up for now, the queue tries again after backoff. Serialization
    /// failures are deterministic and configuration errors need operator
    /// action, so neither is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::RetriesExhausted { .. }
            | Self::Storage(_) => true,

            Self::Serialization { .. } | Self::Configuration { .. } => false,
        }
    }
}

impl From<anchorq_core::CoreError> for DeliveryError {
    fn from(err: anchorq_core::CoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(30).is_retryable());
        assert!(DeliveryError::http_status(500, "internal server error").is_retryable());
        assert!(DeliveryError::http_status(400, "bad request").is_retryable());
        assert!(DeliveryError::storage("connection lost").is_retryable());
        assert!(DeliveryError::retries_exhausted(3, "timeout").is_retryable());

        assert!(!DeliveryError::serialization("invalid payload").is_retryable());
        assert!(!DeliveryError::configuration("invalid URL").is_retryable());
    }

    #[test]
    fn error_display_format() {
        let error = DeliveryError::timeout(30);
        assert_eq!(error.to_string(), "request timeout after 30s");

        let error = DeliveryError::retries_exhausted(3, "connection refused");
        assert_eq!(
            error.to_string(),
            "all 3 attempts failed; last error: connection refused"
        );

        let error = DeliveryError::http_status(502, "bad gateway");
        assert_eq!(error.to_string(), "HTTP 502: bad gateway");
    }
}
