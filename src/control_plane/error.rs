//! Error types for the control-plane protocol.

use thiserror::Error;

/// Errors raised while talking to the remote control plane.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControlPlaneError {
    /// Raised when a token cannot be acquired or is rejected after refresh.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Reason reported to the caller.
        message: String,
    },
    /// Raised for non-2xx responses that are not otherwise classified.
    #[error("{context} - http error: {status}")]
    Transport {
        /// HTTP status code returned by the remote side.
        status: u16,
        /// Protocol step that observed the status.
        context: String,
    },
    /// Raised when the remote side refuses a mutating request.
    #[error("request rejected with status {status}: {body}")]
    RemoteRejected {
        /// HTTP status code returned by the remote side.
        status: u16,
        /// Response body, usually a provider error document.
        body: String,
    },
    /// Raised when a response violates the submit/poll protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },
    /// Raised when an asynchronous operation reports `Failed`.
    #[error("asynchronous operation failed, status: {payload}")]
    OperationFailed {
        /// Status document returned by the completion link.
        payload: String,
    },
    /// Raised when an operation stays non-terminal past the poll timeout.
    #[error("timeout after {waited_secs}s waiting for operation {uri}")]
    Timeout {
        /// Target URI of the tracked operation.
        uri: String,
        /// Seconds spent polling.
        waited_secs: u64,
    },
    /// Raised when the HTTP exchange itself fails.
    #[error("http request failed: {message}")]
    Http {
        /// Message reported by the HTTP client.
        message: String,
    },
    /// Raised when a response body cannot be parsed.
    #[error("failed to decode {what}: {message}")]
    Decode {
        /// Document being decoded.
        what: String,
        /// Parser error message.
        message: String,
    },
}

impl ControlPlaneError {
    pub(crate) fn decode(what: &str, err: &serde_json::Error) -> Self {
        Self::Decode {
            what: what.to_owned(),
            message: err.to_string(),
        }
    }
}
