//! Client error types

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Endpoint list is empty
    #[error("no server endpoints configured")]
    NoEndpoints,

    /// TCP connect failed or timed out
    #[error("connection failed to {endpoint}: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// No ack within `request_timeout_ms`
    ///
    /// The set may already have been routed.
    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    RequestTimeout { endpoint: String, timeout_ms: u64 },

    /// Server closed the connection before acknowledging
    #[error("{endpoint} closed the connection without an ack")]
    NoAck { endpoint: String },

    /// Server acknowledged but accepted nothing
    #[error("{endpoint} rejected {rejected} message(s)")]
    Rejected { endpoint: String, rejected: u32 },

    /// Every attempt failed
    #[error("all {attempts} attempts failed, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },

    /// Async buffer full (after the block timeout under `block`)
    #[error("async send buffer is full")]
    BufferFull,

    /// Client is shut down
    #[error("client is shut down")]
    Closed,

    /// Wire / contract error
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl ClientError {
    /// The request was written but its outcome is unknown
    ///
    /// Re-sending could duplicate messages, so callers must not retry.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    pub fn connection_failed(endpoint: impl Into<String>, source: std::io::Error) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.into(),
            source,
        }
    }
}
