//! Errors raised by transports.

use thiserror::Error;

/// Result of a transport operation
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Why a transport operation failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Link could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Open link went away
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No link to use
    #[error("Transport is not connected")]
    NotConnected,

    /// Write failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Read failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Close was not clean
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    /// Payload was not valid JSON-RPC
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deadline passed
    #[error("Operation timed out")]
    Timeout,

    /// Bug in the transport
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<TransportError> for relaymcp_protocol::McpError {
    fn from(err: TransportError) -> Self {
        use relaymcp_protocol::ErrorKind;

        let kind = match &err {
            TransportError::ConnectionFailed(_)
            | TransportError::ConnectionLost(_)
            | TransportError::SendFailed(_)
            | TransportError::ReceiveFailed(_)
            | TransportError::DisconnectFailed(_) => ErrorKind::Transport,
            TransportError::NotConnected => ErrorKind::NotConnected,
            TransportError::SerializationFailed(_) => ErrorKind::Serialization,
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::Internal(_) => ErrorKind::Internal,
        };

        relaymcp_protocol::McpError::new(kind, err.to_string()).with_operation("transport")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_protocol::{ErrorKind, McpError};

    #[test]
    fn test_transport_error_maps_to_kind() {
        let err: McpError = TransportError::SendFailed("pipe closed".into()).into();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(err.message, "Send failed: pipe closed");

        let err: McpError = TransportError::NotConnected.into();
        assert_eq!(err.kind, ErrorKind::NotConnected);

        let err: McpError = TransportError::Timeout.into();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }
}
