//! Unified error handling for the relaymcp runtime.
//!
//! Every fallible operation in the workspace returns [`McpResult`]. The
//! [`ErrorKind`] classification is what callers match on; the message is for
//! humans and logs.
//!
//! ## Example
//!
//! ```rust
//! use relaymcp_protocol::error::{ErrorKind, McpError, McpResult};
//!
//! fn lookup() -> McpResult<()> {
//!     Err(McpError::not_connected("client is not connected"))
//! }
//!
//! assert_eq!(lookup().unwrap_err().kind, ErrorKind::NotConnected);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::jsonrpc::{JsonRpcError, JsonRpcErrorCode};

/// Result type alias for relaymcp operations
pub type McpResult<T> = std::result::Result<T, McpError>;

/// Unified error type
///
/// The `context` field is boxed to keep `Result<T, McpError>` small.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct McpError {
    /// Error classification
    pub kind: ErrorKind,
    /// Message for humans
    pub message: String,
    /// Additional context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Box<ErrorContext>>,
}

/// Where the error happened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Method or step in progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Request being served
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Opaque data attached by the remote peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// What went wrong, for callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // === Lifecycle ===
    /// Operation requires a live connection
    NotConnected,
    /// `connect()` called on a connected client
    AlreadyConnected,
    /// Transport failed
    Transport,
    /// Operation timed out
    Timeout,
    /// Operation cancelled
    Cancelled,

    // === Request shape ===
    /// Malformed or illegal request (-32600)
    InvalidRequest,
    /// Unknown method (-32601)
    MethodNotFound,
    /// Bad arguments (-32602)
    InvalidParams,
    /// Field validation failed
    Validation,

    // === Runtime ===
    /// A registered handler failed
    Handler,
    /// Peer violated the protocol
    Protocol,
    /// Serialization error
    Serialization,
    /// Invalid configuration
    Configuration,
    /// Error returned by the remote peer, with its JSON-RPC code
    Rpc {
        /// JSON-RPC error code sent by the peer
        code: i32,
    },
    /// Bug or broken invariant (-32603)
    Internal,
}

impl McpError {
    /// Error of `kind`
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Create a not connected error
    #[must_use]
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConnected, message)
    }

    /// Create an already connected error
    #[must_use]
    pub fn already_connected() -> Self {
        Self::new(ErrorKind::AlreadyConnected, "client is already connected")
    }

    /// Wire failure
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Deadline passed
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// The caller or the peer gave up
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Malformed request or illegal operation
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Unknown method
    #[must_use]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Bad arguments
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    /// Input failed validation
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a handler error
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    /// Peer broke the protocol
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Could not encode or decode
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    /// Rejected settings
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Bug or broken invariant
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create an error from a JSON-RPC error object received from the peer
    ///
    /// The peer's code is preserved in [`ErrorKind::Rpc`] and any `data` lands
    /// in the context.
    #[must_use]
    pub fn rpc(error: JsonRpcError) -> Self {
        let mut err = Self::new(ErrorKind::Rpc { code: error.code }, error.message);
        if let Some(data) = error.data {
            err.context_mut().data = Some(data);
        }
        err
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        self.context
            .get_or_insert_with(|| Box::new(ErrorContext::default()))
    }

    /// Attach the operation
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Attach the request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.context_mut().request_id = Some(request_id.into());
        self
    }

    /// Check if a later attempt could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout | ErrorKind::Transport)
    }

    /// Code used when this error crosses the wire
    #[must_use]
    pub const fn jsonrpc_code(&self) -> i32 {
        self.kind.jsonrpc_code()
    }

    /// Convert into a JSON-RPC error object for an outbound error response
    #[must_use]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        let data = self.context.as_ref().and_then(|ctx| ctx.data.clone());
        JsonRpcError {
            code: self.jsonrpc_code(),
            message: self.message.clone(),
            data,
        }
    }
}

impl ErrorKind {
    /// JSON-RPC code used when this kind crosses the wire
    #[must_use]
    pub const fn jsonrpc_code(self) -> i32 {
        match self {
            Self::InvalidRequest | Self::Protocol => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams | Self::Validation => -32602,
            Self::Internal | Self::Handler | Self::Serialization => -32603,
            Self::NotConnected | Self::AlreadyConnected | Self::Transport => -32000,
            Self::Timeout => -32001,
            Self::Cancelled => -32002,
            Self::Configuration => -32003,
            Self::Rpc { code } => code,
        }
    }

    /// Fixed description of the kind
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotConnected => "Not connected",
            Self::AlreadyConnected => "Already connected",
            Self::Transport => "Transport error",
            Self::Timeout => "Operation timed out",
            Self::Cancelled => "Operation cancelled",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid parameters",
            Self::Validation => "Validation failed",
            Self::Handler => "Handler failed",
            Self::Protocol => "Protocol violation",
            Self::Serialization => "Serialization error",
            Self::Configuration => "Configuration error",
            Self::Rpc { .. } => "Remote error",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc { code } => write!(f, "{} ({code})", self.description()),
            _ => f.write_str(self.description()),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        let kind = if err.is_data() {
            ErrorKind::InvalidParams
        } else {
            ErrorKind::Serialization
        };
        Self::new(kind, format!("JSON error: {err}"))
    }
}

impl From<JsonRpcErrorCode> for McpError {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self::rpc(code.into())
    }
}
