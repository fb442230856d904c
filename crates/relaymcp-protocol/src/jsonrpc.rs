//! # JSON-RPC 2.0 envelopes
//!
//! Requests, responses and notifications as exchanged with the server. Batches
//! are not part of the protocol and are rejected at parse time.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::RequestId;

/// The `"jsonrpc": "2.0"` marker; anything else fails to parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl JsonRpcVersion {
    const WIRE: &'static str = "2.0";
}

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(Self::WIRE)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == Self::WIRE {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version '{version}'"
            )))
        }
    }
}

/// Call that expects exactly one response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Version marker
    pub jsonrpc: JsonRpcVersion,
    /// Method to invoke
    pub method: String,
    /// Method arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlates the response
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Request for `method` under `id`
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }
}

/// One-way message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Version marker
    pub jsonrpc: JsonRpcVersion,
    /// Notification name
    pub method: String,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Notification for `method`
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// Either half of a response; `result` and `error` never appear together
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Outcome {
    Result { result: Value },
    Error { error: JsonRpcError },
}

/// Answer to a [`JsonRpcRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Version marker
    pub jsonrpc: JsonRpcVersion,
    #[serde(flatten)]
    outcome: Outcome,
    /// `null` when the peer could not read the request id
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    /// Successful answer to `id`
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            outcome: Outcome::Result { result },
            id: Some(id),
        }
    }

    /// Failed answer to `id`
    pub fn error_response(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            outcome: Outcome::Error { error },
            id: Some(id),
        }
    }

    /// Whether the peer reported an error
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error { .. })
    }

    /// Result of a successful response
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result { result } => Some(result),
            Outcome::Error { .. } => None,
        }
    }

    /// Error of a failed response
    pub fn error(&self) -> Option<&JsonRpcError> {
        match &self.outcome {
            Outcome::Error { error } => Some(error),
            Outcome::Result { .. } => None,
        }
    }

    /// Id of the request being answered
    pub fn request_id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Consume the response into its result or the peer's error
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.outcome {
            Outcome::Result { result } => Ok(result),
            Outcome::Error { error } => Err(error),
        }
    }
}

/// Error member of a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric code, see [`JsonRpcErrorCode`]
    pub code: i32,
    /// Short description
    pub message: String,
    /// Structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Error without `data`
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Error carrying `data`
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(code, message)
        }
    }

    /// `-32601` for `method`
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound.code(),
            format!("Method not found: {method}"),
        )
    }
}

/// Codes reserved by JSON-RPC 2.0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// `-32700`
    ParseError,
    /// `-32600`
    InvalidRequest,
    /// `-32601`
    MethodNotFound,
    /// `-32602`
    InvalidParams,
    /// `-32603`
    InternalError,
    /// Anything outside the reserved set
    Other(i32),
}

impl JsonRpcErrorCode {
    /// Numeric value
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Other(code) => code,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Other(_) => "Server error",
        }
    }
}

impl From<i32> for JsonRpcErrorCode {
    fn from(code: i32) -> Self {
        [
            Self::ParseError,
            Self::InvalidRequest,
            Self::MethodNotFound,
            Self::InvalidParams,
            Self::InternalError,
        ]
        .into_iter()
        .find(|known| known.code() == code)
        .unwrap_or(Self::Other(code))
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.describe(), self.code())
    }
}

impl From<JsonRpcErrorCode> for JsonRpcError {
    fn from(code: JsonRpcErrorCode) -> Self {
        Self::new(code.code(), code.describe())
    }
}

/// Any single message on the wire
///
/// Untagged, so variant order decides: a request has `id` and `method`, a
/// response `id` and `result`/`error`, a notification only `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Call expecting a response
    Request(JsonRpcRequest),
    /// Answer to an earlier call
    Response(JsonRpcResponse),
    /// One-way message
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Method of a request or notification
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(&request.method),
            Self::Notification(notification) => Some(&notification.method),
            Self::Response(_) => None,
        }
    }
}
