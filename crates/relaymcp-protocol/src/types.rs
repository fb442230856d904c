//! Identifiers and MCP payload types exchanged by the client runtime.
//!
//! Content blocks, schemas and resource contents are kept as raw
//! [`serde_json::Value`]; the runtime routes them, it does not interpret them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric ID
    Number(i64),
    /// String ID
    String(String),
}

/// JSON-RPC request identifier
pub type RequestId = MessageId;

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<MessageId> for Value {
    fn from(id: MessageId) -> Self {
        match id {
            MessageId::Number(n) => Self::from(n),
            MessageId::String(s) => Self::String(s),
        }
    }
}

/// A tool advertised by a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Programmatic name used in `tools/call`
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the accepted arguments
    #[serde(default)]
    pub input_schema: Value,
}

/// Result of `tools/list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Advertised tools
    pub tools: Vec<Tool>,
    /// Pagination cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Result of `tools/call`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks produced by the tool
    #[serde(default)]
    pub content: Vec<Value>,
    /// Whether the tool reported a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Structured output, if the tool declares one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

/// A resource advertised by a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of `resources/list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Advertised resources
    pub resources: Vec<Resource>,
    /// Pagination cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `resources/read`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Text or blob contents
    #[serde(default)]
    pub contents: Vec<Value>,
}

/// A prompt advertised by a server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
}

/// Result of `prompts/list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Advertised prompts
    pub prompts: Vec<Prompt>,
    /// Pagination cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Result of `prompts/get`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prompt messages
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// `notifications/progress` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    /// Token correlating the notification to a request
    pub progress_token: MessageId,
    /// Progress so far
    pub progress: f64,
    /// Total, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `notifications/cancelled` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotification {
    /// Request ID that was cancelled
    pub request_id: RequestId,
    /// Optional reason for cancellation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_message_id_untagged() {
        let n: MessageId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(n, MessageId::Number(42));
        let s: MessageId = serde_json::from_value(json!("req-1")).unwrap();
        assert_eq!(s, MessageId::from("req-1"));
        assert_eq!(s.to_string(), "req-1");
    }

    #[test]
    fn test_tool_wire_names() {
        let tools: ListToolsResult = serde_json::from_value(json!({
            "tools": [{"name": "echo", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }))
        .unwrap();
        assert_eq!(tools.tools[0].name, "echo");
        assert_eq!(tools.tools[0].input_schema, json!({"type": "object"}));
        assert_eq!(tools.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_progress_notification_wire_shape() {
        let progress: ProgressNotification = serde_json::from_value(json!({
            "progressToken": 7,
            "progress": 0.5,
            "total": 1.0
        }))
        .unwrap();
        assert_eq!(progress.progress_token, MessageId::Number(7));
        assert_eq!(progress.message, None);
    }

    #[test]
    fn test_call_tool_result_defaults() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "hi"}],
            "isError": false
        }))
        .unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.structured_content, None);
    }
}
