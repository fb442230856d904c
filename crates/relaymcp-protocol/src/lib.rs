//! # relaymcp Protocol
//!
//! Wire-level building blocks shared by the relaymcp transport and client
//! crates:
//!
//! - **JSON-RPC**: request, response and notification envelopes ([`jsonrpc`])
//! - **Types**: message identifiers and the tool, resource, prompt, progress
//!   and cancellation payloads ([`types`])
//! - **Elicitation**: server-initiated form requests, field definitions and
//!   validation codes ([`elicitation`])
//! - **Errors**: the unified [`McpError`] with its [`ErrorKind`] classification
//!
//! ```rust
//! use relaymcp_protocol::jsonrpc::JsonRpcMessage;
//!
//! let msg: JsonRpcMessage =
//!     serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
//! assert_eq!(msg.method(), Some("ping"));
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,  // Too pedantic for library APIs
    clippy::return_self_not_must_use  // Constructor methods don't need must_use
)]

pub mod elicitation;
pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod types;

pub use error::{ErrorContext, ErrorKind, McpError, McpResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse,
};
pub use types::{MessageId, RequestId};
