//! Handler traits for server-initiated requests
//!
//! Servers can ask the client for structured user input ("elicitation"). The
//! host supplies one or more [`ElicitationHandler`]s; the
//! [`ElicitationCoordinator`](crate::ElicitationCoordinator) tries them in
//! registration order and validates what they return.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use relaymcp_client::handlers::{ElicitationHandler, HandlerError, HandlerResult};
//! use relaymcp_protocol::elicitation::{ElicitationRequest, ElicitationResponse, ElicitationValues};
//!
//! #[derive(Debug)]
//! struct StdinHandler;
//!
//! #[async_trait]
//! impl ElicitationHandler for StdinHandler {
//!     async fn handle_elicitation(
//!         &self,
//!         request: ElicitationRequest,
//!     ) -> HandlerResult<ElicitationResponse> {
//!         eprintln!("\n{}", request.title);
//!
//!         let mut values = ElicitationValues::new();
//!         for field in &request.fields {
//!             eprint!("{}: ", field.label);
//!             let mut input = String::new();
//!             std::io::stdin()
//!                 .read_line(&mut input)
//!                 .map_err(|e| HandlerError::Generic { message: e.to_string() })?;
//!             values.insert(field.name.clone(), input.trim().into());
//!         }
//!
//!         Ok(ElicitationResponse::accept(request.id, values))
//!     }
//! }
//! ```

use async_trait::async_trait;
use relaymcp_protocol::McpError;
use relaymcp_protocol::elicitation::{ElicitationRequest, ElicitationResponse};
use thiserror::Error;

/// Why a handler could not answer
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The user backed out
    #[error("Cancelled by the user")]
    UserCancelled,

    /// No answer in time
    #[error("Handler gave no answer within {timeout_seconds}s")]
    Timeout {
        /// Seconds waited
        timeout_seconds: u64,
    },

    /// The collected input was unusable
    #[error("Invalid input: {details}")]
    InvalidInput {
        /// What was wrong
        details: String,
    },

    /// Handler set up wrongly
    #[error("Handler misconfigured: {message}")]
    Configuration {
        /// What is misconfigured
        message: String,
    },

    /// Generic handler error
    #[error("Handler error: {message}")]
    Generic {
        /// Error message
        message: String,
    },

    /// Failure in whatever the handler talks to
    #[error("Handler backend failed: {source}")]
    External {
        /// Underlying error
        #[from]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Mapping used when a handler failure is reported
///
/// | Variant | Kind | JSON-RPC code |
/// |---------|------|---------------|
/// | `UserCancelled` | `Cancelled` | -32002 |
/// | `Timeout` | `Timeout` | -32001 |
/// | `InvalidInput` | `InvalidParams` | -32602 |
/// | `Configuration` | `Configuration` | -32003 |
/// | `Generic`, `External` | `Handler` | -32603 |
///
/// ```rust
/// use relaymcp_client::handlers::HandlerError;
/// use relaymcp_protocol::McpError;
///
/// let error = HandlerError::InvalidInput { details: "age".into() };
/// assert_eq!(McpError::from(&error).jsonrpc_code(), -32602);
/// ```
impl From<&HandlerError> for McpError {
    fn from(error: &HandlerError) -> Self {
        let message = error.to_string();
        match error {
            HandlerError::UserCancelled => Self::cancelled(message),
            HandlerError::Timeout { .. } => Self::timeout(message),
            HandlerError::InvalidInput { .. } => Self::invalid_params(message),
            HandlerError::Configuration { .. } => Self::configuration(message),
            HandlerError::Generic { .. } | HandlerError::External { .. } => Self::handler(message),
        }
    }
}

impl From<HandlerError> for McpError {
    fn from(error: HandlerError) -> Self {
        Self::from(&error)
    }
}

/// Result type for handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Answers server-initiated requests for user input
///
/// The handler presents the request to the user and returns their answer.
/// Returning an error, or an `accept` whose values fail validation, makes the
/// coordinator move on to the next registered handler.
#[async_trait]
pub trait ElicitationHandler: Send + Sync + std::fmt::Debug {
    /// Collect input for `request`
    ///
    /// # Arguments
    ///
    /// * `request` - The request, with its fields and their validation rules
    ///
    /// # Returns
    ///
    /// An `Err` hands the request to the next registered handler.
    async fn handle_elicitation(
        &self,
        request: ElicitationRequest,
    ) -> HandlerResult<ElicitationResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_protocol::ErrorKind;

    #[test]
    fn test_jsonrpc_codes() {
        let code = |error: HandlerError| McpError::from(error).jsonrpc_code();
        assert_eq!(code(HandlerError::UserCancelled), -32002);
        assert_eq!(code(HandlerError::Timeout { timeout_seconds: 5 }), -32001);
        assert_eq!(
            code(HandlerError::Generic {
                message: "x".into()
            }),
            -32603
        );
    }

    #[test]
    fn test_external_errors_convert() {
        let io = std::io::Error::other("display gone");
        let error = HandlerError::from(Box::new(io) as Box<dyn std::error::Error + Send + Sync>);
        let mcp = McpError::from(error);
        assert_eq!(mcp.kind, ErrorKind::Handler);
        assert!(mcp.message.contains("display gone"));
    }
}
