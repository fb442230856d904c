//! Protocol client for JSON-RPC communication
//!
//! [`ProtocolClient`] does request/response correlation and serialization on
//! top of the raw [`Transport`]. It never calls `transport.receive()` itself;
//! responses come back through the [`MessageDispatcher`]:
//!
//! ```text
//! ProtocolClient::request_with_id()
//!     ↓
//!   1. Register oneshot channel with dispatcher
//!   2. Send request via transport
//!   3. Wait on oneshot channel
//!     ↓
//! MessageDispatcher (routing task)
//!     ↓
//!   Routes responses → oneshot channels
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use relaymcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use relaymcp_protocol::{McpError, McpResult, MessageId, RequestId};
use relaymcp_transport::{Transport, TransportMessage};
use serde::Serialize;
use serde_json::Value;

use crate::dispatcher::MessageDispatcher;

/// JSON-RPC protocol handler shared by the connection controller and the
/// request executor
#[derive(Debug)]
pub(crate) struct ProtocolClient<T: Transport> {
    transport: Arc<T>,
    dispatcher: Arc<MessageDispatcher>,
    next_id: AtomicI64,
    /// Extra send attempts when the transport rejects a write
    send_retries: u32,
}

/// Removes a response waiter when the waiting call goes away, whatever the
/// reason
struct WaiterGuard<'a> {
    dispatcher: &'a MessageDispatcher,
    id: &'a MessageId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.remove_waiter(self.id);
    }
}

impl<T: Transport + 'static> ProtocolClient<T> {
    pub(crate) fn new(transport: T, send_retries: u32) -> Self {
        Self {
            transport: Arc::new(transport),
            dispatcher: MessageDispatcher::new(),
            next_id: AtomicI64::new(1),
            send_retries,
        }
    }

    pub(crate) fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub(crate) fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        MessageId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) async fn connect(&self) -> McpResult<()> {
        self.transport.connect().await.map_err(McpError::from)
    }

    pub(crate) async fn disconnect(&self) -> McpResult<()> {
        self.transport.disconnect().await.map_err(McpError::from)
    }

    /// Send a request under a fresh id and wait at most `timeout` for the result
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        let id = self.next_request_id();
        match tokio::time::timeout(timeout, self.request_with_id(id, method, params)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(format!(
                "{method} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Send a request under `id` and wait for its result
    ///
    /// There is no timeout here; callers race this future against their own
    /// deadline and cancellation. Dropping the future removes the waiter.
    pub(crate) async fn request_with_id(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<Value> {
        let request = JsonRpcRequest::new(method, params, id.clone());

        // Register BEFORE sending so a fast response is not lost
        let response_receiver = self.dispatcher.wait_for_response(id.clone());
        let _guard = WaiterGuard {
            dispatcher: &self.dispatcher,
            id: &id,
        };

        self.send_json(id.clone(), &request).await?;

        let response = response_receiver
            .await
            .map_err(|_| McpError::transport("connection closed before a response arrived"))?;

        response.into_result().map_err(McpError::rpc)
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        let id = MessageId::String(format!("notify-{method}"));
        self.send_json(id, &notification).await
    }

    pub(crate) async fn respond(&self, response: JsonRpcResponse) -> McpResult<()> {
        let id = response
            .request_id()
            .cloned()
            .unwrap_or_else(|| MessageId::String("response".to_string()));
        self.send_json(id, &response).await
    }

    /// Serialize and send, retrying retryable failures up to `send_retries` times
    async fn send_json<M: Serialize>(&self, id: MessageId, message: &M) -> McpResult<()> {
        let message = TransportMessage::from_json(id, message)?;

        let mut attempt = 0u32;
        loop {
            let error = match self.transport.send(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => McpError::from(e),
            };
            if attempt >= self.send_retries || !error.is_retryable() {
                return Err(error);
            }
            attempt += 1;
            tracing::warn!(
                message_id = %message.id,
                attempt,
                error = %error,
                "Transport send failed, retrying"
            );
        }
    }
}
