//! Message dispatcher for routing JSON-RPC messages
//!
//! While the connection is up, one background task reads every message from
//! the transport and routes it:
//!
//! - **Responses** → the waiting call, through a oneshot channel
//! - **Requests** → the registered request handler (elicitation, ping)
//! - **Notifications** → the registered notification handler (progress,
//!   elicitation, message subscribers)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          MessageDispatcher                   │
//! │                                              │
//! │  Routing task (started on Connected):        │
//! │  loop {                                      │
//! │    msg = transport.receive().await           │
//! │    match parse(msg) {                        │
//! │      Response => send to oneshot channel     │
//! │      Request => call request_handler         │
//! │      Notification => call notif_handler      │
//! │      closed => call close_handler, stop      │
//! │    }                                         │
//! │  }                                           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! There is only ONE consumer of `transport.receive()`. Handlers are
//! synchronous and run on the routing task, so notifications are observed in
//! arrival order; handlers that need to await spawn their own task.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use relaymcp_protocol::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use relaymcp_protocol::{McpError, McpResult, MessageId};
use relaymcp_transport::{Transport, TransportMessage, TransportState};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handler for server-initiated requests; responsible for replying
pub(crate) type RequestHandler = Arc<dyn Fn(JsonRpcRequest) -> McpResult<()> + Send + Sync>;

/// Handler for server-initiated notifications
pub(crate) type NotificationHandler =
    Arc<dyn Fn(JsonRpcNotification) -> McpResult<()> + Send + Sync>;

/// Called once when the transport reports the peer closed the connection
pub(crate) type CloseHandler = Arc<dyn Fn(Option<String>) + Send + Sync>;

const MAX_CONSECUTIVE_ERRORS: u32 = 20;

/// Routes incoming JSON-RPC messages
///
/// Waiters are registered *before* the request is sent and removed again by
/// the caller when it stops waiting (timeout, cancellation, dropped future),
/// so a response that never arrives does not leak its channel.
pub(crate) struct MessageDispatcher {
    /// Request id → channel of the call waiting for that response
    response_waiters: Mutex<HashMap<MessageId, oneshot::Sender<JsonRpcResponse>>>,

    request_handler: Mutex<Option<RequestHandler>>,
    notification_handler: Mutex<Option<NotificationHandler>>,
    close_handler: Mutex<Option<CloseHandler>>,

    routing_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageDispatcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            response_waiters: Mutex::new(HashMap::new()),
            request_handler: Mutex::new(None),
            notification_handler: Mutex::new(None),
            close_handler: Mutex::new(None),
            routing_task: Mutex::new(None),
        })
    }

    pub(crate) fn set_request_handler(&self, handler: RequestHandler) {
        *self.request_handler.lock() = Some(handler);
        tracing::debug!("Request handler registered with dispatcher");
    }

    pub(crate) fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.lock() = Some(handler);
        tracing::debug!("Notification handler registered with dispatcher");
    }

    pub(crate) fn set_close_handler(&self, handler: CloseHandler) {
        *self.close_handler.lock() = Some(handler);
    }

    /// Register interest in the response to `id`
    ///
    /// Must be called before the request is sent.
    pub(crate) fn wait_for_response(&self, id: MessageId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        tracing::trace!(request_id = %id, "Registered response waiter");
        self.response_waiters.lock().insert(id, tx);
        rx
    }

    /// Forget the waiter for `id`, if it is still registered
    pub(crate) fn remove_waiter(&self, id: &MessageId) {
        if self.response_waiters.lock().remove(id).is_some() {
            tracing::trace!(request_id = %id, "Removed response waiter");
        }
    }

    pub(crate) fn pending_responses(&self) -> usize {
        self.response_waiters.lock().len()
    }

    /// Start routing messages from `transport`, replacing any previous task
    pub(crate) fn start<T: Transport + 'static>(self: &Arc<Self>, transport: Arc<T>) {
        let dispatcher = Arc::downgrade(self);
        let handle = tokio::spawn(Self::route_loop(dispatcher, transport));
        if let Some(previous) = self.routing_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop routing and fail every pending waiter
    ///
    /// Dropping the senders makes each waiting call observe a closed channel.
    pub(crate) fn stop(&self) {
        if let Some(task) = self.routing_task.lock().take() {
            task.abort();
            tracing::debug!("Message dispatcher routing task stopped");
        }
        let failed: Vec<_> = self.response_waiters.lock().drain().collect();
        if !failed.is_empty() {
            tracing::debug!(count = failed.len(), "Failing pending response waiters");
        }
    }

    async fn route_loop<T: Transport + 'static>(dispatcher: Weak<Self>, transport: Arc<T>) {
        tracing::info!("Message dispatcher routing task started");
        let mut consecutive_errors = 0u32;

        loop {
            let result = transport.receive().await;
            let Some(this) = dispatcher.upgrade() else {
                break;
            };

            match result {
                Ok(Some(msg)) => {
                    consecutive_errors = 0;
                    if let Err(e) = this.route_message(&msg) {
                        tracing::error!(error = %e, "Dropping unroutable message");
                    }
                }
                Ok(None) => {
                    this.notify_closed(None);
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;

                    let state = transport.state().await;
                    if matches!(
                        state,
                        TransportState::Disconnected | TransportState::Failed { .. }
                    ) {
                        tracing::error!(error = %e, %state, "Transport failed while receiving");
                        this.notify_closed(Some(e.to_string()));
                        break;
                    }

                    if consecutive_errors == 1 {
                        tracing::error!(error = %e, "Transport receive error");
                    } else if consecutive_errors <= MAX_CONSECUTIVE_ERRORS {
                        tracing::warn!(
                            error = %e,
                            attempt = consecutive_errors,
                            "Transport receive error"
                        );
                    }

                    drop(this);
                    let delay_ms = 100u64.saturating_mul(2u64.saturating_pow(consecutive_errors.min(5)));
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        tracing::info!("Message dispatcher routing task terminated");
    }

    fn notify_closed(&self, reason: Option<String>) {
        let handler = self.close_handler.lock().clone();
        if let Some(handler) = handler {
            handler(reason);
        }
    }

    /// Route one inbound message
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not JSON-RPC. Handler errors are
    /// logged and do not propagate.
    fn route_message(&self, msg: &TransportMessage) -> McpResult<()> {
        let json_msg: JsonRpcMessage = serde_json::from_slice(&msg.payload)
            .map_err(|e| McpError::protocol(format!("Invalid JSON-RPC message: {e}")))?;

        match json_msg {
            JsonRpcMessage::Response(response) => {
                let Some(request_id) = response.request_id().cloned() else {
                    tracing::warn!("Received response with null ID (parse error)");
                    return Ok(());
                };
                let waiter = self.response_waiters.lock().remove(&request_id);
                match waiter {
                    Some(tx) => {
                        tracing::trace!(%request_id, "Routing response");
                        // Receiver may already be gone if the call settled
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::warn!(%request_id, "Received response for unknown/expired request ID");
                    }
                }
            }

            JsonRpcMessage::Request(request) => {
                tracing::debug!(
                    method = %request.method,
                    request_id = %request.id,
                    "Routing server-initiated request"
                );
                let handler = self.request_handler.lock().clone();
                match handler {
                    Some(handler) => {
                        if let Err(e) = handler(request) {
                            tracing::error!(error = %e, "Request handler error");
                        }
                    }
                    None => {
                        tracing::warn!(method = %request.method, "Received server request but no handler registered");
                    }
                }
            }

            JsonRpcMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, "Routing server notification");
                let handler = self.notification_handler.lock().clone();
                if let Some(handler) = handler {
                    if let Err(e) = handler(notification) {
                        tracing::error!(error = %e, "Notification handler error");
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("pending_responses", &self.pending_responses())
            .field("routing", &self.routing_task.lock().is_some())
            .finish()
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.routing_task.get_mut().take() {
            task.abort();
        }
    }
}
