//! The `Client<T>` facade
//!
//! [`Client`] wires the runtime together around one transport: the
//! [`ConnectionController`] drives the lifecycle, the [`RequestExecutor`]
//! issues calls, the [`ElicitationCoordinator`] answers server-initiated
//! elicitations and the session store carries host metadata. The dispatcher
//! task feeds every inbound message back into the client:
//!
//! - responses go to the call waiting for them
//! - `notifications/progress` go to the progress subscribers of their token
//! - every notification goes to [`Client::on_notification`] subscribers
//! - `elicitation/request` notifications and `elicitation/create` requests go
//!   to the coordinator, and the answer is sent back on the same transport
//! - `ping` requests are answered, other requests get "method not found"
//!
//! `Client<T>` is cheaply cloneable; all clones share one connection.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use relaymcp_protocol::elicitation::ElicitationResponse;
use relaymcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use relaymcp_protocol::types::{
    CallToolResult, GetPromptResult, ProgressNotification, Prompt, ReadResourceResult, Resource,
    Tool,
};
use relaymcp_protocol::{McpError, McpResult, RequestId, methods};
use relaymcp_transport::Transport;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionController, ConnectionState};
use crate::elicitation::ElicitationCoordinator;
use crate::executor::{CallOptions, RequestExecutor};
use crate::handlers::ElicitationHandler;
use crate::progress::ProgressRouter;
use crate::protocol::ProtocolClient;
use crate::router::ToolServer;
use crate::session::{SessionContext, SessionStore, SessionUpdate};
use crate::stats::{ClientStats, StatsRecorder};
use crate::subscribers::{SubscriberRegistry, Subscription};

type NotificationObserver = dyn Fn(&JsonRpcNotification) + Send + Sync;

struct ClientInner<T: Transport + 'static> {
    config: ClientConfig,
    protocol: Arc<ProtocolClient<T>>,
    connection: ConnectionController<T>,
    executor: RequestExecutor<T>,
    elicitation: Arc<ElicitationCoordinator>,
    session: Arc<SessionStore>,
    progress: Arc<ProgressRouter>,
    notifications: Arc<SubscriberRegistry<NotificationObserver>>,
}

/// RPC client runtime bound to one transport
///
/// # Examples
///
/// ```rust,no_run
/// use relaymcp_client::{CallOptions, Client};
/// use relaymcp_transport::MemoryTransport;
///
/// # async fn example() -> relaymcp_protocol::McpResult<()> {
/// let (transport, _server) = MemoryTransport::pair();
/// let client = Client::new(transport);
/// client.connect().await?;
///
/// let options = CallOptions::new().with_progress(|p| println!("{}", p.progress));
/// let result = client
///     .call_tool("search", Some(serde_json::json!({"q": "rust"})), options)
///     .await?;
/// println!("{:?}", result.content);
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport + 'static> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport + 'static> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> Client<T> {
    /// Client with the default configuration
    pub fn new(transport: T) -> Self {
        Self::assemble(transport, ClientConfig::default())
    }

    /// Client with `config`
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when `config` does not validate.
    pub fn with_config(transport: T, config: ClientConfig) -> McpResult<Self> {
        config.validate()?;
        Ok(Self::assemble(transport, config))
    }

    fn assemble(transport: T, config: ClientConfig) -> Self {
        let protocol = Arc::new(ProtocolClient::new(transport, config.retries));
        let stats = Arc::new(StatsRecorder::default());
        let session = Arc::new(SessionStore::default());
        let progress = Arc::new(ProgressRouter::default());

        let connection =
            ConnectionController::new(config.clone(), Arc::clone(&protocol), Arc::clone(&stats));
        let executor = RequestExecutor::new(
            config.clone(),
            Arc::clone(&protocol),
            connection.clone(),
            stats,
            Arc::clone(&session),
            Arc::clone(&progress),
        );

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                protocol,
                connection,
                executor,
                elicitation: Arc::new(ElicitationCoordinator::new()),
                session,
                progress,
                notifications: SubscriberRegistry::new(),
            }),
        };
        client.register_dispatcher_handlers();
        client
    }

    /// Route server-initiated traffic back into this client
    ///
    /// The dispatcher only holds weak references, so dropping the last client
    /// handle still tears everything down.
    fn register_dispatcher_handlers(&self) {
        let dispatcher = self.inner.protocol.dispatcher();

        let weak: Weak<ClientInner<T>> = Arc::downgrade(&self.inner);
        dispatcher.set_request_handler(Arc::new(move |request: JsonRpcRequest| {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move { inner.handle_server_request(request).await });
            }
            Ok(())
        }));

        let weak: Weak<ClientInner<T>> = Arc::downgrade(&self.inner);
        dispatcher.set_notification_handler(Arc::new(move |notification: JsonRpcNotification| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_notification(notification);
            }
            Ok(())
        }));

        debug!("Dispatcher handlers registered");
    }

    // Lifecycle

    /// Connect the transport
    ///
    /// # Errors
    ///
    /// See [`ConnectionController::connect`].
    pub async fn connect(&self) -> McpResult<()> {
        self.inner.connection.connect().await
    }

    /// Disconnect the transport and stop background work
    ///
    /// # Errors
    ///
    /// See [`ConnectionController::disconnect`].
    pub async fn disconnect(&self) -> McpResult<()> {
        self.inner.connection.disconnect().await
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Whether calls can be issued
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Observe connection state transitions
    pub fn on_state_change(
        &self,
        observer: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.connection.on_state_change(observer)
    }

    /// Observe every inbound notification
    pub fn on_notification(
        &self,
        observer: impl Fn(&JsonRpcNotification) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.notifications.subscribe(Arc::new(observer))
    }

    /// The connection controller
    pub fn connection(&self) -> &ConnectionController<T> {
        &self.inner.connection
    }

    // Calls

    /// Issue an arbitrary request
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::call`].
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> McpResult<Value> {
        self.inner.executor.call(method, params, options).await
    }

    /// Invoke a tool
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::call_tool`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        options: CallOptions,
    ) -> McpResult<CallToolResult> {
        self.inner.executor.call_tool(name, arguments, options).await
    }

    /// Read a resource
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::read_resource`].
    pub async fn read_resource(
        &self,
        uri: &str,
        options: CallOptions,
    ) -> McpResult<ReadResourceResult> {
        self.inner.executor.read_resource(uri, options).await
    }

    /// Fetch a prompt
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::get_prompt`].
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
        options: CallOptions,
    ) -> McpResult<GetPromptResult> {
        self.inner.executor.get_prompt(name, arguments, options).await
    }

    /// Every advertised tool
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::list_tools`].
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.inner.executor.list_tools().await
    }

    /// Every advertised resource
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::list_resources`].
    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        self.inner.executor.list_resources().await
    }

    /// Every advertised prompt
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::list_prompts`].
    pub async fn list_prompts(&self) -> McpResult<Vec<Prompt>> {
        self.inner.executor.list_prompts().await
    }

    /// Round-trip a `ping`
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::ping`].
    pub async fn ping(&self) -> McpResult<()> {
        self.inner.executor.ping().await
    }

    /// Cancel an in-flight call; returns whether it was found
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        self.inner.executor.cancel_request(id)
    }

    /// Ids of the calls in flight
    pub fn active_requests(&self) -> Vec<RequestId> {
        self.inner.executor.active_requests()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ClientStats {
        self.inner.executor.stats()
    }

    // Session

    /// Create the session or merge `update` into it
    pub fn set_session_context(&self, update: SessionUpdate) -> SessionContext {
        self.inner.session.set(update)
    }

    /// Current session, if any
    pub fn session_context(&self) -> Option<SessionContext> {
        self.inner.session.get()
    }

    /// Drop the session
    pub fn clear_session_context(&self) {
        self.inner.session.clear();
    }

    /// Whether the session has been idle longer than the configured timeout
    pub fn is_session_expired(&self) -> bool {
        self.inner
            .session
            .get()
            .is_some_and(|session| session.is_expired(self.inner.config.session_timeout()))
    }

    // Elicitation

    /// Add an elicitation handler after those already registered
    pub fn register_elicitation_handler(&self, handler: Arc<dyn ElicitationHandler>) -> Subscription {
        self.inner.elicitation.register_handler(handler)
    }

    /// The elicitation coordinator
    pub fn elicitation(&self) -> &ElicitationCoordinator {
        &self.inner.elicitation
    }

    /// Configuration the client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl<T: Transport + 'static> ClientInner<T> {
    async fn handle_server_request(&self, request: JsonRpcRequest) {
        let JsonRpcRequest {
            method, params, id, ..
        } = request;

        let response = match method.as_str() {
            methods::PING => JsonRpcResponse::success(json!({}), id),
            methods::ELICITATION_CREATE => {
                let outcome = self
                    .elicitation
                    .handle_value(params.unwrap_or(Value::Null))
                    .await
                    .and_then(|response| serde_json::to_value(response).map_err(McpError::from));
                match outcome {
                    Ok(result) => JsonRpcResponse::success(result, id),
                    Err(e) => {
                        warn!(request_id = %id, error = %e, "Rejecting elicitation request");
                        JsonRpcResponse::error_response(e.to_jsonrpc_error(), id)
                    }
                }
            }
            other => {
                debug!(method = other, request_id = %id, "Unsupported server request");
                JsonRpcResponse::error_response(McpError::method_not_found(other).to_jsonrpc_error(), id)
            }
        };

        if let Err(e) = self.protocol.respond(response).await {
            error!(method = %method, error = %e, "Failed to answer server request");
        }
    }

    fn handle_notification(self: Arc<Self>, notification: JsonRpcNotification) {
        if notification.method == methods::PROGRESS {
            let params = notification.params.clone().unwrap_or(Value::Null);
            match serde_json::from_value::<ProgressNotification>(params) {
                Ok(progress) => {
                    self.progress.dispatch(&progress);
                }
                Err(e) => warn!(error = %e, "Ignoring malformed progress notification"),
            }
        }

        self.notifications
            .emit("notification", |observer| observer(&notification));

        if notification.method == methods::ELICITATION_REQUEST {
            let params = notification.params.unwrap_or(Value::Null);
            tokio::spawn(async move { self.answer_elicitation_notification(params).await });
        }
    }

    async fn answer_elicitation_notification(&self, params: Value) {
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);

        let response = match self.elicitation.try_handle_value(params).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                warn!(request_id = ?id, "Ignoring elicitation request for an id already in progress");
                return;
            }
            Err(e) => match id {
                Some(id) => {
                    warn!(request_id = %id, error = %e, "Cancelling malformed elicitation request");
                    ElicitationResponse::cancel(id, Some(e.message))
                }
                None => {
                    error!(error = %e, "Dropping elicitation request without an id");
                    return;
                }
            },
        };

        let request_id = response.id().to_string();
        let sent = match serde_json::to_value(response) {
            Ok(params) => {
                self.protocol
                    .notify(methods::ELICITATION_RESPONSE, Some(params))
                    .await
            }
            Err(e) => Err(McpError::from(e)),
        };
        if let Err(e) = sent {
            error!(request_id = %request_id, error = %e, "Failed to send elicitation response");
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> ToolServer for Client<T> {
    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.inner.executor.list_tools().await
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<CallToolResult> {
        self.inner
            .executor
            .call_tool(name, arguments, CallOptions::default())
            .await
    }

    async fn connect(&self) -> McpResult<()> {
        self.inner.connection.connect().await
    }

    async fn disconnect(&self) -> McpResult<()> {
        self.inner.connection.disconnect().await
    }
}

impl<T: Transport + 'static> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("transport", self.inner.protocol.transport())
            .field("active_requests", &self.active_requests().len())
            .field("elicitation", &self.inner.elicitation)
            .finish()
    }
}
