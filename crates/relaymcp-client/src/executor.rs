//! Request execution
//!
//! [`RequestExecutor`] issues calls while the client is connected. Each call
//! gets a fresh request id, is tracked in the active-request map together
//! with its [`CancellationToken`], may stream progress to a callback, and is
//! raced against its timeout and its token. Whatever ends the call (success,
//! error, cancellation, timeout, or the caller dropping the future) the same
//! cleanup runs.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relaymcp_protocol::types::{
    CallToolParams, CallToolResult, CancelledNotification, GetPromptResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Prompt, ReadResourceResult, Resource, Tool,
};
use relaymcp_protocol::{McpError, McpResult, RequestId, methods};
use relaymcp_transport::Transport;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::config::ClientConfig;
use crate::connection::ConnectionController;
use crate::progress::{ProgressCallback, ProgressRouter};
use crate::protocol::ProtocolClient;
use crate::session::SessionStore;
use crate::stats::{ClientStats, StatsRecorder};
use crate::subscribers::Subscription;

/// Most pages one listing follows before giving up
const MAX_PAGES: usize = 1_000;

/// Per-call options
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Token the caller can fire to abandon the call
    pub cancellation_token: Option<CancellationToken>,
    /// Receives `notifications/progress` for this call
    pub on_progress: Option<ProgressCallback>,
    /// Overrides the configured request timeout
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the call cancellable through `token`
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Stream progress updates to `callback`
    #[must_use]
    pub fn with_progress(
        mut self,
        callback: impl Fn(&relaymcp_protocol::types::ProgressNotification) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Use `timeout` instead of the configured request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("cancellation_token", &self.cancellation_token)
            .field("on_progress", &self.on_progress.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Issues calls on a connected client
pub struct RequestExecutor<T: Transport + 'static> {
    config: ClientConfig,
    protocol: Arc<ProtocolClient<T>>,
    connection: ConnectionController<T>,
    stats: Arc<StatsRecorder>,
    session: Arc<SessionStore>,
    progress: Arc<ProgressRouter>,
    active: Arc<DashMap<RequestId, CancellationToken>>,
}

/// Cursors seen by one paginated listing
struct Pagination {
    method: &'static str,
    seen: HashSet<String>,
}

impl Pagination {
    fn new(method: &'static str) -> Self {
        Self {
            method,
            seen: HashSet::new(),
        }
    }

    /// Cursor of the next page, or `None` once the listing is complete
    fn advance(&mut self, next: Option<String>) -> McpResult<Option<String>> {
        let Some(cursor) = next else {
            return Ok(None);
        };
        if self.seen.len() + 1 >= MAX_PAGES {
            return Err(McpError::protocol(format!(
                "{} returned more than {MAX_PAGES} pages",
                self.method
            )));
        }
        if !self.seen.insert(cursor.clone()) {
            return Err(McpError::protocol(format!(
                "{} repeated cursor '{cursor}'",
                self.method
            )));
        }
        Ok(Some(cursor))
    }
}

/// Removes a call's bookkeeping however the call ends
struct InFlightGuard {
    active: Arc<DashMap<RequestId, CancellationToken>>,
    id: RequestId,
    progress: Option<Subscription>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
        if let Some(subscription) = self.progress.take() {
            subscription.unsubscribe();
        }
    }
}

impl<T: Transport + 'static> RequestExecutor<T> {
    pub(crate) fn new(
        config: ClientConfig,
        protocol: Arc<ProtocolClient<T>>,
        connection: ConnectionController<T>,
        stats: Arc<StatsRecorder>,
        session: Arc<SessionStore>,
        progress: Arc<ProgressRouter>,
    ) -> Self {
        Self {
            config,
            protocol,
            connection,
            stats,
            session,
            progress,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Issue `method` and wait for its result
    ///
    /// # Errors
    ///
    /// - `NotConnected` unless the client is connected; nothing is sent and
    ///   no counter moves
    /// - `Cancelled` when the call's token fires first
    /// - `Timeout` when no response arrives in time
    /// - `Rpc` with the server's code when the server answers with an error
    /// - `Transport` when the message cannot be sent or the connection drops
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        options: CallOptions,
    ) -> McpResult<Value> {
        if !self.connection.is_connected() {
            return Err(McpError::not_connected(format!(
                "cannot call {method}: client is not connected"
            )));
        }
        self.stats.record_request();

        let id = self.protocol.next_request_id();
        let token = options.cancellation_token.unwrap_or_default();
        let timeout = options.timeout.unwrap_or_else(|| self.config.request_timeout());

        self.active.insert(id.clone(), token.clone());
        let mut guard = InFlightGuard {
            active: Arc::clone(&self.active),
            id: id.clone(),
            progress: None,
        };
        let params = match options.on_progress {
            Some(callback) => {
                guard.progress = Some(self.progress.subscribe(id.clone(), callback));
                Some(with_progress_token(params, &id))
            }
            None => params,
        };

        debug!(request_id = %id, method, "Issuing call");
        let result = if token.is_cancelled() {
            Err(McpError::cancelled(format!("{method} was cancelled before it was sent")))
        } else {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    self.send_cancelled(&id).await;
                    Err(McpError::cancelled(format!("{method} was cancelled")))
                }
                outcome = tokio::time::timeout(
                    timeout,
                    self.protocol.request_with_id(id.clone(), method, params),
                ) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(McpError::timeout(format!(
                        "{method} timed out after {}ms",
                        timeout.as_millis()
                    ))),
                },
            }
        };
        drop(guard);

        match result {
            Ok(value) => {
                self.stats.touch();
                self.session.touch();
                Ok(value)
            }
            Err(e) => {
                self.stats.record_error();
                warn!(request_id = %id, method, error = %e, "Call failed");
                Err(e.with_request_id(id.to_string()))
            }
        }
    }

    /// Invoke a tool
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `Protocol` when the result is malformed.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        options: CallOptions,
    ) -> McpResult<CallToolResult> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let value = self.call(methods::TOOLS_CALL, Some(params), options).await?;
        decode(methods::TOOLS_CALL, value)
    }

    /// Read a resource
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `Protocol` when the result is malformed.
    pub async fn read_resource(
        &self,
        uri: &str,
        options: CallOptions,
    ) -> McpResult<ReadResourceResult> {
        let value = self
            .call(methods::RESOURCES_READ, Some(json!({ "uri": uri })), options)
            .await?;
        decode(methods::RESOURCES_READ, value)
    }

    /// Fetch a prompt
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `Protocol` when the result is malformed.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
        options: CallOptions,
    ) -> McpResult<GetPromptResult> {
        let mut params = Map::new();
        params.insert("name".to_string(), Value::from(name));
        if let Some(arguments) = arguments {
            params.insert("arguments".to_string(), arguments);
        }
        let value = self
            .call(methods::PROMPTS_GET, Some(Value::Object(params)), options)
            .await?;
        decode(methods::PROMPTS_GET, value)
    }

    /// Every tool the server advertises, following pagination
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `Protocol` when a page is malformed,
    /// when the server hands out a cursor it already used, or after
    /// [`MAX_PAGES`] pages.
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut pages = Pagination::new(methods::TOOLS_LIST);
        let mut cursor = None;
        loop {
            let page: ListToolsResult = self.list_page(methods::TOOLS_LIST, cursor).await?;
            tools.extend(page.tools);
            match pages.advance(page.next_cursor)? {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }

    /// Every resource the server advertises, following pagination
    ///
    /// # Errors
    ///
    /// As [`list_tools`](Self::list_tools).
    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut pages = Pagination::new(methods::RESOURCES_LIST);
        let mut cursor = None;
        loop {
            let page: ListResourcesResult =
                self.list_page(methods::RESOURCES_LIST, cursor).await?;
            resources.extend(page.resources);
            match pages.advance(page.next_cursor)? {
                Some(next) => cursor = Some(next),
                None => return Ok(resources),
            }
        }
    }

    /// Every prompt the server advertises, following pagination
    ///
    /// # Errors
    ///
    /// As [`list_tools`](Self::list_tools).
    pub async fn list_prompts(&self) -> McpResult<Vec<Prompt>> {
        let mut prompts = Vec::new();
        let mut pages = Pagination::new(methods::PROMPTS_LIST);
        let mut cursor = None;
        loop {
            let page: ListPromptsResult = self.list_page(methods::PROMPTS_LIST, cursor).await?;
            prompts.extend(page.prompts);
            match pages.advance(page.next_cursor)? {
                Some(next) => cursor = Some(next),
                None => return Ok(prompts),
            }
        }
    }

    /// Round-trip a `ping`
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call).
    pub async fn ping(&self) -> McpResult<()> {
        self.call(methods::PING, None, CallOptions::default())
            .await
            .map(|_| ())
    }

    /// Fire the token of an in-flight call
    ///
    /// Returns `false` if no call with that id is in flight.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        match self.active.remove(id) {
            Some((_, token)) => {
                debug!(request_id = %id, "Cancelling request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of the calls currently in flight, in issue order
    pub fn active_requests(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.active.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    async fn list_page<R: DeserializeOwned>(
        &self,
        method: &str,
        cursor: Option<String>,
    ) -> McpResult<R> {
        let params = cursor.map(|cursor| json!({ "cursor": cursor }));
        let value = self.call(method, params, CallOptions::default()).await?;
        decode(method, value)
    }

    async fn send_cancelled(&self, id: &RequestId) {
        let notification = CancelledNotification {
            request_id: id.clone(),
            reason: Some("cancelled by client".to_string()),
        };
        let params = match serde_json::to_value(notification) {
            Ok(params) => params,
            Err(e) => {
                warn!(request_id = %id, error = %e, "Could not encode cancellation");
                return;
            }
        };
        if let Err(e) = self.protocol.notify(methods::CANCELLED, Some(params)).await {
            debug!(request_id = %id, error = %e, "Cancellation notice not delivered");
        }
    }
}

/// Put `id` into `params._meta.progressToken`
fn with_progress_token(params: Option<Value>, id: &RequestId) -> Value {
    let mut params = match params {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Map::new(),
        Some(other) => return other,
    };
    let meta = params
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("progressToken".to_string(), Value::from(id.clone()));
    }
    Value::Object(params)
}

fn decode<R: DeserializeOwned>(method: &str, value: Value) -> McpResult<R> {
    serde_json::from_value(value)
        .map_err(|e| McpError::protocol(format!("malformed {method} result: {e}")))
}

impl<T: Transport + 'static> fmt::Debug for RequestExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("active_requests", &self.active.len())
            .finish()
    }
}
