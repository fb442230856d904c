//! Multi-server tool routing
//!
//! A [`MultiServerRouter`] aggregates several tool servers (usually
//! [`Client`](crate::Client)s) behind one view. Tool discovery fans out to
//! every server concurrently; when more than one server offers a tool, the one
//! with the highest configured priority wins, ties going to whichever server
//! was added first.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use relaymcp_protocol::types::{CallToolResult, Tool};
use relaymcp_protocol::{McpError, McpResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Anything the router can send tool traffic to
#[async_trait]
pub trait ToolServer: Send + Sync + fmt::Debug {
    /// Tools the server currently advertises
    async fn list_tools(&self) -> McpResult<Vec<Tool>>;

    /// Invoke `name` on this server
    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<CallToolResult>;

    /// Open the connection
    async fn connect(&self) -> McpResult<()>;

    /// Close the connection
    async fn disconnect(&self) -> McpResult<()>;
}

/// Router-side settings of one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique name within the router
    pub name: String,
    /// Higher wins when several servers offer the same tool
    #[serde(default)]
    pub priority: i32,
}

impl ServerConfig {
    /// Server with priority 0
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
        }
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A tool together with the server that offers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedTool {
    /// Name of the offering server
    pub server_name: String,
    /// The tool as advertised
    #[serde(flatten)]
    pub tool: Tool,
}

#[derive(Clone)]
struct ServerEntry {
    config: ServerConfig,
    server: Arc<dyn ToolServer>,
}

/// Routes tool calls across several servers
#[derive(Default)]
pub struct MultiServerRouter {
    servers: RwLock<Vec<ServerEntry>>,
}

impl MultiServerRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `server` under `config.name`
    ///
    /// # Errors
    ///
    /// Returns [`McpError::invalid_request`] if the name is already taken.
    pub fn add_server(&self, config: ServerConfig, server: Arc<dyn ToolServer>) -> McpResult<()> {
        let mut servers = self.servers.write();
        if servers.iter().any(|entry| entry.config.name == config.name) {
            return Err(McpError::invalid_request(format!(
                "Server '{}' is already registered",
                config.name
            )));
        }
        debug!(server = %config.name, priority = config.priority, "Server added to router");
        servers.push(ServerEntry { config, server });
        Ok(())
    }

    /// Unregister a server; returns whether it was present
    pub fn remove_server(&self, name: &str) -> bool {
        let mut servers = self.servers.write();
        let before = servers.len();
        servers.retain(|entry| entry.config.name != name);
        let removed = servers.len() != before;
        if removed {
            debug!(server = name, "Server removed from router");
        }
        removed
    }

    /// Registered names, in insertion order
    pub fn server_names(&self) -> Vec<String> {
        self.servers
            .read()
            .iter()
            .map(|entry| entry.config.name.clone())
            .collect()
    }

    /// Tools of every server, queried concurrently
    ///
    /// Servers that fail to answer are logged and left out. Results keep
    /// server insertion order, then each server's own tool order.
    pub async fn get_all_tools(&self) -> Vec<RoutedTool> {
        let servers = self.snapshot();
        let listings = join_all(servers.iter().map(|entry| entry.server.list_tools())).await;

        let mut tools = Vec::new();
        for (entry, listing) in servers.iter().zip(listings) {
            match listing {
                Ok(listed) => tools.extend(listed.into_iter().map(|tool| RoutedTool {
                    server_name: entry.config.name.clone(),
                    tool,
                })),
                Err(e) => warn!(
                    server = %entry.config.name,
                    error = %e,
                    "Skipping server that failed to list tools"
                ),
            }
        }
        tools
    }

    /// Name of the server that should handle `tool_name`, if any offers it
    pub async fn get_best_server_for_tool(&self, tool_name: &str) -> Option<String> {
        self.best_server(tool_name)
            .await
            .map(|entry| entry.config.name)
    }

    /// Call `tool_name` on the best server offering it
    ///
    /// # Errors
    ///
    /// Returns [`McpError::invalid_params`] when no server offers the tool,
    /// otherwise whatever the chosen server returns.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> McpResult<CallToolResult> {
        let entry = self.best_server(tool_name).await.ok_or_else(|| {
            McpError::invalid_params(format!("No server provides tool '{tool_name}'"))
        })?;
        debug!(server = %entry.config.name, tool = tool_name, "Routing tool call");
        entry.server.call_tool(tool_name, arguments).await
    }

    /// Connect every server concurrently; one result per server
    pub async fn connect_all(&self) -> Vec<(String, McpResult<()>)> {
        let servers = self.snapshot();
        let results = join_all(servers.iter().map(|entry| entry.server.connect())).await;
        label_results(&servers, results)
    }

    /// Disconnect every server concurrently; one result per server
    pub async fn disconnect_all(&self) -> Vec<(String, McpResult<()>)> {
        let servers = self.snapshot();
        let results = join_all(servers.iter().map(|entry| entry.server.disconnect())).await;
        label_results(&servers, results)
    }

    fn snapshot(&self) -> Vec<ServerEntry> {
        self.servers.read().clone()
    }

    async fn best_server(&self, tool_name: &str) -> Option<ServerEntry> {
        let advertisers: Vec<String> = self
            .get_all_tools()
            .await
            .into_iter()
            .filter(|routed| routed.tool.name == tool_name)
            .map(|routed| routed.server_name)
            .collect();

        // `max_by_key` keeps the last maximum; reverse so the earliest wins ties
        self.snapshot()
            .into_iter()
            .filter(|entry| advertisers.contains(&entry.config.name))
            .rev()
            .max_by_key(|entry| entry.config.priority)
    }
}

fn label_results(
    servers: &[ServerEntry],
    results: Vec<McpResult<()>>,
) -> Vec<(String, McpResult<()>)> {
    servers
        .iter()
        .zip(results)
        .map(|(entry, result)| {
            if let Err(e) = &result {
                warn!(server = %entry.config.name, error = %e, "Server operation failed");
            }
            (entry.config.name.clone(), result)
        })
        .collect()
}

impl fmt::Debug for MultiServerRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiServerRouter")
            .field("servers", &self.server_names())
            .finish()
    }
}
