//! Client builder pattern for client construction
//!
//! Provides a fluent interface for configuring client options before creation.

use std::sync::Arc;

use relaymcp_protocol::McpResult;
use relaymcp_transport::Transport;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::handlers::ElicitationHandler;

/// Builder for configuring and creating clients
///
/// # Examples
///
/// ```rust,no_run
/// use relaymcp_client::ClientBuilder;
/// use relaymcp_transport::MemoryTransport;
///
/// # fn example() -> relaymcp_protocol::McpResult<()> {
/// let (transport, _server) = MemoryTransport::pair();
/// let client = ClientBuilder::new()
///     .with_timeout(60_000) // 60 seconds
///     .with_max_retries(10)
///     .with_heartbeat(15_000, 5_000)
///     .build(transport)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    elicitation_handlers: Vec<Arc<dyn ElicitationHandler>>,
}

impl ClientBuilder {
    /// Create a new client builder
    ///
    /// Returns a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the request timeout in milliseconds
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.config.timeout = timeout_ms;
        self
    }

    /// Set the extra send attempts for rejected writes
    pub fn with_send_retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Enable or disable automatic reconnection
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set the reconnection attempts per outage
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the base reconnection delay in milliseconds
    pub fn with_retry_delay(mut self, retry_delay_ms: u64) -> Self {
        self.config.retry_delay = retry_delay_ms;
        self
    }

    /// Set the heartbeat interval and ping timeout in milliseconds
    ///
    /// An interval of 0 disables the heartbeat.
    pub fn with_heartbeat(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.config.heartbeat_interval = interval_ms;
        self.config.heartbeat_timeout = timeout_ms;
        self
    }

    /// Turn the heartbeat off
    pub fn without_heartbeat(mut self) -> Self {
        self.config.heartbeat_interval = 0;
        self
    }

    /// Set the session idle timeout in milliseconds
    pub fn with_session_timeout(mut self, session_timeout_ms: u64) -> Self {
        self.config.session_timeout = session_timeout_ms;
        self
    }

    /// Register an elicitation handler; handlers are tried in the order added
    pub fn with_elicitation_handler(mut self, handler: Arc<dyn ElicitationHandler>) -> Self {
        self.elicitation_handlers.push(handler);
        self
    }

    /// Configuration the client will be built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a client over `transport`
    ///
    /// The client starts out disconnected.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error when the configuration does not
    /// validate.
    pub fn build<T: Transport + 'static>(self, transport: T) -> McpResult<Client<T>> {
        let client = Client::with_config(transport, self.config)?;
        for handler in self.elicitation_handlers {
            // Registered for the life of the client
            let _ = client.register_elicitation_handler(handler);
        }
        Ok(client)
    }
}
