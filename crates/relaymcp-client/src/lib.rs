//! # relaymcp Client
//!
//! Client runtime for JSON-RPC tool servers. It sits between a host
//! application and a remote server and owns everything except the wire:
//!
//! - Connection lifecycle with exponential-backoff reconnection and heartbeat
//! - Calls with per-request cancellation, timeouts and progress streaming
//! - Statistics and session metadata
//! - Server-initiated elicitation with handler fallback and field validation
//! - Routing tool calls across several servers by priority
//!
//! ## Architecture
//!
//! ```text
//! Application Layer
//!        ↓
//! Client API (this crate)
//!        ↓
//! Protocol Layer (relaymcp-protocol)
//!        ↓
//! Transport Layer (relaymcp-transport)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relaymcp_client::{CallOptions, CancellationToken, ClientBuilder};
//! use relaymcp_transport::MemoryTransport;
//!
//! # async fn example() -> relaymcp_protocol::McpResult<()> {
//! let (transport, _server) = MemoryTransport::pair();
//! let client = ClientBuilder::new().with_timeout(10_000).build(transport)?;
//!
//! client.on_state_change(|state| println!("connection is {state}"));
//! client.connect().await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {} - {}", tool.name, tool.description.as_deref().unwrap_or("No description"));
//! }
//!
//! let token = CancellationToken::new();
//! let options = CallOptions::new().with_cancellation(token.clone());
//! match client.call_tool("my_tool", None, options).await {
//!     Ok(result) => println!("Tool result: {:?}", result),
//!     Err(e) => eprintln!("Tool call failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Elicitation
//!
//! Register an [`ElicitationHandler`](handlers::ElicitationHandler) to answer
//! server-initiated input requests; see the [`handlers`] module.

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

mod builder;
mod cancellation;
mod client;
mod config;
mod connection;
mod dispatcher;
pub mod elicitation;
mod executor;
pub mod handlers;
mod progress;
mod protocol;
mod router;
mod session;
mod stats;
mod subscribers;

pub use builder::ClientBuilder;
pub use cancellation::CancellationToken;
pub use client::Client;
pub use config::ClientConfig;
pub use connection::{ConnectionController, ConnectionState};
pub use elicitation::ElicitationCoordinator;
pub use executor::{CallOptions, RequestExecutor};
pub use progress::ProgressCallback;
pub use router::{MultiServerRouter, RoutedTool, ServerConfig, ToolServer};
pub use session::{SessionContext, SessionUpdate};
pub use stats::ClientStats;
pub use subscribers::{Subscription, SubscriptionId};
