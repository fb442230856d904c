//! # relaymcp Transport
//!
//! The transport adapter consumed by the relaymcp client runtime. A transport
//! only has to connect, disconnect, send one message and receive one message;
//! framing, process pipes and HTTP live in the concrete implementation.
//!
//! ## Overview
//!
//! - **Traits**: [`Transport`]
//! - **Types**: [`TransportState`], [`TransportMessage`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **In-process**: [`MemoryTransport`] and its [`MemoryPeer`], for embedding
//!   a server in the same process and for tests

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod error;
mod memory;
mod message;
mod traits;

pub use error::{TransportError, TransportResult};
pub use memory::{MemoryPeer, MemoryTransport};
pub use message::TransportMessage;
pub use traits::{Transport, TransportFuture, TransportState};
