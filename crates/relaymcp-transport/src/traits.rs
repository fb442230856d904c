//! The adapter trait between the client runtime and a wire.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::TransportResult;
use crate::message::TransportMessage;

/// Boxed future returned by [`Transport`] methods
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Link state as the transport sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// No link
    Disconnected,
    /// Link being opened
    Connecting,
    /// Messages can flow
    Connected,
    /// Link being closed
    Disconnecting,
    /// Link broke or could not be opened
    Failed {
        /// What broke
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnecting => f.write_str("disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// What a concrete wire has to provide to the client runtime
///
/// Every method takes `&self`; implementations use interior mutability so a
/// single transport can be shared between the dispatcher (the only caller of
/// [`receive`](Transport::receive)) and concurrent senders.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Current link state
    fn state(&self) -> TransportFuture<'_, TransportState>;

    /// Open the link
    fn connect(&self) -> TransportFuture<'_, TransportResult<()>>;

    /// Close the link
    fn disconnect(&self) -> TransportFuture<'_, TransportResult<()>>;

    /// Write one message
    fn send(&self, message: TransportMessage) -> TransportFuture<'_, TransportResult<()>>;

    /// Wait for the next inbound message
    ///
    /// `Ok(None)` means the peer closed the connection.
    fn receive(&self) -> TransportFuture<'_, TransportResult<Option<TransportMessage>>>;

    /// Address of the remote end, for logs
    fn endpoint(&self) -> Option<String> {
        None
    }
}
