//! Framed messages as they cross the transport.

use bytes::Bytes;
use relaymcp_protocol::MessageId;
use relaymcp_protocol::jsonrpc::JsonRpcMessage;
use serde::Serialize;

use crate::error::{TransportError, TransportResult};

/// One serialized JSON-RPC message plus the id used to log it
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Request id, or a synthetic id for notifications
    pub id: MessageId,

    /// Encoded JSON
    pub payload: Bytes,
}

impl TransportMessage {
    /// Wrap an already-encoded payload
    pub fn new(id: MessageId, payload: Bytes) -> Self {
        Self { id, payload }
    }

    /// Encode `value` as the payload
    pub fn from_json<T: Serialize>(id: MessageId, value: &T) -> TransportResult<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(id, Bytes::from(payload)))
    }

    /// Decode the payload
    pub fn to_jsonrpc(&self) -> TransportResult<JsonRpcMessage> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))
    }

    /// Payload length in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymcp_protocol::jsonrpc::JsonRpcRequest;

    #[test]
    fn test_transport_message_creation() {
        let id = MessageId::from("test");
        let payload = Bytes::from("test payload");
        let msg = TransportMessage::new(id.clone(), payload.clone());

        assert_eq!(msg.id, id);
        assert_eq!(msg.payload, payload);
        assert_eq!(msg.size(), 12);
    }

    #[test]
    fn test_json_payload() {
        let request = JsonRpcRequest::new("ping", None, MessageId::Number(1));
        let msg = TransportMessage::from_json(MessageId::Number(1), &request).unwrap();
        let parsed = msg.to_jsonrpc().unwrap();
        assert_eq!(parsed.method(), Some("ping"));
    }

    #[test]
    fn test_invalid_payload() {
        let msg = TransportMessage::new(MessageId::Number(1), Bytes::from_static(b"not json"));
        assert!(matches!(
            msg.to_jsonrpc(),
            Err(TransportError::SerializationFailed(_))
        ));
    }
}
