//! Delivered message and its identifier.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{MESSAGE_HEADER_LEN, MESSAGE_ID_LEN};
use crate::error::{ConsumerError, Result};

/// 16-byte opaque message identifier.
///
/// The broker treats the id as raw bytes; it is written back verbatim in
/// FIN/REQ/TOUCH commands and never re-encoded as text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Raw identifier bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }
}

impl From<[u8; MESSAGE_ID_LEN]> for MessageId {
    fn from(bytes: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for MessageId {
    type Error = ConsumerError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let id: [u8; MESSAGE_ID_LEN] = bytes.try_into().map_err(|_| {
            ConsumerError::ProtocolViolation(format!(
                "message id must be {} bytes, got {}",
                MESSAGE_ID_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(id))
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Broker ids are printable in practice; anything else is shown lossily.
impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

/// A message delivered by the broker.
///
/// Cloning is cheap: the body is a shared `Bytes` view of the frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    body: Bytes,
    timestamp: i64,
    attempts: u16,
}

impl Message {
    /// Create a message from its parts.
    pub fn new(id: MessageId, body: Bytes, timestamp: i64, attempts: u16) -> Self {
        Self {
            id,
            body,
            timestamp,
            attempts,
        }
    }

    /// Decode a message frame payload.
    ///
    /// The body is a zero-copy slice of `payload`.
    pub fn decode(payload: Bytes) -> Result<Self> {
        if payload.len() < MESSAGE_HEADER_LEN {
            return Err(ConsumerError::ProtocolViolation(format!(
                "message payload is {} bytes, need at least {}",
                payload.len(),
                MESSAGE_HEADER_LEN
            )));
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&payload[0..8]);
        let attempts = u16::from_be_bytes([payload[8], payload[9]]);
        let id = MessageId::try_from(&payload[10..MESSAGE_HEADER_LEN])?;

        Ok(Self {
            id,
            body: payload.slice(MESSAGE_HEADER_LEN..),
            timestamp: i64::from_be_bytes(timestamp),
            attempts,
        })
    }

    /// Encode the message as a frame payload (broker layout).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN + self.body.len());
        buf.put_i64(self.timestamp);
        buf.put_u16(self.attempts);
        buf.put_slice(self.id.as_bytes());
        buf.put_slice(&self.body);
        buf
    }

    #[inline]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Shared handle on the body, for handlers that keep it past the call.
    #[inline]
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Broker-assigned timestamp in nanoseconds.
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Delivery attempts, incremented by the broker on each redelivery.
    #[inline]
    pub fn attempts(&self) -> u16 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> MessageId {
        MessageId::from(*b"0a1b2c3d4e5f6a7b")
    }

    #[test]
    fn test_decode_layout() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_700_000_000_000_000_000i64.to_be_bytes());
        payload.extend_from_slice(&3u16.to_be_bytes());
        payload.extend_from_slice(id().as_bytes());
        payload.extend_from_slice(b"hello");

        let message = Message::decode(Bytes::from(payload)).unwrap();
        assert_eq!(message.timestamp(), 1_700_000_000_000_000_000);
        assert_eq!(message.attempts(), 3);
        assert_eq!(message.id(), id());
        assert_eq!(message.body(), b"hello");
    }

    #[test]
    fn test_decode_empty_body() {
        let message = Message::new(id(), Bytes::new(), -5, 0);
        let decoded = Message::decode(message.encode().freeze()).unwrap();
        assert_eq!(decoded, message);
        assert!(decoded.body().is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        let err = Message::decode(Bytes::from_static(&[0u8; 25])).unwrap_err();
        assert!(matches!(err, ConsumerError::ProtocolViolation(_)));
        assert!(err.to_string().contains("need at least 26"));
    }

    #[test]
    fn test_non_utf8_id_preserved() {
        let raw = [0xFFu8; MESSAGE_ID_LEN];
        let message = Message::new(MessageId::from(raw), Bytes::from_static(b"x"), 0, 1);
        let decoded = Message::decode(message.encode().freeze()).unwrap();
        assert_eq!(decoded.id().as_bytes(), &raw);
    }

    #[test]
    fn test_id_try_from_wrong_len() {
        assert!(MessageId::try_from(&b"short"[..]).is_err());
        assert_eq!(MessageId::try_from(&id().as_bytes()[..]).unwrap(), id());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(id().to_string(), "0a1b2c3d4e5f6a7b");
        assert_eq!(format!("{:?}", id()), "MessageId(0a1b2c3d4e5f6a7b)");
    }
}
