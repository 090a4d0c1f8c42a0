//! Frame struct with typed accessors.
//!
//! Represents one decoded broker frame. Uses `bytes::Bytes` for zero-copy
//! payload sharing.
//!
//! # Example
//!
//! ```
//! use qreader::protocol::{Frame, FrameType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(FrameType::Response, Bytes::from_static(b"OK"));
//!
//! assert!(frame.is_ok());
//! assert_eq!(frame.size(), 6);
//! ```

use bytes::Bytes;

use super::message::Message;
use super::wire_format::{FrameType, FRAME_TYPE_LEN, HEARTBEAT, OK, SIZE_PREFIX_LEN};
use crate::error::{ConsumerError, Result};

/// A complete broker frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded type tag.
    pub frame_type: FrameType,
    /// Payload bytes after the type field.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from type and payload.
    pub fn new(frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Value of the size prefix for this frame (type field + payload).
    #[inline]
    pub fn size(&self) -> u32 {
        (FRAME_TYPE_LEN + self.payload.len()) as u32
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.frame_type == FrameType::Response
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.frame_type == FrameType::Error
    }

    #[inline]
    pub fn is_message(&self) -> bool {
        self.frame_type == FrameType::Message
    }

    /// Check if this is a heartbeat response.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.is_response() && self.payload.as_ref() == HEARTBEAT
    }

    /// Check if this is an `OK` response.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.is_response() && self.payload.as_ref() == OK
    }

    /// Payload rendered as text, for error frames and logging.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Error code of an error frame (`E_INVALID`, `E_BAD_TOPIC`, ...).
    ///
    /// Returns `None` for non-error frames.
    pub fn error_code(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        let text = self.text();
        let code = text.split_whitespace().next().unwrap_or_default();
        Some(code.to_string())
    }

    /// Decode the payload of a message frame.
    pub fn to_message(&self) -> Result<Message> {
        if !self.is_message() {
            return Err(ConsumerError::ProtocolViolation(format!(
                "expected message frame, got {:?}",
                self.frame_type
            )));
        }
        Message::decode(self.payload.clone())
    }

    /// Encode this frame with its size prefix.
    pub fn encode(&self) -> Vec<u8> {
        build_frame(self.frame_type, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// This is the broker-side layout; the client only decodes it, but tests and
/// mock brokers need to produce it.
///
/// # Example
///
/// ```
/// use qreader::protocol::{build_frame, FrameType};
///
/// let bytes = build_frame(FrameType::Response, b"OK");
/// assert_eq!(bytes, [0, 0, 0, 6, 0, 0, 0, 0, b'O', b'K']);
/// ```
pub fn build_frame(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
    let size = (FRAME_TYPE_LEN + payload.len()) as u32;
    let mut buf = Vec::with_capacity(SIZE_PREFIX_LEN + size as usize);
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(&frame_type.as_u32().to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageId;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(FrameType::Error, Bytes::from_static(b"E_INVALID bad"));

        assert!(frame.is_error());
        assert!(!frame.is_response());
        assert_eq!(frame.size(), 4 + 13);
        assert_eq!(frame.payload(), b"E_INVALID bad");
    }

    #[test]
    fn test_heartbeat_and_ok() {
        let heartbeat = Frame::new(FrameType::Response, Bytes::from_static(HEARTBEAT));
        assert!(heartbeat.is_heartbeat());
        assert!(!heartbeat.is_ok());

        let ok = Frame::new(FrameType::Response, Bytes::from_static(OK));
        assert!(ok.is_ok());
        assert!(!ok.is_heartbeat());

        // Same payload but wrong type is neither.
        let error_ok = Frame::new(FrameType::Error, Bytes::from_static(OK));
        assert!(!error_ok.is_ok());
    }

    #[test]
    fn test_error_code() {
        let frame = Frame::new(
            FrameType::Error,
            Bytes::from_static(b"E_BAD_TOPIC SUB topic name is not valid"),
        );
        assert_eq!(frame.error_code().as_deref(), Some("E_BAD_TOPIC"));

        let response = Frame::new(FrameType::Response, Bytes::from_static(OK));
        assert!(response.error_code().is_none());
    }

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(FrameType::Error, b"E_X");
        assert_eq!(&bytes[0..4], &7u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_be_bytes());
        assert_eq!(&bytes[8..], b"E_X");
    }

    #[test]
    fn test_to_message() {
        let id = MessageId::from(*b"0123456789abcdef");
        let payload = Message::new(id, Bytes::from_static(b"body"), 99, 2).encode();
        let frame = Frame::new(FrameType::Message, payload.into());

        let message = frame.to_message().unwrap();
        assert_eq!(message.id(), id);
        assert_eq!(message.attempts(), 2);

        let response = Frame::new(FrameType::Response, Bytes::from_static(OK));
        assert!(response.to_message().is_err());
    }
}
