//! Wire format constants and the frame prefix.
//!
//! Every broker-to-client frame has the layout:
//! ```text
//! ┌──────────┬──────────┬─────────────────────┐
//! │ Size     │ Type     │ Payload             │
//! │ 4 bytes  │ 4 bytes  │ Size - 4 bytes      │
//! │ uint32 BE│ uint32 BE│                     │
//! └──────────┴──────────┴─────────────────────┘
//! ```
//!
//! `Size` covers the type field and the payload, never itself.
//! Message payloads carry a fixed 26-byte header before the body:
//! ```text
//! ┌───────────┬──────────┬──────────┬──────────┐
//! │ Timestamp │ Attempts │ ID       │ Body     │
//! │ 8 bytes   │ 2 bytes  │ 16 bytes │ N bytes  │
//! │ int64 BE  │ uint16 BE│ raw      │          │
//! └───────────┴──────────┴──────────┴──────────┘
//! ```

use crate::error::{ConsumerError, Result};

/// Size of the length prefix in bytes.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Size of the frame type field in bytes.
pub const FRAME_TYPE_LEN: usize = 4;

/// Size of a message identifier in bytes.
pub const MESSAGE_ID_LEN: usize = 16;

/// Fixed part of a message payload: timestamp + attempts + id.
pub const MESSAGE_HEADER_LEN: usize = 8 + 2 + MESSAGE_ID_LEN;

/// Default maximum frame size (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 4 * 1024 * 1024;

/// Magic bytes sent right after the socket connects.
pub const MAGIC_V1: &[u8; 4] = b"  V1";

/// Response payload the broker uses for heartbeats.
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Response payload acknowledging a handshake command.
pub const OK: &[u8] = b"OK";

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameType {
    /// Response to a command, or a heartbeat.
    Response = 0,
    /// Error string from the broker.
    Error = 1,
    /// A delivered message.
    Message = 2,
}

impl FrameType {
    /// Wire value of this type tag.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for FrameType {
    type Error = ConsumerError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(FrameType::Response),
            1 => Ok(FrameType::Error),
            2 => Ok(FrameType::Message),
            other => Err(ConsumerError::ProtocolViolation(format!(
                "unknown frame type {}",
                other
            ))),
        }
    }
}

/// Validate a decoded size prefix against the configured maximum.
///
/// The size must at least cover the frame type field.
pub fn validate_size(size: u32, max_frame_size: u32) -> Result<()> {
    if size == 0 {
        return Err(ConsumerError::ProtocolViolation(
            "frame size prefix is zero".to_string(),
        ));
    }

    if (size as usize) < FRAME_TYPE_LEN {
        return Err(ConsumerError::ProtocolViolation(format!(
            "frame size {} is smaller than the type field",
            size
        )));
    }

    if size > max_frame_size {
        return Err(ConsumerError::ProtocolViolation(format!(
            "frame size {} exceeds maximum {}",
            size, max_frame_size
        )));
    }

    Ok(())
}

/// Decode a big-endian u32 from the first four bytes of `buf`.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn read_u32(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_roundtrip() {
        for ty in [FrameType::Response, FrameType::Error, FrameType::Message] {
            assert_eq!(FrameType::try_from(ty.as_u32()).unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_frame_type() {
        let err = FrameType::try_from(7).unwrap_err();
        assert!(matches!(err, ConsumerError::ProtocolViolation(_)));
        assert!(err.to_string().contains("unknown frame type 7"));
    }

    #[test]
    fn test_validate_size() {
        assert!(validate_size(4, 100).is_ok());
        assert!(validate_size(100, 100).is_ok());

        let zero = validate_size(0, 100).unwrap_err();
        assert!(zero.to_string().contains("zero"));

        assert!(validate_size(3, 100).is_err());

        let big = validate_size(101, 100).unwrap_err();
        assert!(big.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_read_u32_big_endian() {
        assert_eq!(read_u32(&[0x01, 0x02, 0x03, 0x04, 0xFF]), Some(0x0102_0304));
        assert_eq!(read_u32(&[0x01, 0x02, 0x03]), None);
    }

    #[test]
    fn test_message_header_len() {
        assert_eq!(MESSAGE_HEADER_LEN, 26);
    }
}
