//! Protocol module - wire format, framing, commands and messages.
//!
//! This module implements both directions of the broker protocol:
//! - Length-prefixed, typed frames from the broker
//! - Frame buffer for accumulating partial reads
//! - Message payload decoding
//! - Newline-terminated commands to the broker

mod command;
mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use command::{
    validate_name, Command, EPHEMERAL_SUFFIX, MAX_NAME_LEN, MAX_READY_COUNT, MAX_REQUEUE_DELAY,
};
pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{Message, MessageId};
pub use wire_format::{
    read_u32, validate_size, FrameType, DEFAULT_MAX_FRAME_SIZE, FRAME_TYPE_LEN, HEARTBEAT,
    MAGIC_V1, MESSAGE_HEADER_LEN, MESSAGE_ID_LEN, OK, SIZE_PREFIX_LEN,
};
