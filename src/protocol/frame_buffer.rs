//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForSize`: Need at least 4 bytes for the size prefix
//! - `WaitingForBody`: Size parsed, need N more bytes (type + payload)
//! - `Poisoned`: A protocol violation was seen; byte alignment is lost
//!
//! # Example
//!
//! ```
//! use qreader::protocol::{build_frame, FrameBuffer, FrameType};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(FrameType::Response, b"OK");
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[3..]).unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert!(frames[0].is_ok());
//! ```

use bytes::BytesMut;

use super::wire_format::{
    read_u32, validate_size, FrameType, DEFAULT_MAX_FRAME_SIZE, FRAME_TYPE_LEN, SIZE_PREFIX_LEN,
};
use super::Frame;
use crate::error::{ConsumerError, Result};

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for the 4-byte size prefix.
    WaitingForSize,
    /// Size parsed, waiting for `size` bytes of type + payload.
    WaitingForBody { size: u32 },
    /// A violation was returned; every further call returns it again.
    Poisoned(String),
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Frames can be pulled lazily with [`FrameBuffer::next_frame`] or all at
/// once with [`FrameBuffer::push`]. Pulling is restartable: when a frame is
/// incomplete, `next_frame` returns `Ok(None)` and resumes from the same
/// position once more bytes are appended.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed value of the size prefix.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default maximum frame size.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            state: State::WaitingForSize,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns a vector of complete frames (may be empty if still waiting
    /// for data). Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` for a zero or oversized length prefix or
    /// an unknown frame type. The buffer stays poisoned afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Append data to the buffer without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        if !matches!(self.state, State::Poisoned(_)) {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::Poisoned(reason) => {
                    return Err(ConsumerError::ProtocolViolation(reason.clone()));
                }

                State::WaitingForSize => {
                    let Some(size) = read_u32(&self.buffer) else {
                        return Ok(None);
                    };

                    if let Err(e) = validate_size(size, self.max_frame_size) {
                        return Err(self.poison(e));
                    }

                    let _ = self.buffer.split_to(SIZE_PREFIX_LEN);
                    self.state = State::WaitingForBody { size };
                }

                State::WaitingForBody { size } => {
                    let size = *size as usize;
                    if self.buffer.len() < size {
                        self.buffer.reserve(size - self.buffer.len());
                        return Ok(None);
                    }

                    let mut body = self.buffer.split_to(size).freeze();
                    self.state = State::WaitingForSize;

                    let tag = read_u32(&body).unwrap_or_default();
                    let frame_type = match FrameType::try_from(tag) {
                        Ok(t) => t,
                        Err(e) => return Err(self.poison(e)),
                    };
                    let payload = body.split_off(FRAME_TYPE_LEN);

                    return Ok(Some(Frame::new(frame_type, payload)));
                }
            }
        }
    }

    fn poison(&mut self, err: ConsumerError) -> ConsumerError {
        let reason = match &err {
            ConsumerError::ProtocolViolation(reason) => reason.clone(),
            other => other.to_string(),
        };
        self.buffer.clear();
        self.state = State::Poisoned(reason);
        err
    }

    /// Check whether a protocol violation was seen.
    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, State::Poisoned(_))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state, releasing the poison.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForSize;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForSize => "WaitingForSize",
            State::WaitingForBody { .. } => "WaitingForBody",
            State::Poisoned(_) => "Poisoned",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
