//! Client-to-broker command encoding.
//!
//! Commands are an ASCII verb followed by space-separated parameters and a
//! single `\n`. Parameters are raw bytes: message ids are copied verbatim and
//! never converted through a string. `IDENTIFY` additionally carries a
//! length-prefixed body after the newline:
//! ```text
//! IDENTIFY\n[uint32 BE length][body]
//! ```
//!
//! Encoding is pure; the constructors validate their input and return
//! `InvalidCommand` rather than emit bytes the broker would misparse.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::message::MessageId;
use crate::error::{ConsumerError, Result};

/// Maximum length of a topic or channel name.
pub const MAX_NAME_LEN: usize = 64;

/// Largest RDY count the broker accepts.
pub const MAX_READY_COUNT: u32 = 2500;

/// Largest requeue delay the broker accepts.
pub const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(60 * 60);

/// Suffix marking a channel that the broker drops once unsubscribed.
pub const EPHEMERAL_SUFFIX: &str = "#ephemeral";

const SEPARATOR: u8 = b' ';
const NEWLINE: u8 = b'\n';

/// A single encoded command.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    params: Vec<Bytes>,
    body: Option<Bytes>,
}

impl Command {
    fn new(name: &'static str, params: Vec<Bytes>) -> Self {
        Self {
            name,
            params,
            body: None,
        }
    }

    /// `SUB <topic> <channel>\n`
    pub fn subscribe(topic: &str, channel: &str) -> Result<Self> {
        validate_name("topic", topic, false)?;
        validate_name("channel", channel, true)?;
        Ok(Self::new(
            "SUB",
            vec![
                Bytes::copy_from_slice(topic.as_bytes()),
                Bytes::copy_from_slice(channel.as_bytes()),
            ],
        ))
    }

    /// `RDY <count>\n`
    pub fn ready(count: u32) -> Result<Self> {
        if count > MAX_READY_COUNT {
            return Err(ConsumerError::InvalidCommand(format!(
                "RDY count {} exceeds maximum {}",
                count, MAX_READY_COUNT
            )));
        }
        Ok(Self::new("RDY", vec![Bytes::from(count.to_string())]))
    }

    /// `FIN <id>\n`
    pub fn finish(id: &MessageId) -> Self {
        Self::new("FIN", vec![Bytes::copy_from_slice(id.as_bytes())])
    }

    /// `REQ <id> <delay_ms>\n`
    pub fn requeue(id: &MessageId, delay: Duration) -> Result<Self> {
        if delay > MAX_REQUEUE_DELAY {
            return Err(ConsumerError::InvalidCommand(format!(
                "requeue delay {:?} exceeds maximum {:?}",
                delay, MAX_REQUEUE_DELAY
            )));
        }
        Ok(Self::new(
            "REQ",
            vec![
                Bytes::copy_from_slice(id.as_bytes()),
                Bytes::from(delay.as_millis().to_string()),
            ],
        ))
    }

    /// `TOUCH <id>\n`
    pub fn touch(id: &MessageId) -> Self {
        Self::new("TOUCH", vec![Bytes::copy_from_slice(id.as_bytes())])
    }

    /// `NOP\n`
    pub fn nop() -> Self {
        Self::new("NOP", Vec::new())
    }

    /// `IDENTIFY\n` followed by a length-prefixed body.
    pub fn identify(body: impl Into<Bytes>) -> Result<Self> {
        let body = body.into();
        if body.is_empty() {
            return Err(ConsumerError::InvalidCommand(
                "IDENTIFY body is empty".to_string(),
            ));
        }
        Ok(Self {
            name: "IDENTIFY",
            params: Vec::new(),
            body: Some(body),
        })
    }

    /// Command verb.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        let params: usize = self.params.iter().map(|p| p.len() + 1).sum();
        let body = self.body.as_ref().map_or(0, |b| 4 + b.len());
        self.name.len() + params + 1 + body
    }

    /// Append the wire form of this command to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_slice(self.name.as_bytes());
        for param in &self.params {
            buf.put_u8(SEPARATOR);
            buf.put_slice(param);
        }
        buf.put_u8(NEWLINE);
        if let Some(body) = &self.body {
            buf.put_u32(body.len() as u32);
            buf.put_slice(body);
        }
    }

    /// Encode this command to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use qreader::protocol::Command;
    ///
    /// let cmd = Command::subscribe("events", "archive").unwrap();
    /// assert_eq!(&cmd.encode()[..], b"SUB events archive\n");
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for param in &self.params {
            write!(f, " {}", String::from_utf8_lossy(param))?;
        }
        if let Some(body) = &self.body {
            write!(f, " <{} byte body>", body.len())?;
        }
        Ok(())
    }
}

/// Validate a topic or channel name.
///
/// Names are 1..=64 characters of `[A-Za-z0-9._-]`; channels may also carry
/// the `#ephemeral` suffix.
pub fn validate_name(kind: &str, name: &str, allow_ephemeral: bool) -> Result<()> {
    let base = match name.strip_suffix(EPHEMERAL_SUFFIX) {
        Some(base) if allow_ephemeral => base,
        _ => name,
    };

    if base.is_empty() {
        return Err(ConsumerError::InvalidCommand(format!("{} is empty", kind)));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ConsumerError::InvalidCommand(format!(
            "{} '{}' is longer than {} characters",
            kind, name, MAX_NAME_LEN
        )));
    }

    let valid = base
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if !valid {
        return Err(ConsumerError::InvalidCommand(format!(
            "{} '{}' contains invalid characters",
            kind, name
        )));
    }

    Ok(())
}
