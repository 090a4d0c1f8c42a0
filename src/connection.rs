//! One broker connection: handshake, read loop and write path.
//!
//! A [`Connection`] is single-use. It walks
//! `Disconnected → Connecting → Connected → Subscribed → Closing → Closed`
//! and drops back to `Disconnected` when anything fails on the way. A
//! reconnect builds a new instance.
//!
//! Reads happen on the task that drives [`Connection::read_loop`]; writes go
//! through the writer task so acknowledgements from handler tasks never
//! interleave with heartbeat replies or credit updates.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConsumerConfig;
use crate::control::{identify_command, parse_identify_response, IdentifyData, NegotiatedFeatures};
use crate::error::{ConsumerError, Result};
use crate::protocol::{Command, Frame, FrameBuffer, Message, MAGIC_V1};
use crate::transport::{BoxedStream, Connector};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Broker error codes that end the connection.
pub const FATAL_ERROR_CODES: &[&str] = &["E_INVALID", "E_BAD_BODY", "E_BAD_TOPIC", "E_BAD_CHANNEL"];

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Timeouts and limits for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_size: u32,
    pub writer: WriterConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::from(&ConsumerConfig::default())
    }
}

impl From<&ConsumerConfig> for ConnectionConfig {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
            heartbeat_timeout: config.heartbeat_timeout,
            max_frame_size: config.max_frame_size,
            writer: config.writer.clone(),
        }
    }
}

/// A single connection to a broker.
pub struct Connection {
    address: String,
    config: ConnectionConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    reader: Option<ReadHalf<BoxedStream>>,
    frames: FrameBuffer,
    /// Socket read buffer, allocated once on connect.
    read_buf: Vec<u8>,
    writer: Option<WriterHandle>,
    writer_task: Option<JoinHandle<Result<()>>>,
}

impl Connection {
    pub fn new(address: impl Into<String>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self::with_state(address, config, Arc::new(state))
    }

    /// Create a connection publishing its state on an existing channel.
    ///
    /// The consumer shares one channel across reconnects so observers keep
    /// a single receiver.
    pub fn with_state(
        address: impl Into<String>,
        config: ConnectionConfig,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        state.send_replace(ConnectionState::Disconnected);
        let frames = FrameBuffer::with_max_frame_size(config.max_frame_size);
        Self {
            address: address.into(),
            config,
            state,
            reader: None,
            frames,
            read_buf: Vec::new(),
            writer: None,
            writer_task: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Handle onto the write path, available once connected.
    pub fn writer(&self) -> Option<WriterHandle> {
        self.writer.clone()
    }

    /// Open the stream and send the protocol magic.
    pub async fn connect(&mut self, connector: &dyn Connector) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        tracing::debug!(address = %self.address, "connecting");

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            connector.connect(&self.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(ConsumerError::Connection(e)),
            Err(_) => {
                return self.fail(ConsumerError::Timeout(self.config.connect_timeout, "connect"))
            }
        };

        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer.clone());
        self.reader = Some(reader);
        self.read_buf = vec![0u8; READ_BUFFER_SIZE];
        self.writer = Some(writer.clone());
        self.writer_task = Some(writer_task);

        if let Err(e) = writer.send_raw(Bytes::from_static(MAGIC_V1)).await {
            return self.fail(e);
        }

        self.set_state(ConnectionState::Connected);
        tracing::info!(address = %self.address, "connected");
        Ok(())
    }

    /// Send IDENTIFY and wait for the answer.
    ///
    /// Returns the negotiated broker limits when feature negotiation was
    /// requested and granted.
    pub async fn identify(&mut self, data: &IdentifyData) -> Result<Option<NegotiatedFeatures>> {
        let command = identify_command(data)?;
        self.expect_state(ConnectionState::Connected, "identify")?;

        let result = async {
            self.send(&command).await?;
            let frame = self.read_response("identify").await?;
            parse_identify_response(frame.payload())
        }
        .await;

        match result {
            Ok(features) => {
                if let Some(features) = &features {
                    tracing::info!(
                        version = %features.version,
                        max_rdy_count = features.max_rdy_count,
                        "broker features negotiated"
                    );
                }
                Ok(features)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Send SUB and wait for `OK`.
    pub async fn subscribe(&mut self, topic: &str, channel: &str) -> Result<()> {
        let command = Command::subscribe(topic, channel)?;
        self.expect_state(ConnectionState::Connected, "subscribe")?;

        let result = async {
            self.send(&command).await?;
            let frame = self.read_response("subscribe").await?;
            if frame.is_ok() {
                Ok(())
            } else {
                Err(ConsumerError::ProtocolViolation(format!(
                    "unexpected SUB response {:?}",
                    frame.text()
                )))
            }
        }
        .await;

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Subscribed);
                tracing::info!(topic, channel, "subscribed");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Queue a command on the write path.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let writer = self.writer.clone().ok_or(ConsumerError::ConnectionClosed)?;
        writer.send(command).await
    }

    /// Read frames until the connection fails, handing messages to `dispatch`.
    ///
    /// Heartbeats are answered with `NOP`. Error frames with a fatal code end
    /// the loop; other error frames are logged. An error from `dispatch` ends
    /// the loop with that error. Returns the reason the connection ended; the
    /// connection is `Disconnected` by then.
    pub async fn read_loop<F>(&mut self, mut dispatch: F) -> ConsumerError
    where
        F: FnMut(Message) -> Result<()>,
    {
        let err = match self.read_frames(&mut dispatch).await {
            Ok(never) => match never {},
            Err(e) => e,
        };
        if self.state() != ConnectionState::Closed {
            self.teardown(ConnectionState::Disconnected);
        }
        err
    }

    /// Stop the writer, shut the socket and clear buffers. Idempotent.
    pub async fn close(&mut self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closing);
        if let Some(writer) = self.writer.take() {
            writer.shutdown().await;
        }
        if let Some(task) = self.writer_task.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
        self.reader = None;
        self.frames.clear();
        self.set_state(ConnectionState::Closed);
        tracing::info!(address = %self.address, "connection closed");
    }

    async fn read_frames<F>(&mut self, dispatch: &mut F) -> Result<std::convert::Infallible>
    where
        F: FnMut(Message) -> Result<()>,
    {
        self.expect_state(ConnectionState::Subscribed, "read")?;
        loop {
            let frame = self.next_frame(self.config.heartbeat_timeout, "heartbeat").await?;
            if frame.is_message() {
                dispatch(frame.to_message()?)?;
            } else if frame.is_heartbeat() {
                tracing::debug!("heartbeat");
                self.send(&Command::nop()).await?;
            } else if frame.is_error() {
                self.on_error_frame(&frame)?;
            } else {
                tracing::debug!(response = %frame.text(), "response frame");
            }
        }
    }

    /// Read the answer to a handshake command.
    async fn read_response(&mut self, phase: &'static str) -> Result<Frame> {
        loop {
            let frame = self.next_frame(self.config.handshake_timeout, phase).await?;
            if frame.is_heartbeat() {
                self.send(&Command::nop()).await?;
                continue;
            }
            if frame.is_error() {
                return Err(ConsumerError::HandshakeRejected(frame.text()));
            }
            if frame.is_message() {
                return Err(ConsumerError::ProtocolViolation(format!(
                    "message frame during {}",
                    phase
                )));
            }
            return Ok(frame);
        }
    }

    /// Next complete frame, reading from the socket as needed.
    ///
    /// `timeout` bounds each socket read, not the whole call.
    async fn next_frame(&mut self, timeout: Duration, phase: &'static str) -> Result<Frame> {
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Ok(frame);
            }

            let reader = self.reader.as_mut().ok_or(ConsumerError::ConnectionClosed)?;
            let n = match tokio::time::timeout(timeout, reader.read(&mut self.read_buf)).await {
                Ok(Ok(0)) => return Err(ConsumerError::ConnectionClosed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(ConsumerError::Connection(e)),
                Err(_) => return Err(ConsumerError::Timeout(timeout, phase)),
            };
            self.frames.extend(&self.read_buf[..n]);
        }
    }

    fn on_error_frame(&self, frame: &Frame) -> Result<()> {
        let text = frame.text();
        let code = frame.error_code().unwrap_or_default();
        if FATAL_ERROR_CODES.contains(&code.as_str()) {
            tracing::error!(error = %text, "fatal broker error");
            return Err(ConsumerError::Broker(text));
        }
        tracing::warn!(error = %text, "broker error");
        Ok(())
    }

    fn expect_state(&self, expected: ConnectionState, operation: &str) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else if matches!(state, ConnectionState::Closing | ConnectionState::Closed) {
            Err(ConsumerError::ConnectionClosed)
        } else {
            Err(ConsumerError::ProtocolViolation(format!(
                "cannot {} while {}",
                operation, state
            )))
        }
    }

    fn fail<T>(&mut self, err: ConsumerError) -> Result<T> {
        match &err {
            ConsumerError::ProtocolViolation(_) => {
                tracing::error!(address = %self.address, error = %err, "protocol violation")
            }
            _ => tracing::warn!(address = %self.address, error = %err, "connection failed"),
        }
        self.teardown(ConnectionState::Disconnected);
        Err(err)
    }

    fn teardown(&mut self, state: ConnectionState) {
        // The writer task is detached, not aborted: it flushes what is
        // already queued and exits once the last handle is dropped or the
        // socket write fails.
        self.writer = None;
        self.writer_task = None;
        self.reader = None;
        self.frames.clear();
        self.set_state(state);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "connection state");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}
