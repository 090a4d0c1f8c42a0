//! Pluggable stream connector with a TCP implementation.
//!
//! The [`Connection`](crate::connection::Connection) never opens sockets
//! itself; it asks a [`Connector`] for a byte stream. Production code uses
//! [`TcpConnector`]; tests hand out in-memory `tokio::io::duplex` ends.
//!
//! # Example
//!
//! ```ignore
//! use qreader::transport::{Connector, TcpConnector};
//!
//! let stream = TcpConnector::new().connect("127.0.0.1:4150").await?;
//! ```

use std::io;
use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::handler::BoxFuture;

/// A bidirectional byte stream usable as a broker connection.
///
/// `Sync` keeps the connection, and with it the consumer's run future,
/// `Send` across awaits.
pub trait Stream: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

/// Type-erased stream handed out by a [`Connector`].
pub type BoxedStream = Box<dyn Stream>;

/// Opens byte streams to a broker address.
pub trait Connector: Send + Sync + 'static {
    /// Establish a new stream to `address`.
    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>>;
}

/// TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    /// Create a connector with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(address).await?;
            stream.set_nodelay(self.nodelay)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Connector that hands out pre-built streams in order.
///
/// Once the queue is empty every attempt fails with `ConnectionRefused`,
/// which is how reconnect paths are exercised without a network.
#[derive(Default)]
pub struct QueuedConnector {
    streams: Mutex<Vec<BoxedStream>>,
}

impl QueuedConnector {
    /// Create a connector yielding `streams` front to back.
    pub fn new(streams: Vec<BoxedStream>) -> Self {
        let mut streams = streams;
        streams.reverse();
        Self {
            streams: Mutex::new(streams),
        }
    }

    /// Queue another stream behind the existing ones.
    pub fn push(&self, stream: BoxedStream) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.insert(0, stream);
    }
}

impl Connector for QueuedConnector {
    fn connect<'a>(&'a self, _address: &'a str) -> BoxFuture<'a, io::Result<BoxedStream>> {
        let next = self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        Box::pin(async move {
            next.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no stream queued")
            })
        })
    }
}
