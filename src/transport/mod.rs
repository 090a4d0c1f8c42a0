//! Transport module - how byte streams to the broker are opened.
//!
//! Provides abstraction over:
//! - TCP sockets (production)
//! - Queued in-memory streams (tests and embedding)

mod tcp;

pub use tcp::{BoxedStream, Connector, QueuedConnector, Stream, TcpConnector};
