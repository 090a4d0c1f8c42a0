//! # qreader
//!
//! Consumer-side client for a pull-based message-queue broker.
//!
//! A [`Consumer`] holds one connection to one broker address, subscribes to
//! one topic/channel pair, declares flow-control credit (`RDY`) and hands
//! every delivered [`Message`] to an application [`Handler`]. Each message
//! is acknowledged exactly once: `FIN` on success, `REQ` with an
//! exponential backoff delay on failure.
//!
//! ## Architecture
//!
//! - **Protocol**: newline-terminated commands out, length-prefixed typed frames in
//! - **Connection**: handshake, heartbeat-bounded read loop, single writer task
//! - **Flow control**: credit accounting and the backoff policy behind one lock
//!
//! ## Example
//!
//! ```no_run
//! use qreader::handler::FnHandler;
//! use qreader::{Consumer, Message};
//!
//! #[tokio::main]
//! async fn main() -> qreader::Result<()> {
//!     Consumer::builder("127.0.0.1:4150", "events", "archive")
//!         .max_in_flight(16)
//!         .build(FnHandler::new(|message: Message| async move {
//!             println!("{:?}", message.body());
//!             Ok(())
//!         }))?
//!         .run()
//!         .await
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod flow;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod consumer;

pub use config::ConsumerConfig;
pub use connection::ConnectionState;
pub use consumer::{Consumer, ConsumerBuilder, ConsumerHandle, Stats};
pub use error::{ConsumerError, Result};
pub use handler::{Handler, HandlerFailure, HandlerResult};
pub use protocol::{Message, MessageId};
