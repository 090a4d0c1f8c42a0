//! Consumer builder and runtime loop.
//!
//! The [`ConsumerBuilder`] provides a fluent API for configuring the
//! consumer. [`Consumer::run`] manages the lifecycle:
//! 1. Connect and send the protocol magic
//! 2. Optionally IDENTIFY
//! 3. Subscribe and declare credit
//! 4. Read frames and dispatch messages to the handler
//! 5. Acknowledge each message with FIN or REQ
//! 6. Reconnect with backoff when the connection is lost
//!
//! # Example
//!
//! ```no_run
//! use qreader::handler::FnHandler;
//! use qreader::{Consumer, Message};
//!
//! #[tokio::main]
//! async fn main() -> qreader::Result<()> {
//!     let consumer = Consumer::builder("127.0.0.1:4150", "events", "archive")
//!         .max_in_flight(8)
//!         .build(FnHandler::new(|message: Message| async move {
//!             println!("{} bytes", message.body().len());
//!             Ok(())
//!         }))?;
//!
//!     let handle = consumer.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.stop().await;
//!     });
//!
//!     consumer.run().await
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify, Semaphore};

use crate::backoff::BackoffPolicy;
use crate::config::ConsumerConfig;
use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::control::IdentifyData;
use crate::error::{ConsumerError, Result};
use crate::flow::{FlowControl, Outcome};
use crate::handler::Handler;
use crate::protocol::{validate_name, Command, Message, MessageId};
use crate::transport::{Connector, TcpConnector};
use crate::writer::WriterHandle;

/// Builder for configuring and creating a [`Consumer`].
pub struct ConsumerBuilder {
    address: String,
    topic: String,
    channel: String,
    config: ConsumerConfig,
    connector: Arc<dyn Connector>,
}

impl ConsumerBuilder {
    /// Create a builder for one broker address and one topic/channel pair.
    pub fn new(
        address: impl Into<String>,
        topic: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            topic: topic.into(),
            channel: channel.into(),
            config: ConsumerConfig::default(),
            connector: Arc::new(TcpConnector::new()),
        }
    }

    /// Largest credit declared to the broker.
    ///
    /// Default: 1
    pub fn max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.config.max_in_flight = max_in_flight;
        self
    }

    /// Requeue delay after the first failure.
    ///
    /// Default: 1 second
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Upper bound on the requeue delay.
    ///
    /// Default: 10 minutes
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Cap on the backoff doubling exponent.
    ///
    /// Default: 10
    pub fn max_backoff_exponent(mut self, exponent: u32) -> Self {
        self.config.max_backoff_exponent = exponent;
        self
    }

    /// Longest silence tolerated from the broker before reconnecting.
    ///
    /// Default: 60 seconds
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Time allowed for IDENTIFY and SUB to be answered.
    ///
    /// Default: 5 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Time `stop` waits for in-flight messages to be acknowledged.
    ///
    /// Default: 30 seconds
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Default: 4 MiB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Handler invocations allowed to run at once.
    ///
    /// Default: 1
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Drop credit to one message after a failure until a success.
    ///
    /// Default: true
    pub fn throttle_on_failure(mut self, enabled: bool) -> Self {
        self.config.throttle_on_failure = enabled;
        self
    }

    /// Consecutive handshake rejections before `run` gives up.
    ///
    /// Default: 3
    pub fn max_handshake_rejections(mut self, limit: u32) -> Self {
        self.config.max_handshake_rejections = limit;
        self
    }

    /// Send IDENTIFY with `data` before subscribing.
    pub fn identify(mut self, data: IdentifyData) -> Self {
        self.config.identify = Some(data);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Open streams through `connector` instead of TCP.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Validate the configuration and build the consumer.
    pub fn build<H: Handler>(self, handler: H) -> Result<Consumer> {
        self.config.validate()?;
        validate_name("topic", &self.topic, false)?;
        validate_name("channel", &self.channel, true)?;

        let backoff = BackoffPolicy::new(self.config.message_backoff());
        let flow = FlowControl::new(
            self.config.max_in_flight,
            self.config.throttle_on_failure,
            backoff,
        );
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (stop, _) = watch::channel(false);
        let (done, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            flow: Mutex::new(flow),
            idle: Notify::new(),
            stop,
            done,
            state: Arc::new(state),
            link: Mutex::new(None),
            counters: Counters::default(),
        });

        Ok(Consumer {
            address: self.address,
            topic: self.topic,
            channel: self.channel,
            semaphore: Arc::new(Semaphore::new(self.config.concurrency)),
            config: self.config,
            connector: self.connector,
            handler: Arc::new(handler),
            shared,
        })
    }
}

/// Counter snapshot returned by [`ConsumerHandle::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Messages delivered by the broker.
    pub received: u64,
    /// Messages acknowledged with FIN.
    pub finished: u64,
    /// Messages acknowledged with REQ.
    pub requeued: u64,
    /// Reconnect attempts.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    finished: AtomicU64,
    requeued: AtomicU64,
    reconnects: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> Stats {
        Stats {
            received: self.received.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// State shared by the run loop, the handler tasks and the handles.
struct Shared {
    flow: Mutex<FlowControl>,
    /// Signalled after every acknowledgement and disconnect.
    idle: Notify,
    stop: watch::Sender<bool>,
    done: watch::Sender<bool>,
    state: Arc<watch::Sender<ConnectionState>>,
    /// Write path of the current subscribed connection.
    link: Mutex<Option<WriterHandle>>,
    counters: Counters,
}

impl Shared {
    fn flow(&self) -> MutexGuard<'_, FlowControl> {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> MutexGuard<'_, Option<WriterHandle>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> u32 {
        self.flow().in_flight()
    }

    /// Entry point for decoded messages, called from the read loop.
    fn dispatch(
        &self,
        message: Message,
        generation: u64,
        queue: &mpsc::Sender<Delivery>,
    ) -> Result<()> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let within_credit = self.flow().on_delivery();
        if !within_credit {
            tracing::debug!(message = %message.id(), "delivery raced a credit change");
        }
        tracing::debug!(
            message = %message.id(),
            attempts = message.attempts(),
            bytes = message.body().len(),
            "message received"
        );

        queue
            .try_send(Delivery {
                message,
                generation,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConsumerError::ProtocolViolation(
                    "broker delivered beyond the declared credit".to_string(),
                ),
                mpsc::error::TrySendError::Closed(_) => ConsumerError::ConnectionClosed,
            })
    }

    /// Send FIN or REQ for a handled message, plus any RDY update.
    async fn acknowledge(
        &self,
        writer: &WriterHandle,
        generation: u64,
        id: &MessageId,
        outcome: Outcome,
    ) {
        match writer.reserve(2).await {
            Ok(mut slots) => {
                // Queue under the lock so RDY updates reach the wire in the
                // order they were computed.
                let mut flow = self.flow();
                match flow.on_outcome(generation, id, outcome) {
                    Ok(Some(ack)) => {
                        slots.send(&ack.ack);
                        if let Some(ready) = &ack.ready {
                            slots.send(ready);
                        }
                        let counter = match outcome {
                            Outcome::Success => &self.counters.finished,
                            Outcome::Failure => &self.counters.requeued,
                        };
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(message = %id, error = %e, "cannot encode acknowledgement"),
                }
            }
            Err(_) => {
                tracing::warn!(
                    message = %id,
                    "connection gone before acknowledgement; the broker will redeliver"
                );
            }
        }
        self.idle.notify_waiters();
    }

    /// Declare zero credit on `writer`.
    async fn begin_drain(&self, writer: &WriterHandle) {
        match writer.reserve(1).await {
            Ok(mut slots) => {
                let mut flow = self.flow();
                match flow.begin_drain() {
                    Ok(Some(ready)) => {
                        slots.send(&ready);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "cannot encode RDY 0"),
                }
            }
            Err(_) => {
                let _ = self.flow().begin_drain();
            }
        }
    }

    /// Wait until every delivered message has been acknowledged.
    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let in_flight = self.in_flight();
            if in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    fn on_disconnect(&self) {
        let lost = {
            let mut flow = self.flow();
            let lost = flow.in_flight();
            flow.on_disconnect();
            lost
        };
        *self.link() = None;
        if lost > 0 {
            tracing::warn!(
                in_flight = lost,
                "connection lost with unacknowledged messages; the broker will redeliver them"
            );
        }
        self.idle.notify_waiters();
    }
}

/// A message waiting for a handler slot.
struct Delivery {
    message: Message,
    generation: u64,
}

/// Everything a handler task needs.
#[derive(Clone)]
struct Dispatcher {
    handler: Arc<dyn Handler>,
    shared: Arc<Shared>,
    writer: WriterHandle,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    /// Feed queued deliveries to handler tasks, at most `concurrency` at once.
    async fn run(self, mut queue: mpsc::Receiver<Delivery>) {
        loop {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let Some(delivery) = queue.recv().await else {
                return;
            };

            let dispatcher = self.clone();
            tokio::spawn(async move {
                // Permit is held until this task completes
                let _permit = permit;
                dispatcher.process(delivery).await;
            });
        }
    }

    async fn process(&self, delivery: Delivery) {
        let Delivery {
            message,
            generation,
        } = delivery;
        let id = message.id();
        let attempts = message.attempts();

        // The handler runs in its own task so a panic is observed as a
        // JoinError instead of unwinding through the acknowledgement path.
        let handler = self.handler.clone();
        let outcome = match tokio::spawn(async move { handler.handle(message).await }).await {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(failure)) => {
                tracing::warn!(message = %id, attempts, reason = failure.reason(), "handler failed");
                Outcome::Failure
            }
            Err(e) => {
                tracing::error!(message = %id, attempts, "handler panicked: {}", e);
                Outcome::Failure
            }
        };

        self.shared
            .acknowledge(&self.writer, generation, &id, outcome)
            .await;
    }
}

/// Consumer of one topic/channel pair on one broker.
///
/// Build with [`Consumer::builder`], keep a [`ConsumerHandle`] for stopping
/// and observing it, then drive it with [`Consumer::run`].
pub struct Consumer {
    address: String,
    topic: String,
    channel: String,
    config: ConsumerConfig,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn Handler>,
    semaphore: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl Consumer {
    /// Create a new consumer builder.
    pub fn builder(
        address: impl Into<String>,
        topic: impl Into<String>,
        channel: impl Into<String>,
    ) -> ConsumerBuilder {
        ConsumerBuilder::new(address, topic, channel)
    }

    /// Handle for stopping and observing this consumer.
    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consume until stopped.
    ///
    /// Connection loss of any kind leads to a reconnect after a backoff
    /// delay. Returns `Ok(())` after [`ConsumerHandle::stop`], or an error
    /// when the broker keeps rejecting the handshake or a command cannot be
    /// encoded.
    pub async fn run(self) -> Result<()> {
        let mut stop_rx = self.shared.stop.subscribe();
        let mut reconnect = BackoffPolicy::new(self.config.reconnect_backoff());
        let mut rejections = 0u32;
        tracing::info!(consumer = %self, address = %self.address, "starting");

        loop {
            let stopping = *stop_rx.borrow_and_update();
            if stopping {
                break;
            }

            let mut subscribed = false;
            let result = self.run_connection(&mut stop_rx, &mut subscribed).await;
            if subscribed {
                reconnect.on_success();
                rejections = 0;
            }

            match result {
                Ok(()) => break,
                Err(e) if e.is_fatal() => {
                    tracing::error!(consumer = %self, error = %e, "giving up");
                    self.finish();
                    return Err(e);
                }
                Err(ConsumerError::HandshakeRejected(reason)) => {
                    rejections += 1;
                    if rejections >= self.config.max_handshake_rejections {
                        tracing::error!(
                            consumer = %self,
                            rejections,
                            reason = %reason,
                            "handshake rejected repeatedly"
                        );
                        self.finish();
                        return Err(ConsumerError::HandshakeRejected(reason));
                    }
                    tracing::warn!(consumer = %self, rejections, reason = %reason, "handshake rejected");
                }
                Err(e) => {
                    tracing::warn!(consumer = %self, error = %e, "connection lost");
                }
            }

            let delay = reconnect.on_failure();
            self.shared
                .counters
                .reconnects
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                consumer = %self,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_stop(&mut stop_rx) => break,
            }
        }

        self.finish();
        tracing::info!(consumer = %self, "stopped");
        Ok(())
    }

    /// One connection from connect to teardown.
    ///
    /// `Ok(())` means the consumer was stopped and drained.
    async fn run_connection(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
        subscribed: &mut bool,
    ) -> Result<()> {
        let mut conn = Connection::with_state(
            self.address.clone(),
            ConnectionConfig::from(&self.config),
            self.shared.state.clone(),
        );

        let handshake = tokio::select! {
            result = self.handshake(&mut conn) => Some(result),
            _ = wait_for_stop(stop_rx) => None,
        };
        let broker_max_rdy = match handshake {
            Some(result) => result?,
            None => {
                tracing::info!(consumer = %self, "stopped during handshake");
                conn.close().await;
                return Ok(());
            }
        };
        *subscribed = true;
        let stopping = *stop_rx.borrow();
        if stopping {
            // Subscribed, but no credit declared yet: nothing to drain.
            conn.close().await;
            return Ok(());
        }

        let writer = conn.writer().ok_or(ConsumerError::ConnectionClosed)?;
        let generation = {
            let mut slots = writer.reserve(1).await?;
            let mut flow = self.shared.flow();
            let (generation, ready) = flow.on_subscribed(broker_max_rdy)?;
            slots.send(&ready);
            generation
        };
        *self.shared.link() = Some(writer.clone());

        let (queue_tx, queue_rx) = mpsc::channel(self.config.max_in_flight as usize);
        let dispatcher = Dispatcher {
            handler: self.handler.clone(),
            shared: self.shared.clone(),
            writer: writer.clone(),
            semaphore: self.semaphore.clone(),
        };
        let worker = tokio::spawn(dispatcher.run(queue_rx));

        let result = {
            let shared = self.shared.clone();
            let read = conn.read_loop(move |message| shared.dispatch(message, generation, &queue_tx));
            tokio::pin!(read);

            tokio::select! {
                err = &mut read => Err(err),
                _ = wait_for_stop(stop_rx) => {
                    self.drain(&writer, read.as_mut()).await;
                    Ok(())
                }
            }
        };

        if result.is_ok() {
            conn.close().await;
        }
        worker.abort();
        self.shared.on_disconnect();
        result
    }

    /// Connect, IDENTIFY if configured, and subscribe.
    ///
    /// Returns the broker's RDY limit when feature negotiation granted one.
    async fn handshake(&self, conn: &mut Connection) -> Result<Option<u32>> {
        conn.connect(self.connector.as_ref()).await?;
        let mut broker_max_rdy = None;
        if let Some(identify) = &self.config.identify {
            if let Some(features) = conn.identify(identify).await? {
                broker_max_rdy = u32::try_from(features.max_rdy_count)
                    .ok()
                    .filter(|n| *n > 0);
            }
        }
        conn.subscribe(&self.topic, &self.channel).await?;
        Ok(broker_max_rdy)
    }

    /// Declare zero credit and wait for in-flight messages, keeping the read
    /// loop alive so heartbeats are still answered.
    async fn drain<F>(&self, writer: &WriterHandle, mut read: std::pin::Pin<&mut F>)
    where
        F: std::future::Future<Output = ConsumerError>,
    {
        tracing::info!(
            consumer = %self,
            in_flight = self.shared.in_flight(),
            "stopping, draining in-flight messages"
        );
        self.shared.begin_drain(writer).await;

        let idle = tokio::time::timeout(self.config.drain_timeout, self.shared.wait_idle());
        tokio::select! {
            err = &mut read => {
                tracing::warn!(consumer = %self, error = %err, "connection ended while draining");
            }
            waited = idle => {
                if waited.is_err() {
                    tracing::warn!(
                        consumer = %self,
                        in_flight = self.shared.in_flight(),
                        "drain timed out; closing with unacknowledged messages"
                    );
                }
            }
        }
    }

    fn finish(&self) {
        self.shared.state.send_replace(ConnectionState::Closed);
        self.shared.done.send_replace(true);
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // Release `stop` callers when the consumer is dropped without running.
        self.shared.done.send_replace(true);
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reader<{}, {}>", self.topic, self.channel)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("address", &self.address)
            .field("topic", &self.topic)
            .field("channel", &self.channel)
            .field("config", &self.config)
            .finish()
    }
}

/// Cloneable handle onto a [`Consumer`].
#[derive(Clone)]
pub struct ConsumerHandle {
    shared: Arc<Shared>,
}

impl ConsumerHandle {
    /// Stop the consumer and wait for [`Consumer::run`] to return.
    ///
    /// The consumer declares zero credit, waits up to `drain_timeout` for
    /// in-flight messages to be acknowledged, then closes the connection.
    pub async fn stop(&self) {
        self.request_stop();
        let mut done = self.shared.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Ask the consumer to stop without waiting.
    pub fn request_stop(&self) {
        self.shared.stop.send_replace(true);
    }

    /// Reset the broker-side timeout of an in-flight message.
    pub async fn touch(&self, id: &MessageId) -> Result<()> {
        let writer = self.shared.link().clone();
        match writer {
            Some(writer) => writer.send(&Command::touch(id)).await,
            None => Err(ConsumerError::ConnectionClosed),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state across reconnects.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Delivered messages not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.shared.in_flight()
    }

    pub fn stats(&self) -> Stats {
        self.shared.counters.snapshot()
    }
}

async fn wait_for_stop(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;

    fn noop() -> impl Handler {
        FnHandler::new(|_: Message| async { Ok(()) })
    }

    #[test]
    fn test_builder_configuration() {
        let consumer = Consumer::builder("127.0.0.1:4150", "events", "archive#ephemeral")
            .max_in_flight(32)
            .base_delay(Duration::from_millis(250))
            .max_delay(Duration::from_secs(30))
            .heartbeat_timeout(Duration::from_secs(10))
            .concurrency(4)
            .throttle_on_failure(false)
            .channel_capacity(64)
            .build(noop())
            .unwrap();

        let config = consumer.config();
        assert_eq!(config.max_in_flight, 32);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(config.concurrency, 4);
        assert!(!config.throttle_on_failure);
        assert_eq!(config.writer.channel_capacity, 64);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = Consumer::builder("127.0.0.1:4150", "events", "archive")
            .max_in_flight(0)
            .build(noop())
            .unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidConfig(_)));
    }

    #[test]
    fn test_build_rejects_invalid_names() {
        let err = Consumer::builder("127.0.0.1:4150", "", "archive")
            .build(noop())
            .unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidCommand(_)));

        let err = Consumer::builder("127.0.0.1:4150", "events", "a b")
            .build(noop())
            .unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidCommand(_)));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_run_future_is_send() {
        let consumer = Consumer::builder("127.0.0.1:4150", "events", "archive")
            .build(noop())
            .unwrap();
        let run = consumer.run();
        assert_send(&run);
    }

    #[test]
    fn test_display() {
        let consumer = Consumer::builder("127.0.0.1:4150", "events", "archive")
            .build(noop())
            .unwrap();
        assert_eq!(consumer.to_string(), "Reader<events, archive>");
    }

    #[tokio::test]
    async fn test_handle_before_run() {
        let consumer = Consumer::builder("127.0.0.1:4150", "events", "archive")
            .build(noop())
            .unwrap();
        let handle = consumer.handle();

        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(handle.stats(), Stats::default());
        assert_eq!(handle.in_flight(), 0);
        assert!(matches!(
            handle.touch(&MessageId::from([0; 16])).await,
            Err(ConsumerError::ConnectionClosed)
        ));

        drop(consumer);
        // Dropping an unrun consumer releases stop().
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_run_returns_immediately() {
        let consumer = Consumer::builder("127.0.0.1:1", "events", "archive")
            .build(noop())
            .unwrap();
        consumer.handle().request_stop();
        consumer.run().await.unwrap();
    }
}
