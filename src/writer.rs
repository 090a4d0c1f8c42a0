//! Dedicated writer task serializing commands onto the socket.
//!
//! All commands for one connection go through a single task fed by an mpsc
//! channel, so concurrent senders (the read loop answering heartbeats, the
//! handler tasks acknowledging messages, the consumer adjusting RDY) can
//! never interleave partial commands.
//!
//! # Architecture
//!
//! ```text
//! Read loop ───┐
//! Handler 1 ───┼─► mpsc::Sender<Outbound> ─► Writer Task ─► Socket
//! Handler N ───┘
//! ```
//!
//! Ready commands are batched into a single vectored write.

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ConsumerError, Result};
use crate::protocol::Command;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default time allowed for flushing queued commands on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum commands to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Item on the writer channel.
#[derive(Debug)]
enum Outbound {
    /// Pre-encoded command bytes.
    Command(Bytes),
    /// Flush, shut the write half down and stop.
    Shutdown(oneshot::Sender<()>),
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the command queue.
    pub channel_capacity: usize,
    /// Time allowed for a graceful shutdown before giving up.
    pub shutdown_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Handle for sending commands to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Outbound>,
    shutdown_timeout: Duration,
}

impl WriterHandle {
    /// Encode and queue a command.
    ///
    /// Waits while the channel is full. Fails with `ConnectionClosed` once
    /// the writer task has stopped.
    pub async fn send(&self, command: &Command) -> Result<()> {
        tracing::trace!(command = %command, "queue command");
        self.send_raw(command.encode()).await
    }

    /// Queue pre-encoded bytes (the protocol magic, for instance).
    pub async fn send_raw(&self, bytes: Bytes) -> Result<()> {
        self.tx
            .send(Outbound::Command(bytes))
            .await
            .map_err(|_| ConsumerError::ConnectionClosed)
    }

    /// Reserve room for `n` commands.
    ///
    /// Commands pushed through the returned slots cannot be overtaken by
    /// other senders, so callers can reserve before taking a lock and queue
    /// commands in lock order without awaiting under it.
    pub async fn reserve(&self, n: usize) -> Result<WriterSlots<'_>> {
        let permits = self
            .tx
            .reserve_many(n)
            .await
            .map_err(|_| ConsumerError::ConnectionClosed)?;
        Ok(WriterSlots { permits })
    }

    /// Flush everything queued so far, then shut the write half down.
    ///
    /// Idempotent: calling it on a stopped writer returns immediately.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Outbound::Shutdown(done_tx)).await.is_err() {
            return;
        }
        if tokio::time::timeout(self.shutdown_timeout, done_rx)
            .await
            .is_err()
        {
            tracing::warn!("writer did not flush within {:?}", self.shutdown_timeout);
        }
    }
}

/// Channel capacity reserved with [`WriterHandle::reserve`].
///
/// Unused slots are released on drop.
pub struct WriterSlots<'a> {
    permits: mpsc::PermitIterator<'a, Outbound>,
}

impl WriterSlots<'_> {
    /// Queue a command in the next reserved slot.
    ///
    /// Returns `false` once every slot has been used.
    pub fn send(&mut self, command: &Command) -> bool {
        match self.permits.next() {
            Some(permit) => {
                tracing::trace!(command = %command, "queue command");
                permit.send(Outbound::Command(command.encode()));
                true
            }
            None => false,
        }
    }
}

/// Spawn the writer task and return a handle for sending commands.
///
/// Returns a tuple of `(WriterHandle, JoinHandle)` where the JoinHandle can be
/// used to wait for the writer task to complete.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let handle = WriterHandle {
        tx,
        shutdown_timeout: config.shutdown_timeout,
    };
    let task = tokio::spawn(writer_loop(rx, writer));
    (handle, task)
}

/// Main writer loop - receives commands and writes them to the socket.
async fn writer_loop<W>(mut rx: mpsc::Receiver<Outbound>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(item) => item,
            // All handles dropped, clean shutdown
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut shutdown = None;
        match first {
            Outbound::Command(bytes) => batch.push(bytes),
            Outbound::Shutdown(done) => shutdown = Some(done),
        }

        while shutdown.is_none() && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Outbound::Command(bytes)) => batch.push(bytes),
                Ok(Outbound::Shutdown(done)) => shutdown = Some(done),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!("write failed: {}", e);
            return Err(e);
        }

        if let Some(done) = shutdown {
            let _ = writer.shutdown().await;
            let _ = done.send(());
            return Ok(());
        }
    }
}

/// Write a batch of commands using vectored I/O.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ConsumerError::Connection(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for remaining data after a partial write.
fn build_remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for bytes in batch {
        let start = skipped;
        let end = skipped + bytes.len();

        if skip_bytes < end {
            let start_in_command = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&bytes[start_in_command..]));
        }
        skipped = end;
    }

    slices
}
