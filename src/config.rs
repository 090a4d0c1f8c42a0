//! Consumer configuration.
//!
//! Every tunable has a default; [`ConsumerConfig::validate`] is run by the
//! builder before anything touches the network.

use std::time::Duration;

use crate::backoff::{BackoffConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_EXPONENT};
use crate::control::IdentifyData;
use crate::error::{ConsumerError, Result};
use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, MAX_READY_COUNT, MAX_REQUEUE_DELAY};
use crate::writer::{WriterConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT};

/// Default heartbeat timeout. The broker heartbeats every 30s by default.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time allowed for IDENTIFY and SUB to be answered.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for in-flight messages on stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default consecutive handshake rejections tolerated before `run` gives up.
pub const DEFAULT_MAX_HANDSHAKE_REJECTIONS: u32 = 3;

/// Tunables for a [`Consumer`](crate::Consumer).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Largest credit declared to the broker.
    pub max_in_flight: u32,
    /// Requeue delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on the requeue delay.
    pub max_delay: Duration,
    /// Cap on the doubling exponent.
    pub max_backoff_exponent: u32,
    /// Longest silence tolerated from the broker.
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Time `stop` waits for in-flight messages.
    pub drain_timeout: Duration,
    /// Largest frame size prefix accepted.
    pub max_frame_size: u32,
    /// Handler invocations allowed to run at once.
    pub concurrency: usize,
    /// Drop credit to one message while backed off.
    pub throttle_on_failure: bool,
    /// Consecutive `HandshakeRejected` results before `run` returns the error.
    pub max_handshake_rejections: u32,
    /// Send IDENTIFY before subscribing.
    pub identify: Option<IdentifyData>,
    /// Writer task settings.
    pub writer: WriterConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_backoff_exponent: DEFAULT_MAX_EXPONENT,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            concurrency: 1,
            throttle_on_failure: true,
            max_handshake_rejections: DEFAULT_MAX_HANDSHAKE_REJECTIONS,
            identify: None,
            writer: WriterConfig {
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            },
        }
    }
}

impl ConsumerConfig {
    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 || self.max_in_flight > MAX_READY_COUNT {
            return Err(invalid(format!(
                "max_in_flight must be within 1..={}, got {}",
                MAX_READY_COUNT, self.max_in_flight
            )));
        }
        if self.base_delay.is_zero() {
            return Err(invalid("base_delay must be positive".to_string()));
        }
        if self.base_delay > self.max_delay {
            return Err(invalid(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if self.max_delay > MAX_REQUEUE_DELAY {
            return Err(invalid(format!(
                "max_delay {:?} exceeds the broker maximum {:?}",
                self.max_delay, MAX_REQUEUE_DELAY
            )));
        }
        for (name, value) in [
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("connect_timeout", self.connect_timeout),
            ("handshake_timeout", self.handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{} must be positive", name)));
            }
        }
        if self.max_frame_size < 4 {
            return Err(invalid(format!(
                "max_frame_size {} cannot hold a frame type",
                self.max_frame_size
            )));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1".to_string()));
        }
        if self.max_handshake_rejections == 0 {
            return Err(invalid(
                "max_handshake_rejections must be at least 1".to_string(),
            ));
        }
        if self.writer.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Backoff settings for failed messages.
    pub fn message_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_exponent: self.max_backoff_exponent,
            max_rdy: self.max_in_flight,
        }
    }

    /// Backoff settings for reconnect attempts.
    pub fn reconnect_backoff(&self) -> BackoffConfig {
        self.message_backoff()
    }
}

fn invalid(reason: String) -> ConsumerError {
    ConsumerError::InvalidConfig(reason)
}
