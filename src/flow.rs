//! Flow-control credit (RDY) and acknowledgement policy.
//!
//! [`FlowControl`] is the single owner of the consumer's credit counters and
//! its [`BackoffPolicy`]. It never performs I/O: every transition returns
//! the commands the caller has to put on the wire. The consumer keeps it
//! behind one mutex and releases the lock before sending.
//!
//! # Credit model
//!
//! ```text
//! declared   last RDY value sent to the broker
//! remaining  credit the broker still holds (decremented on delivery)
//! in_flight  delivered messages not yet acknowledged
//! target     credit we want the broker to hold
//! ```
//!
//! A new `RDY` is only declared once `remaining` is zero. Credit the broker
//! still holds may already be on the wire, and the broker applies a new
//! count on top of whatever it sent before reading it, so re-declaring early
//! could let `in_flight` exceed `max_in_flight`. With `remaining` at zero,
//! credit is replenished when `in_flight` falls to the low-water mark
//! (`target / 4`) or when `target` itself changes, for instance when a
//! failure throttles delivery down to a single message.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::protocol::{Command, MessageId, MAX_READY_COUNT};

/// Result of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Commands produced by an acknowledgement.
#[derive(Debug)]
pub struct Acknowledgement {
    /// `FIN` or `REQ` for the message.
    pub ack: Command,
    /// `RDY` adjustment to send after the ack, if any.
    pub ready: Option<Command>,
    /// Requeue delay, `None` for a success.
    pub requeue_delay: Option<Duration>,
}

/// Credit counters plus backoff state for one consumer.
#[derive(Debug)]
pub struct FlowControl {
    max_in_flight: u32,
    broker_max_rdy: Option<u32>,
    throttle_on_failure: bool,
    backoff: BackoffPolicy,
    target: u32,
    declared: u32,
    remaining: u32,
    in_flight: u32,
    generation: u64,
    draining: bool,
}

impl FlowControl {
    pub fn new(max_in_flight: u32, throttle_on_failure: bool, backoff: BackoffPolicy) -> Self {
        Self {
            max_in_flight: max_in_flight.min(MAX_READY_COUNT),
            broker_max_rdy: None,
            throttle_on_failure,
            backoff,
            target: 0,
            declared: 0,
            remaining: 0,
            in_flight: 0,
            generation: 0,
            draining: false,
        }
    }

    /// Start accounting for a freshly subscribed connection.
    ///
    /// Bumps the generation so acknowledgements from an earlier connection
    /// are recognised as stale, and returns the initial `RDY`. Returns
    /// `RDY 0` when a drain was requested before the subscription finished.
    pub fn on_subscribed(&mut self, broker_max_rdy: Option<u32>) -> Result<(u64, Command)> {
        self.generation += 1;
        self.broker_max_rdy = broker_max_rdy;
        self.in_flight = 0;
        self.target = if self.draining { 0 } else { self.desired_target() };
        self.declared = self.target;
        self.remaining = self.target;
        tracing::debug!(
            generation = self.generation,
            rdy = self.target,
            "initial credit"
        );
        Ok((self.generation, Command::ready(self.target)?))
    }

    /// Account for a delivered message.
    ///
    /// Returns `false` when the broker delivered beyond the declared credit.
    /// The counter saturates at zero either way: a delivery that raced an
    /// `RDY 0` is legitimate.
    pub fn on_delivery(&mut self) -> bool {
        let within_credit = self.remaining > 0;
        self.remaining = self.remaining.saturating_sub(1);
        self.in_flight += 1;
        within_credit
    }

    /// Turn a handler outcome into the commands to send.
    ///
    /// Returns `None` for an acknowledgement belonging to an earlier
    /// connection; the broker has already given up on that delivery and
    /// will redeliver it.
    pub fn on_outcome(
        &mut self,
        generation: u64,
        id: &MessageId,
        outcome: Outcome,
    ) -> Result<Option<Acknowledgement>> {
        if generation != self.generation {
            tracing::debug!(
                stale = generation,
                current = self.generation,
                message = %id,
                "dropping acknowledgement from a previous connection"
            );
            return Ok(None);
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        let (ack, requeue_delay) = match outcome {
            Outcome::Success => {
                self.backoff.on_success();
                (Command::finish(id), None)
            }
            Outcome::Failure => {
                let delay = self.backoff.on_failure();
                (Command::requeue(id, delay)?, Some(delay))
            }
        };

        let ready = match self.replenish() {
            Some(count) => Some(Command::ready(count)?),
            None => None,
        };
        Ok(Some(Acknowledgement {
            ack,
            ready,
            requeue_delay,
        }))
    }

    /// Stop accepting deliveries. Returns `RDY 0` if credit was outstanding.
    pub fn begin_drain(&mut self) -> Result<Option<Command>> {
        let was_draining = self.draining;
        self.draining = true;
        self.target = 0;
        self.remaining = 0;
        if was_draining || self.declared == 0 {
            self.declared = 0;
            return Ok(None);
        }
        self.declared = 0;
        Ok(Some(Command::ready(0)?))
    }

    /// Forget connection-scoped counters after the connection is gone.
    ///
    /// Acknowledgements still running for the lost connection become stale.
    /// Backoff state is kept; it survives reconnects.
    pub fn on_disconnect(&mut self) {
        self.generation += 1;
        self.declared = 0;
        self.remaining = 0;
        self.in_flight = 0;
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn declared(&self) -> u32 {
        self.declared
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Largest credit allowed: `max_in_flight`, capped by the broker.
    fn ceiling(&self) -> u32 {
        match self.broker_max_rdy {
            Some(cap) => self.max_in_flight.min(cap),
            None => self.max_in_flight,
        }
    }

    fn desired_target(&self) -> u32 {
        if self.throttle_on_failure {
            self.backoff.current_rdy_hint().min(self.ceiling())
        } else {
            self.ceiling()
        }
    }

    /// New RDY count to declare, if one is due.
    ///
    /// Waits until the previous credit is used up, then declares at most
    /// `ceiling - in_flight`. `in_flight + remaining` therefore never exceeds
    /// the ceiling, whatever is still in transit.
    fn replenish(&mut self) -> Option<u32> {
        if self.draining || self.remaining > 0 {
            return None;
        }
        let target = self.desired_target();
        let changed = target != self.target;
        if !changed && self.in_flight > target / 4 {
            return None;
        }
        let credit = target.min(self.ceiling().saturating_sub(self.in_flight));
        if credit == 0 {
            return None;
        }
        tracing::debug!(
            from = self.declared,
            to = credit,
            in_flight = self.in_flight,
            "replenishing credit"
        );
        self.target = target;
        self.declared = credit;
        self.remaining = credit;
        Some(credit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;

    fn flow(max_in_flight: u32, throttle: bool) -> FlowControl {
        let backoff = BackoffPolicy::new(BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_exponent: 10,
            max_rdy: max_in_flight,
        });
        FlowControl::new(max_in_flight, throttle, backoff)
    }

    fn id(n: u8) -> MessageId {
        MessageId::from([n; 16])
    }

    fn encoded(cmd: &Option<Command>) -> Option<Vec<u8>> {
        cmd.as_ref().map(|c| c.encode().to_vec())
    }

    #[test]
    fn test_initial_credit() {
        let mut flow = flow(3, true);
        let (generation, rdy) = flow.on_subscribed(None).unwrap();
        assert_eq!(generation, 1);
        assert_eq!(&rdy.encode()[..], b"RDY 3\n");
        assert_eq!(flow.remaining(), 3);
        assert_eq!(flow.declared(), 3);
    }

    #[test]
    fn test_broker_cap_limits_credit() {
        let mut flow = flow(100, true);
        let (_, rdy) = flow.on_subscribed(Some(10)).unwrap();
        assert_eq!(&rdy.encode()[..], b"RDY 10\n");
    }

    #[test]
    fn test_three_successes_replenish_once() {
        let mut flow = flow(3, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        for _ in 0..3 {
            assert!(flow.on_delivery());
        }
        assert_eq!(flow.remaining(), 0);
        assert_eq!(flow.in_flight(), 3);

        let mut readies = Vec::new();
        for n in 0..3 {
            let ack = flow
                .on_outcome(generation, &id(n), Outcome::Success)
                .unwrap()
                .unwrap();
            assert_eq!(&ack.ack.encode()[..3], b"FIN");
            readies.extend(encoded(&ack.ready));
        }
        assert_eq!(readies, vec![b"RDY 3\n".to_vec()]);
        assert_eq!(flow.remaining(), 3);
        assert_eq!(flow.in_flight(), 0);
    }

    #[test]
    fn test_interleaved_successes_replenish_once() {
        let mut flow = flow(3, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        let mut readies = 0;
        for n in 0..3 {
            flow.on_delivery();
            let ack = flow
                .on_outcome(generation, &id(n), Outcome::Success)
                .unwrap()
                .unwrap();
            readies += ack.ready.is_some() as usize;
        }
        assert_eq!(readies, 1);
    }

    #[test]
    fn test_failure_requeues_and_throttles() {
        let mut flow = flow(4, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        for _ in 0..4 {
            flow.on_delivery();
        }

        let first = flow
            .on_outcome(generation, &id(1), Outcome::Failure)
            .unwrap()
            .unwrap();
        assert_eq!(first.requeue_delay, Some(Duration::from_millis(100)));
        let mut expected = b"REQ ".to_vec();
        expected.extend_from_slice(&[1; 16]);
        expected.extend_from_slice(b" 100\n");
        assert_eq!(first.ack.encode().to_vec(), expected);
        assert_eq!(encoded(&first.ready), Some(b"RDY 1\n".to_vec()));

        let second = flow
            .on_outcome(generation, &id(2), Outcome::Failure)
            .unwrap()
            .unwrap();
        assert!(second.requeue_delay.unwrap() > Duration::from_millis(100));
        assert!(second.ready.is_none());

        // The throttled credit is used, then a success lifts the throttle.
        flow.on_delivery();
        let success = flow
            .on_outcome(generation, &id(3), Outcome::Success)
            .unwrap()
            .unwrap();
        assert_eq!(encoded(&success.ready), Some(b"RDY 2\n".to_vec()));
        assert_eq!(flow.in_flight() + flow.remaining(), 4);
        assert_eq!(flow.backoff().consecutive_failures(), 0);
    }

    #[test]
    fn test_throttle_waits_for_outstanding_credit() {
        let mut flow = flow(4, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        flow.on_delivery();

        // Three credits may still be in transit; RDY 1 now could add to them.
        let ack = flow
            .on_outcome(generation, &id(1), Outcome::Failure)
            .unwrap()
            .unwrap();
        assert!(ack.ready.is_none());
        assert_eq!(flow.remaining(), 3);

        for n in 2..5 {
            flow.on_delivery();
            let ack = flow
                .on_outcome(generation, &id(n), Outcome::Failure)
                .unwrap()
                .unwrap();
            if n < 4 {
                assert!(ack.ready.is_none());
            } else {
                assert_eq!(encoded(&ack.ready), Some(b"RDY 1\n".to_vec()));
            }
        }
    }

    #[test]
    fn test_failure_without_throttle_keeps_credit() {
        let mut flow = flow(4, false);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        flow.on_delivery();
        let ack = flow
            .on_outcome(generation, &id(1), Outcome::Failure)
            .unwrap()
            .unwrap();
        assert!(ack.ready.is_none());
        assert_eq!(flow.target(), 4);
    }

    #[test]
    fn test_slow_handler_is_not_overrun() {
        let mut flow = flow(4, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        for _ in 0..4 {
            flow.on_delivery();
        }
        // Three of four still running: no new credit yet.
        let ack = flow
            .on_outcome(generation, &id(0), Outcome::Success)
            .unwrap()
            .unwrap();
        assert!(ack.ready.is_none());
        assert_eq!(flow.in_flight(), 3);
        assert!(flow.in_flight() + flow.remaining() <= 4);
    }

    #[test]
    fn test_outstanding_credit_is_not_declared_twice() {
        let mut flow = flow(4, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        for n in 0..3 {
            flow.on_delivery();
            let ack = flow
                .on_outcome(generation, &id(n), Outcome::Success)
                .unwrap()
                .unwrap();
            assert!(ack.ready.is_none());
        }
        assert_eq!((flow.in_flight(), flow.remaining()), (0, 1));

        // The last credit arrives, is finished, and only then is RDY renewed.
        assert!(flow.on_delivery());
        let ack = flow
            .on_outcome(generation, &id(3), Outcome::Success)
            .unwrap()
            .unwrap();
        assert_eq!(encoded(&ack.ready), Some(b"RDY 4\n".to_vec()));
        for _ in 0..4 {
            assert!(flow.on_delivery());
        }
        assert_eq!(flow.in_flight(), 4);
    }

    #[test]
    fn test_delivery_beyond_credit_is_reported() {
        let mut flow = flow(1, true);
        flow.on_subscribed(None).unwrap();
        assert!(flow.on_delivery());
        assert!(!flow.on_delivery());
        assert_eq!(flow.remaining(), 0);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut flow = flow(2, true);
        let (old, _) = flow.on_subscribed(None).unwrap();
        flow.on_delivery();
        flow.on_disconnect();
        assert!(flow
            .on_outcome(old, &id(1), Outcome::Success)
            .unwrap()
            .is_none());
        let (current, _) = flow.on_subscribed(None).unwrap();
        assert_ne!(old, current);

        assert!(flow
            .on_outcome(old, &id(1), Outcome::Failure)
            .unwrap()
            .is_none());
        assert_eq!(flow.backoff().consecutive_failures(), 0);
    }

    #[test]
    fn test_backoff_survives_reconnect() {
        let mut flow = flow(2, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        flow.on_delivery();
        flow.on_outcome(generation, &id(1), Outcome::Failure)
            .unwrap();
        flow.on_disconnect();

        let (_, rdy) = flow.on_subscribed(None).unwrap();
        assert_eq!(&rdy.encode()[..], b"RDY 1\n");
        assert_eq!(flow.backoff().consecutive_failures(), 1);
    }

    #[test]
    fn test_drain_stops_replenishing() {
        let mut flow = flow(2, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        flow.on_delivery();
        flow.on_delivery();

        let rdy = flow.begin_drain().unwrap();
        assert_eq!(encoded(&rdy), Some(b"RDY 0\n".to_vec()));
        assert!(flow.begin_drain().unwrap().is_none());

        for n in 0..2 {
            let ack = flow
                .on_outcome(generation, &id(n), Outcome::Success)
                .unwrap()
                .unwrap();
            assert!(ack.ready.is_none());
        }
        assert_eq!(flow.in_flight(), 0);
    }

    #[test]
    fn test_credit_never_exceeds_max_in_flight() {
        let mut flow = flow(5, true);
        let (generation, _) = flow.on_subscribed(None).unwrap();
        for n in 0..50u8 {
            flow.on_delivery();
            let outcome = if n % 3 == 0 {
                Outcome::Failure
            } else {
                Outcome::Success
            };
            flow.on_outcome(generation, &id(n), outcome).unwrap();
            assert!(flow.declared() <= 5);
            assert!(flow.remaining() <= flow.declared());
            assert!(flow.in_flight() + flow.remaining() <= 5);
        }
    }
}
