//! Guest-side connection attempt loop.
//!
//! On every dial tick, if nothing is connected and no dial is in flight, the
//! guest dials the host identity. The loop is a pure decision machine: the
//! coordinator owns the interval and the dial tasks and reports results back.
//!
//! - "Identity unreachable" is the normal answer while the host has not
//!   joined. It is counted but never surfaced.
//! - Any other failure just clears the in-flight marker.
//! - A dial that stays unanswered for `stale_ticks` ticks is abandoned.
//! - The loop pauses on CONNECTED and never restarts by itself; the
//!   coordinator resumes it after a drop, and the user may force one extra
//!   dial once `force_after` attempts have failed.

use crate::config::Config;
use crate::errors::{BrokerError, BrokerErrorKind};
use crate::observability::metrics;

use tracing::{debug, trace};

/// Dial attempt sequence number (1-based).
pub type AttemptNumber = u32;

/// What the coordinator should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// An in-flight dial that went stale and must be closed.
    pub abandoned: Option<AttemptNumber>,
    /// Place this dial now.
    pub dial: Option<AttemptNumber>,
}

#[derive(Debug, Clone, Copy)]
struct InFlightDial {
    attempt: AttemptNumber,
    age_ticks: u32,
}

#[derive(Debug)]
pub struct ConnectionAttemptLoop {
    attempts: AttemptNumber,
    in_flight: Option<InFlightDial>,
    running: bool,
    halted: bool,
    force_after: u32,
    stale_ticks: u32,
}

impl From<&Config> for ConnectionAttemptLoop {
    fn from(config: &Config) -> Self {
        Self::new(config.force_connect_after, config.stale_dial_ticks)
    }
}

impl ConnectionAttemptLoop {
    /// Create a stopped loop.
    #[must_use]
    pub fn new(force_after: u32, stale_ticks: u32) -> Self {
        Self {
            attempts: 0,
            in_flight: None,
            running: false,
            halted: false,
            force_after,
            stale_ticks,
        }
    }

    /// Dial attempts made so far (never reset).
    #[must_use]
    pub fn attempts(&self) -> AttemptNumber {
        self.attempts
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Permanently stopped (fatal error, timer ended, teardown).
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<AttemptNumber> {
        self.in_flight.map(|dial| dial.attempt)
    }

    /// Start (or resume after a drop). No effect once halted.
    pub fn resume(&mut self) -> bool {
        if self.halted || self.running {
            return false;
        }
        self.running = true;
        self.in_flight = None;
        debug!(target: "room.dialer", attempts = self.attempts, "Dial loop running");
        true
    }

    /// One dial tick.
    pub fn on_tick(&mut self, connected: bool) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.running || connected {
            return outcome;
        }

        if let Some(dial) = self.in_flight.as_mut() {
            dial.age_ticks += 1;
            if dial.age_ticks < self.stale_ticks {
                return outcome;
            }
            debug!(
                target: "room.dialer",
                attempt = dial.attempt,
                age_ticks = dial.age_ticks,
                "Abandoning unanswered dial"
            );
            metrics::record_dial_attempt("stale");
            outcome.abandoned = Some(dial.attempt);
            self.in_flight = None;
        }

        outcome.dial = Some(self.begin_dial());
        outcome
    }

    /// A dial failed before producing a stream.
    pub fn on_failed(&mut self, attempt: AttemptNumber, error: &BrokerError) {
        match error.kind() {
            BrokerErrorKind::Unreachable => {
                trace!(target: "room.dialer", attempt, "Host not reachable yet");
            }
            _ => {
                debug!(
                    target: "room.dialer",
                    attempt,
                    error = %error,
                    "Dial attempt failed"
                );
            }
        }
        metrics::record_dial_attempt(error.label());
        self.clear(attempt);
    }

    /// A dial's channel closed before producing a stream.
    pub fn on_closed(&mut self, attempt: AttemptNumber) {
        if self.clear(attempt) {
            debug!(target: "room.dialer", attempt, "Dial closed before answer");
            metrics::record_dial_attempt("transient");
        }
    }

    /// The call connected: pause the loop.
    pub fn on_connected(&mut self, attempt: AttemptNumber) {
        self.clear(attempt);
        metrics::record_dial_attempt("connected");
        self.running = false;
        debug!(target: "room.dialer", attempt, "Dial loop paused on connect");
    }

    /// Halt permanently.
    pub fn halt(&mut self) {
        self.running = false;
        self.halted = true;
        self.in_flight = None;
    }

    /// Whether a manual dial would be accepted right now.
    #[must_use]
    pub fn can_force_connect(&self, connected: bool) -> bool {
        !self.halted && !connected && self.in_flight.is_none() && self.attempts >= self.force_after
    }

    /// One user-triggered dial, outside the tick cadence.
    pub fn force_connect(&mut self, connected: bool) -> Option<AttemptNumber> {
        if !self.can_force_connect(connected) {
            return None;
        }
        debug!(target: "room.dialer", attempts = self.attempts, "Force connect");
        Some(self.begin_dial())
    }

    fn begin_dial(&mut self) -> AttemptNumber {
        self.attempts += 1;
        self.in_flight = Some(InFlightDial {
            attempt: self.attempts,
            age_ticks: 0,
        });
        self.attempts
    }

    fn clear(&mut self, attempt: AttemptNumber) -> bool {
        if self.in_flight.is_some_and(|dial| dial.attempt == attempt) {
            self.in_flight = None;
            return true;
        }
        false
    }
}
