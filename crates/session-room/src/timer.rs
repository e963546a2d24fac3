//! Session timer state machine.
//!
//! Tracks the scheduled session window against the local wall clock:
//!
//! ```text
//! WAITING ──(now >= start)──▶ ACTIVE ──(left <= threshold)──▶ WARNING ──(left <= 0)──▶ ENDED
//! ```
//!
//! The state only ever moves forward: a backward wall-clock adjustment can
//! change the displayed time but never un-end a session. Each device runs
//! its own timer; the two can disagree by their clock skew.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Phase of the scheduled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerState {
    /// Before the scheduled start.
    Waiting,
    /// Running, more than the warning threshold left.
    Active,
    /// Running, at most the warning threshold left.
    Warning,
    /// Scheduled end reached.
    Ended,
}

impl TimerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TimerState::Waiting => "waiting",
            TimerState::Active => "active",
            TimerState::Warning => "warning",
            TimerState::Ended => "ended",
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTick {
    pub state: TimerState,
    /// `mm:ss` of time left (or overrun, prefixed with `-`). `None` while waiting.
    pub display: Option<String>,
    /// True on exactly one tick: the one that first reached ENDED.
    pub just_ended: bool,
}

/// Timer for one scheduled window.
#[derive(Debug, Clone)]
pub struct SessionTimerStateMachine {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    warning_threshold: chrono::Duration,
    state: TimerState,
    display: Option<String>,
}

impl SessionTimerStateMachine {
    /// Create a timer in WAITING.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, warning_threshold: Duration) -> Self {
        Self {
            start,
            end,
            warning_threshold: chrono::Duration::from_std(warning_threshold)
                .unwrap_or(chrono::Duration::MAX),
            state: TimerState::Waiting,
            display: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> TimerState {
        self.state
    }

    #[must_use]
    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// Whether the timer has reached ENDED.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.state == TimerState::Ended
    }

    /// Classify `now` without regard to the current state.
    #[must_use]
    pub fn classify(&self, now: DateTime<Utc>) -> TimerState {
        if now < self.start {
            return TimerState::Waiting;
        }
        let left = self.end - now;
        if left <= chrono::Duration::zero() {
            TimerState::Ended
        } else if left <= self.warning_threshold {
            TimerState::Warning
        } else {
            TimerState::Active
        }
    }

    /// Advance to `now`. Keeps running after ENDED so the overrun display
    /// stays live during the grace window.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TimerTick {
        let was_ended = self.has_ended();
        self.state = self.state.max(self.classify(now));

        self.display = match self.state {
            TimerState::Waiting => None,
            _ => Some(format_remaining(self.end - now)),
        };

        TimerTick {
            state: self.state,
            display: self.display.clone(),
            just_ended: !was_ended && self.has_ended(),
        }
    }
}

/// Format a signed remaining duration as total minutes and seconds, `-`
/// prefixed when negative. Minutes are not capped at 59.
#[must_use]
pub fn format_remaining(left: chrono::Duration) -> String {
    let total = left.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let abs = total.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 60, abs % 60)
}
