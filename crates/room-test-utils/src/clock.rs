//! Wall clock anchored to tokio time.
//!
//! Under `#[tokio::test(start_paused = true)]`, `tokio::time::Instant` only
//! moves when the test advances it. `AnchoredClock` maps that onto a wall
//! time, so the session timer sees minutes pass in microseconds of real time.
//!
//! # Example
//!
//! ```rust,ignore
//! let clock = AnchoredClock::at(t0);
//! tokio::time::advance(Duration::from_secs(60)).await;
//! assert_eq!(clock.now(), t0 + chrono::Duration::seconds(60));
//! ```

use chrono::{DateTime, Utc};
use session_room::clock::Clock;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Clock whose wall time advances with `tokio::time::Instant`.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    inner: Arc<Mutex<Anchor>>,
}

#[derive(Debug)]
struct Anchor {
    wall: DateTime<Utc>,
    instant: Instant,
}

impl AnchoredClock {
    /// Anchor `wall` to the current tokio instant.
    #[must_use]
    pub fn at(wall: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Anchor {
                wall,
                instant: Instant::now(),
            })),
        }
    }

    /// Jump the wall clock (e.g. an NTP correction) without moving tokio time.
    pub fn set(&self, wall: DateTime<Utc>) {
        let mut anchor = self.inner.lock().unwrap();
        anchor.wall = wall;
        anchor.instant = Instant::now();
    }

    /// Shift the wall clock by `delta` (negative moves it backwards).
    pub fn shift(&self, delta: chrono::Duration) {
        let now = self.now();
        self.set(now + delta);
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let anchor = self.inner.lock().unwrap();
        let elapsed = chrono::Duration::from_std(anchor.instant.elapsed()).unwrap();
        anchor.wall + elapsed
    }
}
