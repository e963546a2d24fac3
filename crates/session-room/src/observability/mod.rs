//! Observability for the session room.
//!
//! The library only records through the `metrics` facade; installing an
//! exporter is left to the host application.
//!
//! # Privacy by Default
//!
//! Instrumented functions use `#[instrument(skip_all)]` and list safe fields
//! explicitly. Display names and subjects are never logged. Metric labels
//! are bounded:
//! - `outcome`: connected, unreachable, broker_outage, transient, stale
//! - `role`: host, guest
//! - `reason`: user_ended, session_ended, navigated
//! - `kind`: bounded by `RoomError::label`
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `room_dial_attempts_total` | Counter | `outcome` | Guest dial results |
//! | `room_identity_retries_total` | Counter | none | Broker connect retries |
//! | `room_calls_connected_total` | Counter | `role` | Calls reaching CONNECTED |
//! | `room_teardowns_total` | Counter | `reason` | Room exits |
//! | `room_fatal_errors_total` | Counter | `kind` | Fatal errors shown to the user |

pub mod metrics;

pub use metrics::{
    record_call_connected, record_dial_attempt, record_fatal_error, record_identity_retry,
    record_teardown,
};
