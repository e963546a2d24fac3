//! Session Room Library
//!
//! This library provides the real-time connection coordinator for a
//! one-to-one tutoring room:
//!
//! - Deterministic host identity / broker-assigned guest identity
//! - Local camera + microphone ownership with in-place mute toggles
//! - Guest-side dial loop that polls until the host answers
//! - Per-device call lifecycle (idle → connecting → connected → ended)
//! - Wall-clock session timer (waiting → active → warning → ended)
//! - A single idempotent teardown path for every exit trigger
//!
//! # Architecture
//!
//! Each device runs one coordinator actor, which is the only component the
//! UI shell talks to:
//!
//! ```text
//! SessionRoomCoordinator (one per device, owns all room state)
//! ├── MediaSessionManager          (local stream, toggles, release)
//! ├── PeerIdentityResolver         (host token / ephemeral guest)
//! ├── ConnectionAttemptLoop        (guest only, 4s dial tick)
//! ├── CallLifecycleStateMachine    (per-device connection state)
//! └── SessionTimerStateMachine     (scheduled rooms only, 1s tick)
//! ```
//!
//! Helper tasks (media prompt, broker connect, dials, channel events) post
//! their results into the actor's mailbox, so all state transitions on one
//! device are strictly ordered. The two devices are never synchronized with
//! each other.
//!
//! # Modules
//!
//! - [`coordinator`] - The room actor and its handle
//! - [`broker`] - Signaling broker contract and the in-memory broker
//! - [`config`] - Tunables loaded from environment
//! - [`errors`] - Error types with user-facing messages

pub mod broker;
pub mod call;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dialer;
pub mod errors;
pub mod identity;
pub mod media;
pub mod observability;
pub mod timer;

pub use coordinator::{
    ExitReason, RoomDependencies, RoomHandle, RoomSnapshot, SessionRoomCoordinator,
};
