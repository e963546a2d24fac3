//! Pre-configured fixtures for room tests.
//!
//! Provides builders for:
//! - Session descriptors with a configurable window
//! - Dependency bundles wiring a broker, devices and clock together
//! - Fast configurations for scenario tests

use chrono::{DateTime, TimeZone, Utc};
use common::types::{ParticipantRole, RoomId, RoomKind, SessionDescriptor};
use session_room::broker::memory::MemoryBroker;
use session_room::clock::Clock;
use session_room::config::Config;
use session_room::identity::{PeerIdentity, PeerIdentityResolver};
use session_room::media::MediaDevices;
use session_room::{RoomDependencies, RoomHandle, RoomSnapshot, SessionRoomCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Upper bound for any single wait in paused-time scenario tests.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room ID.
    pub id: String,
    /// Host display name.
    pub host_name: String,
    /// Guest display name.
    pub guest_name: String,
    /// Lesson subject.
    pub subject: String,
    /// Scheduled start.
    pub start: DateTime<Utc>,
    /// Scheduled length.
    pub length: chrono::Duration,
}

impl TestRoom {
    /// Create a 30 minute room starting at [`TestRoom::default_start`].
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host_name: "Ada Tutor".to_string(),
            guest_name: "Sam Student".to_string(),
            subject: "Linear algebra".to_string(),
            start: Self::default_start(),
            length: chrono::Duration::minutes(30),
        }
    }

    /// Create a test room with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }

    /// Fixed scheduled start used by default (T0).
    #[must_use]
    pub fn default_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
    }

    /// Set the scheduled start.
    #[must_use]
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Set the scheduled length.
    #[must_use]
    pub fn lasting(mut self, length: chrono::Duration) -> Self {
        self.length = length;
        self
    }

    /// Scheduled end.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.length
    }

    /// Build the descriptor. Panics on an invalid window.
    #[must_use]
    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor::new(
            RoomId::new(self.id.clone()),
            self.host_name.clone(),
            self.guest_name.clone(),
            self.subject.clone(),
            self.start,
            self.end(),
        )
        .expect("test room window must be valid")
    }

    /// Deterministic host identity for this room.
    #[must_use]
    pub fn host_identity(&self, kind: RoomKind) -> PeerIdentity {
        PeerIdentityResolver::new(RoomId::new(self.id.clone()), kind).host_identity()
    }

    /// Start a scheduled room on one device with the default config.
    #[must_use]
    pub fn join(&self, role: ParticipantRole, deps: RoomDependencies) -> (RoomHandle, JoinHandle<()>) {
        self.join_with(role, RoomKind::Scheduled, deps, test_config())
    }

    /// Start a room on one device.
    #[must_use]
    pub fn join_with(
        &self,
        role: ParticipantRole,
        kind: RoomKind,
        deps: RoomDependencies,
        config: Config,
    ) -> (RoomHandle, JoinHandle<()>) {
        SessionRoomCoordinator::start(self.descriptor(), role, kind, deps, config)
    }
}

/// Wait until the room publishes a snapshot matching `predicate`.
///
/// Panics after [`SCENARIO_TIMEOUT`] of (usually paused) tokio time.
pub async fn wait_for(
    handle: &RoomHandle,
    predicate: impl FnMut(&RoomSnapshot) -> bool,
) -> RoomSnapshot {
    let mut snapshots = handle.subscribe();
    let snapshot = tokio::time::timeout(SCENARIO_TIMEOUT, snapshots.wait_for(predicate))
        .await
        .expect("room never reached the expected state")
        .expect("room snapshot channel closed");
    snapshot.clone()
}

/// Bundle the collaborators of one device.
#[must_use]
pub fn room_dependencies<D, C>(broker: &MemoryBroker, devices: &D, clock: &C) -> RoomDependencies
where
    D: MediaDevices + Clone + 'static,
    C: Clock + Clone + 'static,
{
    RoomDependencies {
        broker: Arc::new(broker.clone()),
        devices: Arc::new(devices.clone()),
        clock: Arc::new(clock.clone()),
    }
}

/// Default configuration (4s dial tick, 1s timer tick, 3s grace).
#[must_use]
pub fn test_config() -> Config {
    Config::default()
}
