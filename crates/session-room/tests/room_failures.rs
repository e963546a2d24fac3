//! Failure and teardown scenarios.
//!
//! Covers:
//! - Host identity collisions (second tab, slow disconnect)
//! - Media and broker failures
//! - Stale dials and the manual retry
//! - Teardown running exactly once

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::types::{ParticipantRole, RoomKind};
use room_test_utils::{
    room_dependencies, test_config, wait_for, AnchoredClock, MockMediaDevices, TestRoom,
};
use session_room::broker::memory::MemoryBroker;
use session_room::call::ConnectionState;
use session_room::errors::{MediaError, RoomError};
use session_room::timer::TimerState;
use session_room::ExitReason;

// ============================================================================
// Identity collisions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_host_tab_fails_without_disturbing_first() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();
    let host_identity = room.host_identity(RoomKind::Scheduled);

    let (first, _first_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&first, |s| s.connection_state == ConnectionState::Connecting).await;

    let (second, second_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    let failed = wait_for(&second, |s| s.fatal_error.is_some()).await;

    assert_eq!(
        failed.fatal_error,
        Some(RoomError::SessionActiveElsewhere(host_identity.clone()).client_message())
    );
    assert_eq!(failed.connection_state, ConnectionState::CallEnded);
    // The timer keeps running on the failed tab
    assert_eq!(failed.timer_state, Some(TimerState::Active));
    assert!(failed.exit.is_none());

    // 1 initial connect + 3 retries for the second tab
    assert_eq!(broker.stats().connect_attempts, 1 + 4);

    second.end_call().await.unwrap();
    second_task.await.unwrap();
    assert!(broker.is_registered(&host_identity));

    // The first tab still takes calls
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&guest, |s| s.is_connected()).await;
    let host = wait_for(&first, |s| s.is_connected()).await;
    assert!(host.fatal_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_host_reload_succeeds_once_previous_tab_leaves() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (old_tab, old_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&old_tab, |s| s.connection_state == ConnectionState::Connecting).await;

    // The reloaded tab starts before the old one's disconnect lands
    let (new_tab, _new_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(new_tab.snapshot().fatal_error.is_none());

    old_tab.cancel();
    old_task.await.unwrap();

    let listening = wait_for(&new_tab, |s| s.connection_state == ConnectionState::Connecting).await;
    assert!(listening.fatal_error.is_none());
    assert!(broker.is_registered(&room.host_identity(RoomKind::Scheduled)));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_abandons_pending_identity_retries() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();
    let host_identity = room.host_identity(RoomKind::Scheduled);

    let (first, first_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&first, |s| s.connection_state == ConnectionState::Connecting).await;

    let (second, second_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    second.end_call().await.unwrap();
    second_task.await.unwrap();

    first.end_call().await.unwrap();
    first_task.await.unwrap();

    // The ended tab never claims the freed identity
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!broker.is_registered(&host_identity));
    assert_eq!(broker.stats().active_sessions, 0);
}

// ============================================================================
// Media failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_permission_denied_stops_dialing_but_not_timer() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start - ChronoDuration::seconds(10));
    let broker = MemoryBroker::new();
    let host_devices = MockMediaDevices::granting();
    let guest_devices = MockMediaDevices::denying();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &host_devices, &clock),
    );
    let (guest, guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &guest_devices, &clock),
    );

    let failed = wait_for(&guest, |s| s.fatal_error.is_some()).await;
    assert_eq!(
        failed.fatal_error,
        Some(RoomError::Media(MediaError::PermissionDenied).client_message())
    );
    assert_eq!(failed.connection_state, ConnectionState::CallEnded);
    assert!(!failed.can_force_connect);

    tokio::time::sleep(Duration::from_secs(60)).await;

    let later = guest.snapshot();
    assert_eq!(later.dial_attempts, 0);
    assert_eq!(broker.stats().dials, 0);
    assert_eq!(later.timer_state, Some(TimerState::Active));
    assert!(later.time_left_display.is_some());
    assert!(!guest.force_connect().await.unwrap());

    // Host is unaffected and keeps listening
    assert_eq!(host.snapshot().connection_state, ConnectionState::Connecting);
    assert_eq!(guest_devices.request_count(), 1);

    guest.end_call().await.unwrap();
    guest_task.await.unwrap();
    assert_eq!(guest.wait_for_exit().await.unwrap(), ExitReason::UserEnded);
}

#[tokio::test(start_paused = true)]
async fn test_each_media_failure_has_its_own_message() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();

    let cases = [
        (
            MockMediaDevices::builder().no_device().build(),
            MediaError::NoDevice,
        ),
        (
            MockMediaDevices::builder().insecure_context().build(),
            MediaError::InsecureContext,
        ),
    ];

    for (devices, expected) in cases {
        let (guest, _task) = room.join(
            ParticipantRole::Guest,
            room_dependencies(&broker, &devices, &clock),
        );
        let failed = wait_for(&guest, |s| s.fatal_error.is_some()).await;
        assert_eq!(
            failed.fatal_error,
            Some(RoomError::Media(expected).client_message())
        );
        guest.end_call().await.unwrap();
    }
}

// ============================================================================
// Broker failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_broker_offline_at_connect_is_fatal_after_retries() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();
    broker.set_offline(true);

    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    let failed = wait_for(&guest, |s| s.fatal_error.is_some()).await;

    assert_eq!(
        failed.fatal_error,
        Some(RoomError::BrokerUnreachable(String::new()).client_message())
    );
    assert_eq!(broker.stats().connect_attempts, 4);
    assert_eq!(failed.dial_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_broker_outage_while_polling_is_retried_silently() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();

    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&guest, |s| s.dial_attempts >= 1).await;

    broker.set_offline(true);
    tokio::time::sleep(Duration::from_secs(20)).await;
    let during = guest.snapshot();
    assert!(during.fatal_error.is_none());
    assert!(during.dial_attempts > 1);

    broker.set_offline(false);
    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&guest, |s| s.is_connected()).await;
    wait_for(&host, |s| s.is_connected()).await;
}

// ============================================================================
// Dial loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unanswered_dial_is_abandoned_and_replaced() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    // Host never gets media, so it never answers
    let host_devices = MockMediaDevices::builder().pending().build();
    let guest_devices = MockMediaDevices::granting();

    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &host_devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &guest_devices, &clock),
    );

    // Dials at 0s, 8s and 16s; each one goes stale after two ticks
    tokio::time::sleep(Duration::from_secs(18)).await;

    let snapshot = guest.snapshot();
    assert_eq!(snapshot.dial_attempts, 3);
    assert_eq!(snapshot.connection_state, ConnectionState::Connecting);
    assert!(snapshot.remote_stream.is_none());
    assert_eq!(host.snapshot().connection_state, ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_force_connect_offered_after_repeated_failures() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let devices = MockMediaDevices::granting();
    let config = test_config();

    let (guest, _guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&guest, |s| s.dial_attempts >= 1).await;
    assert!(!guest.snapshot().can_force_connect);

    let offered = wait_for(&guest, |s| s.can_force_connect).await;
    assert!(offered.dial_attempts >= config.force_connect_after);

    assert!(guest.force_connect().await.unwrap());
    assert_eq!(guest.snapshot().dial_attempts, offered.dial_attempts + 1);

    // Host never forces anything
    let (host, _host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &devices, &clock),
    );
    wait_for(&host, |s| s.connection_state != ConnectionState::Idle).await;
    assert!(!host.force_connect().await.unwrap());
    assert!(!host.snapshot().can_force_connect);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_every_exit_path_tears_down_once() {
    let room = TestRoom::random();
    let clock = AnchoredClock::at(room.start);
    let broker = MemoryBroker::new();
    let host_devices = MockMediaDevices::granting();
    let guest_devices = MockMediaDevices::granting();

    let (host, host_task) = room.join(
        ParticipantRole::Host,
        room_dependencies(&broker, &host_devices, &clock),
    );
    wait_for(&host, |s| s.connection_state == ConnectionState::Connecting).await;
    let (guest, guest_task) = room.join(
        ParticipantRole::Guest,
        room_dependencies(&broker, &guest_devices, &clock),
    );
    wait_for(&guest, |s| s.is_connected()).await;

    // Guest: end call, end again, then navigate away
    guest.end_call().await.unwrap();
    guest.end_call().await.unwrap();
    guest.cancel();
    guest_task.await.unwrap();
    assert_eq!(guest.wait_for_exit().await.unwrap(), ExitReason::UserEnded);
    assert_eq!(guest.snapshot().connection_state, ConnectionState::CallEnded);
    assert!(guest.snapshot().local_stream.is_none());
    assert!(guest.snapshot().remote_stream.is_none());

    // Host: navigate away, then drop the handle
    host.cancel();
    host.cancel();
    host_task.await.unwrap();
    assert_eq!(host.wait_for_exit().await.unwrap(), ExitReason::Navigated);
    drop(host);

    for devices in [&host_devices, &guest_devices] {
        for track in devices.single_stream().tracks() {
            assert_eq!(track.stop_count(), 1);
        }
    }
    let stats = broker.stats();
    assert_eq!(stats.sessions_destroyed, 2);
    assert_eq!(stats.active_sessions, 0);

    assert_eq!(
        guest.toggle_audio().await.unwrap_err(),
        RoomError::RoomClosed
    );
    assert!(!guest.force_connect().await.is_ok_and(|placed| placed));
}
